//! Store port (component I, spec §4.7/§6): durable, atomic snapshots of the
//! registry. `core` depends only on the `Store` trait; `JsonFileStore` is one
//! concrete adapter, injected by `engine`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::market::{LockedLiquidity, Market};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrySnapshot {
  pub markets: Vec<Market>,
  pub locked_liquidity: LockedLiquidity,
}

#[async_trait::async_trait]
pub trait Store: Send + Sync {
  async fn load(&self) -> anyhow::Result<RegistrySnapshot>;
  async fn save(&self, snapshot: &RegistrySnapshot) -> anyhow::Result<()>;
}

/// JSON-on-disk adapter. Writes go to a sibling temp file and are then
/// renamed into place, so a reader never observes a partial snapshot (spec
/// §4.7, §6).
pub struct JsonFileStore {
  path: PathBuf,
}

impl JsonFileStore {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  fn temp_path(&self) -> PathBuf {
    let mut temp = self.path.clone();
    let file_name = temp
      .file_name()
      .map(|n| format!(".{}.tmp", n.to_string_lossy()))
      .unwrap_or_else(|| ".snapshot.tmp".to_string());
    temp.set_file_name(file_name);
    temp
  }
}

#[async_trait::async_trait]
impl Store for JsonFileStore {
  async fn load(&self) -> anyhow::Result<RegistrySnapshot> {
    if !Path::new(&self.path).exists() {
      return Ok(RegistrySnapshot::default());
    }
    let bytes = tokio::fs::read(&self.path).await?;
    let snapshot = serde_json::from_slice(&bytes)?;
    Ok(snapshot)
  }

  async fn save(&self, snapshot: &RegistrySnapshot) -> anyhow::Result<()> {
    let encoded = serde_json::to_vec_pretty(snapshot)?;
    let temp = self.temp_path();
    tokio::fs::write(&temp, encoded).await?;
    tokio::fs::rename(&temp, &self.path).await?;
    Ok(())
  }
}

/// In-memory adapter used by tests and by anything that wants `core`'s
/// behavior without touching disk.
#[derive(Default)]
pub struct InMemoryStore {
  inner: tokio::sync::RwLock<RegistrySnapshot>,
}

#[async_trait::async_trait]
impl Store for InMemoryStore {
  async fn load(&self) -> anyhow::Result<RegistrySnapshot> {
    Ok(self.inner.read().await.clone())
  }

  async fn save(&self, snapshot: &RegistrySnapshot) -> anyhow::Result<()> {
    *self.inner.write().await = snapshot.clone();
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::lmsr::AmmState;
  use crate::market::{Address, AppSessionId, ChannelId, MarketId, MarketStatus};
  use std::collections::HashMap;

  fn sample_market() -> Market {
    Market {
      id: MarketId("m1".into()),
      question: "will it rain".into(),
      description: "".into(),
      creator: Address("0xcreator".into()),
      created_at: chrono::Utc::now(),
      end_time: chrono::Utc::now(),
      status: MarketStatus::Active,
      amm: AmmState::new(1_000_000_000),
      total_volume: 0,
      trades: vec![],
      positions: HashMap::new(),
      winning_outcome: None,
      resolved_at: None,
      settled_at: None,
      channel_id: ChannelId("c1".into()),
      app_session_id: AppSessionId("s1".into()),
    }
  }

  #[tokio::test]
  async fn json_store_round_trips_exactly() {
    let dir = std::env::temp_dir().join(format!("prediction-core-test-{}", uuid::Uuid::new_v4()));
    let store = JsonFileStore::new(dir.join("snapshot.json"));
    let snapshot = RegistrySnapshot { markets: vec![sample_market()], locked_liquidity: LockedLiquidity::default() };
    store.save(&snapshot).await.unwrap();
    let loaded = store.load().await.unwrap();
    assert_eq!(loaded.markets.len(), 1);
    assert_eq!(loaded.markets[0].id, snapshot.markets[0].id);
    assert_eq!(loaded.markets[0].total_volume, snapshot.markets[0].total_volume);
    let _ = tokio::fs::remove_dir_all(dir.parent().unwrap().join(dir.file_name().unwrap())).await;
  }

  #[tokio::test]
  async fn missing_file_loads_as_empty_snapshot() {
    let store = JsonFileStore::new(std::env::temp_dir().join(format!("nonexistent-{}.json", uuid::Uuid::new_v4())));
    let loaded = store.load().await.unwrap();
    assert!(loaded.markets.is_empty());
  }
}
