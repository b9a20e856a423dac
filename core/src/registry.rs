//! Market registry (component C, spec §2/§5): owns every `Market` aggregate
//! behind a per-market lock. The registry itself carries no cross-market
//! lock — §5 notes that no invariant in §3 requires one.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::error::{CoreError, CoreResult};
use crate::market::{LockedLiquidity, Market, MarketId};
use crate::store::RegistrySnapshot;

pub type SharedMarket = Arc<RwLock<Market>>;

#[derive(Default)]
pub struct MarketRegistry {
  markets: DashMap<MarketId, SharedMarket>,
  locked_liquidity: RwLock<LockedLiquidity>,
}

impl MarketRegistry {
  pub fn new() -> Self {
    Self { markets: DashMap::new(), locked_liquidity: RwLock::new(LockedLiquidity::default()) }
  }

  pub fn insert(&self, market: Market) -> SharedMarket {
    let id = market.id.clone();
    let shared = Arc::new(RwLock::new(market));
    self.markets.insert(id, shared.clone());
    shared
  }

  pub fn get(&self, id: &MarketId) -> CoreResult<SharedMarket> {
    self.markets.get(id).map(|entry| entry.value().clone()).ok_or_else(|| CoreError::MarketNotFound(id.clone()))
  }

  /// Snapshot of every market's id and current status, taken without holding
  /// any individual market lock for longer than a single read (spec §4.4
  /// step 1, "snapshot active markets").
  pub async fn all_ids(&self) -> Vec<MarketId> {
    self.markets.iter().map(|entry| entry.key().clone()).collect()
  }

  pub async fn snapshot(&self, id: &MarketId) -> CoreResult<Market> {
    let shared = self.get(id)?;
    let guard = shared.read().await;
    Ok(guard.clone())
  }

  pub async fn list_all(&self) -> Vec<Market> {
    let mut out = Vec::with_capacity(self.markets.len());
    for entry in self.markets.iter() {
      out.push(entry.value().read().await.clone());
    }
    out
  }

  /// Same as `list_all`, but substitutes `held` for the market whose lock the
  /// caller is already holding exclusively — re-acquiring that market's own
  /// lock here would deadlock against the caller's write guard. Used while
  /// building the persistence snapshot mid-mutation (spec §5: the mutation's
  /// own market is held through persistence, every other market is read
  /// independently).
  pub async fn list_all_with_override(&self, held_id: &MarketId, held: &Market) -> Vec<Market> {
    let mut out = Vec::with_capacity(self.markets.len());
    for entry in self.markets.iter() {
      if entry.key() == held_id {
        out.push(held.clone());
      } else {
        out.push(entry.value().read().await.clone());
      }
    }
    out
  }

  /// Builds the full persistence snapshot while the caller holds `held`'s
  /// lock exclusively. Shared by every mutation path (trade, lifecycle,
  /// settlement) so the override logic lives in one place.
  pub async fn snapshot_with_override(&self, held_id: &MarketId, held: &Market) -> RegistrySnapshot {
    RegistrySnapshot {
      markets: self.list_all_with_override(held_id, held).await,
      locked_liquidity: self.locked_liquidity_snapshot().await,
    }
  }

  pub fn len(&self) -> usize {
    self.markets.len()
  }

  pub fn is_empty(&self) -> bool {
    self.markets.is_empty()
  }

  pub async fn locked_liquidity(&self, address: &crate::market::Address) -> i128 {
    self.locked_liquidity.read().await.get(address)
  }

  pub async fn lock_liquidity(&self, address: &crate::market::Address, amount: i128) {
    self.locked_liquidity.write().await.lock(address, amount);
  }

  pub async fn release_liquidity(&self, address: &crate::market::Address, amount: i128) {
    self.locked_liquidity.write().await.release(address, amount);
  }

  pub async fn locked_liquidity_snapshot(&self) -> LockedLiquidity {
    self.locked_liquidity.read().await.clone()
  }
}
