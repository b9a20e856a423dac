//! Oracle port (spec §4.4): consumed, never implemented by `core` beyond a
//! test/demo `MockOracle`. Production oracle adapters live outside this
//! crate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::lmsr::Outcome;
use crate::market::MarketId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proof {
  pub outcome: Outcome,
  pub timestamp: DateTime<Utc>,
  pub signature: String,
  pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleStatus {
  pub healthy: bool,
  pub last_update: DateTime<Utc>,
  pub kind: String,
}

#[async_trait]
pub trait Oracle: Send + Sync {
  async fn should_freeze(&self, market_id: &MarketId, end_time: DateTime<Utc>) -> bool;
  async fn fetch_outcome(&self, market_id: &MarketId, question: &str) -> anyhow::Result<Proof>;
  async fn verify_proof(&self, proof: &Proof) -> bool;
  async fn status(&self) -> OracleStatus;
  fn identity(&self) -> String;
}

/// Deterministic, caller-seeded oracle used by the engine binary's demo
/// wiring and by tests. Freezes once `end_time` has passed; resolves
/// according to a pre-registered outcome table and always verifies its own
/// proofs (a real oracle adapter is the out-of-scope collaborator per §1).
pub struct MockOracle {
  identity: String,
  outcomes: Mutex<HashMap<String, Outcome>>,
}

impl MockOracle {
  pub fn new(identity: impl Into<String>) -> Self {
    Self { identity: identity.into(), outcomes: Mutex::new(HashMap::new()) }
  }

  pub async fn register_outcome(&self, market_id: &MarketId, outcome: Outcome) {
    self.outcomes.lock().await.insert(market_id.0.clone(), outcome);
  }
}

#[async_trait]
impl Oracle for MockOracle {
  async fn should_freeze(&self, _market_id: &MarketId, end_time: DateTime<Utc>) -> bool {
    common::time::has_elapsed(end_time, common::time::now())
  }

  async fn fetch_outcome(&self, market_id: &MarketId, _question: &str) -> anyhow::Result<Proof> {
    let outcomes = self.outcomes.lock().await;
    let outcome = outcomes
      .get(&market_id.0)
      .copied()
      .ok_or_else(|| anyhow::anyhow!("no registered outcome for market {}", market_id))?;
    Ok(Proof {
      outcome,
      timestamp: common::time::now(),
      signature: format!("mock-signature:{}:{}", market_id, outcome),
      metadata: HashMap::new(),
    })
  }

  async fn verify_proof(&self, proof: &Proof) -> bool {
    proof.signature.starts_with("mock-signature:") || proof.metadata.contains_key("admin_override")
  }

  async fn status(&self) -> OracleStatus {
    OracleStatus { healthy: true, last_update: common::time::now(), kind: "mock".to_string() }
  }

  fn identity(&self) -> String {
    self.identity.clone()
  }
}
