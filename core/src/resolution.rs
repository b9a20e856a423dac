//! Resolution engine (component F, spec §4.4): a periodic control loop that
//! freezes expired markets, fetches outcomes from the oracle, verifies
//! proofs, and advances lifecycle state. Owned by a dedicated worker task in
//! `engine`; `core` only provides the loop body and the pending-approvals
//! map so the worker shell stays a thin `tokio::spawn` wrapper.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::admin::{AdminIdentity, AdminRegistry};
use crate::broadcaster::{CoreEvent, EventBroadcaster};
use crate::error::{CoreError, CoreResult};
use crate::lifecycle;
use crate::market::{Market, MarketId, MarketStatus};
use crate::oracle::{Oracle, Proof};
use crate::registry::MarketRegistry;
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct ResolutionConfig {
  pub check_interval: Duration,
  pub auto_freeze: bool,
  pub auto_resolve: bool,
  pub require_manual_approval: bool,
}

impl Default for ResolutionConfig {
  fn default() -> Self {
    Self {
      check_interval: Duration::from_secs(30),
      auto_freeze: true,
      auto_resolve: true,
      require_manual_approval: false,
    }
  }
}

pub struct ResolutionEngine {
  registry: Arc<MarketRegistry>,
  oracle: Arc<dyn Oracle>,
  store: Arc<dyn Store>,
  broadcaster: Arc<EventBroadcaster>,
  admins: Arc<AdminRegistry>,
  config: ResolutionConfig,
  pending_approvals: Mutex<HashMap<MarketId, Proof>>,
}

impl ResolutionEngine {
  pub fn new(
    registry: Arc<MarketRegistry>,
    oracle: Arc<dyn Oracle>,
    store: Arc<dyn Store>,
    broadcaster: Arc<EventBroadcaster>,
    admins: Arc<AdminRegistry>,
    config: ResolutionConfig,
  ) -> Self {
    Self { registry, oracle, store, broadcaster, admins, config, pending_approvals: Mutex::new(HashMap::new()) }
  }

  /// Runs forever, sleeping `check_interval` between ticks. Intended to be
  /// spawned as its own task; cancellation happens at tick boundaries via
  /// the caller dropping the `JoinHandle` or racing a cancellation token.
  pub async fn run(self: Arc<Self>) {
    let mut interval = tokio::time::interval(self.config.check_interval);
    loop {
      interval.tick().await;
      if let Err(err) = self.tick().await {
        log::warn!("resolution tick failed, will retry next interval: {err}");
      }
    }
  }

  /// One loop body (spec §4.4 steps 1-3). Oracle errors are logged and
  /// retried on the next tick rather than propagated (spec §7).
  pub async fn tick(&self) -> anyhow::Result<()> {
    let ids = self.registry.all_ids().await;
    for id in ids {
      if let Err(err) = self.tick_one(&id).await {
        log::warn!("resolution tick failed for market {id}: {err}");
      }
    }
    Ok(())
  }

  async fn tick_one(&self, id: &MarketId) -> CoreResult<()> {
    let status = self.registry.snapshot(id).await?.status;
    match status {
      MarketStatus::Active => self.maybe_freeze(id).await,
      MarketStatus::Frozen => self.maybe_resolve(id).await,
      _ => Ok(()),
    }
  }

  async fn maybe_freeze(&self, id: &MarketId) -> CoreResult<()> {
    if !self.config.auto_freeze {
      return Ok(());
    }
    let end_time = self.registry.snapshot(id).await?.end_time;
    if !self.oracle.should_freeze(id, end_time).await {
      return Ok(());
    }
    let shared = self.registry.get(id)?;
    let mut market = shared.write().await;
    if market.status != MarketStatus::Active {
      // Revalidated after the oracle call, per §5's re-acquire-and-revalidate rule.
      return Ok(());
    }
    lifecycle::freeze(&mut market)?;
    self.persist_and_broadcast(&market).await?;
    Ok(())
  }

  async fn maybe_resolve(&self, id: &MarketId) -> CoreResult<()> {
    if !self.config.auto_resolve {
      return Ok(());
    }
    let question = self.registry.snapshot(id).await?.question;
    let proof = match self.oracle.fetch_outcome(id, &question).await {
      Ok(proof) => proof,
      Err(err) => return Err(CoreError::OracleUnavailable(err.to_string())),
    };
    if !self.oracle.verify_proof(&proof).await {
      return Err(CoreError::OracleProofInvalid(id.clone()));
    }

    if self.config.require_manual_approval {
      self.pending_approvals.lock().await.insert(id.clone(), proof);
      log::info!("market {id} resolution proof stashed for manual approval");
      return Ok(());
    }

    self.apply_resolution(id, proof).await
  }

  async fn apply_resolution(&self, id: &MarketId, proof: Proof) -> CoreResult<()> {
    let shared = self.registry.get(id)?;
    let mut market = shared.write().await;
    if market.status != MarketStatus::Frozen {
      return Ok(());
    }
    lifecycle::resolve(&mut market, proof.outcome)?;
    self.persist_and_broadcast(&market).await?;
    Ok(())
  }

  /// `approve_pending` (spec §4.4): advances a stashed proof to `resolve`.
  pub async fn approve_pending(&self, market_id: &MarketId, admin: &AdminIdentity) -> CoreResult<()> {
    self.admins.authorize(admin)?;
    let proof = self
      .pending_approvals
      .lock()
      .await
      .remove(market_id)
      .ok_or_else(|| CoreError::OracleProofInvalid(market_id.clone()))?;
    self.apply_resolution(market_id, proof).await
  }

  /// `reject_pending` (spec §4.4): discards the stashed proof, leaving the
  /// market FROZEN.
  pub async fn reject_pending(&self, market_id: &MarketId, admin: &AdminIdentity, reason: &str) -> CoreResult<()> {
    self.admins.authorize(admin)?;
    self.pending_approvals.lock().await.remove(market_id);
    log::info!("rejected pending resolution for market {market_id}: {reason}");
    Ok(())
  }

  /// Admin override for a market that never leaves FROZEN with a verified
  /// proof; the admin identity and reason are recorded in proof metadata
  /// (spec §4.4) and the caller is authorization-checked (resolved Open
  /// Question, `SPEC_FULL.md`).
  pub async fn force_resolve(
    &self,
    market_id: &MarketId,
    outcome: crate::lmsr::Outcome,
    admin: &AdminIdentity,
    reason: &str,
  ) -> CoreResult<()> {
    self.admins.authorize(admin)?;
    let mut metadata = HashMap::new();
    metadata.insert("admin_override".to_string(), admin.0.clone());
    metadata.insert("reason".to_string(), reason.to_string());
    let proof = Proof {
      outcome,
      timestamp: common::time::now(),
      signature: format!("admin-override:{}", admin.0),
      metadata,
    };
    self.apply_resolution(market_id, proof).await
  }

  async fn persist_and_broadcast(&self, market: &Market) -> CoreResult<()> {
    let snapshot = self.registry.snapshot_with_override(&market.id, market).await;
    self.store.save(&snapshot).await.map_err(CoreError::PersistenceFailure)?;
    self.broadcaster.publish(CoreEvent::MarketUpdate(Box::new(market.clone())));
    Ok(())
  }
}
