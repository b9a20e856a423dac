//! `MarketEngine`: the single facade that exposes every admin/query entry
//! point named in spec §6. HTTP/CLI bindings are peripheral (spec §1) — this
//! is the surface `engine`'s `main.rs` calls directly, the way the teacher's
//! binaries call straight into their domain structs rather than through a
//! network boundary.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use uuid::Uuid;

use crate::admin::{AdminIdentity, AdminRegistry};
use crate::broadcaster::EventBroadcaster;
use crate::channel_client::ChannelClient;
use crate::error::{CoreError, CoreResult};
use crate::executor::{TradeExecutor, TradeIntent};
use crate::lifecycle::{self, compute_payouts};
use crate::lmsr::{self, AmmState, Outcome};
use crate::market::{Address, AppSessionId, ChannelId, Market, MarketId, MarketStatus, Position, Trade};
use crate::oracle::{Oracle, Proof};
use crate::registry::MarketRegistry;
use crate::resolution::ResolutionEngine;
use crate::settlement::SettlementCoordinator;
use crate::store::Store;

pub struct CreateMarketRequest {
  pub question: String,
  pub description: String,
  pub duration_seconds: i64,
  pub initial_liquidity: i128,
  pub creator: Address,
  pub channel_id: ChannelId,
  pub app_session_id: AppSessionId,
}

pub struct MarketEngine {
  pub registry: Arc<MarketRegistry>,
  pub store: Arc<dyn Store>,
  pub broadcaster: Arc<EventBroadcaster>,
  pub channel_client: Arc<dyn ChannelClient>,
  pub oracle: Arc<dyn Oracle>,
  pub admins: Arc<AdminRegistry>,
  pub resolution: Arc<ResolutionEngine>,
  pub settlement: Arc<SettlementCoordinator>,
  pub default_max_slippage: f64,
}

impl MarketEngine {
  // ---- admin entry points (spec §6) ----------------------------------

  pub async fn create_market(&self, request: CreateMarketRequest) -> CoreResult<MarketId> {
    if request.initial_liquidity <= 0 {
      return Err(CoreError::InvalidAmount);
    }
    self.channel_client.open_channel(request.initial_liquidity).await.map_err(CoreError::PersistenceFailure)?;

    let now = common::time::now();
    let market = Market {
      id: MarketId(Uuid::new_v4().to_string()),
      question: request.question,
      description: request.description,
      creator: request.creator.clone(),
      created_at: now,
      end_time: now + ChronoDuration::seconds(request.duration_seconds),
      status: MarketStatus::Active,
      amm: AmmState::new(request.initial_liquidity),
      total_volume: 0,
      trades: vec![],
      positions: HashMap::new(),
      winning_outcome: None,
      resolved_at: None,
      settled_at: None,
      channel_id: request.channel_id,
      app_session_id: request.app_session_id,
    };

    let id = market.id.clone();
    self.registry.insert(market.clone());
    self.registry.lock_liquidity(&request.creator, request.initial_liquidity).await;

    let snapshot = self.registry.snapshot_with_override(&id, &market).await;
    self.store.save(&snapshot).await.map_err(CoreError::PersistenceFailure)?;
    self.broadcaster.publish(crate::broadcaster::CoreEvent::MarketUpdate(Box::new(market)));

    log::info!("market {id} created by {} with liquidity {}", request.creator, request.initial_liquidity);
    Ok(id)
  }

  pub async fn freeze_market(&self, market_id: &MarketId, authority: &AdminIdentity) -> CoreResult<()> {
    self.admins.authorize(authority)?;
    let shared = self.registry.get(market_id)?;
    let mut market = shared.write().await;
    lifecycle::freeze(&mut market)?;
    self.persist_and_broadcast(&market).await
  }

  /// `resolve_market { market_id, outcome, proof }`: an admin-supplied proof
  /// path, distinct from the resolution engine's own polling loop. Verified
  /// against the same oracle port.
  pub async fn resolve_market(&self, market_id: &MarketId, proof: Proof) -> CoreResult<()> {
    if !self.oracle.verify_proof(&proof).await {
      return Err(CoreError::OracleProofInvalid(market_id.clone()));
    }
    let shared = self.registry.get(market_id)?;
    let mut market = shared.write().await;
    lifecycle::resolve(&mut market, proof.outcome)?;
    self.persist_and_broadcast(&market).await
  }

  /// No-op (documented, not an error) if signature quorum has not yet been
  /// reached — `submit` already finalizes automatically at the moment
  /// quorum completes; this entry point exists for callers that want to
  /// explicitly confirm/trigger that transition.
  pub async fn settle_market(&self, market_id: &MarketId) -> CoreResult<()> {
    if self.settlement.is_ready(market_id).await {
      self.settlement.finalize_if_ready(market_id).await
    } else {
      log::debug!("settle_market called for {market_id} before quorum; no-op");
      Ok(())
    }
  }

  pub async fn cancel_market(&self, market_id: &MarketId, authority: &AdminIdentity, reason: &str) -> CoreResult<()> {
    self.admins.authorize(authority)?;
    let shared = self.registry.get(market_id)?;
    let mut market = shared.write().await;
    lifecycle::cancel(&mut market)?;

    // Cancellation refunds all positions at cost (spec §4 Lifecycle). Locked
    // liquidity release is solely a settlement-path concern (spec §3); a
    // cancelled market's creator liquidity is not released here.
    market.positions.clear();

    log::info!("market {market_id} cancelled by {}: {reason}", authority.0);
    self.persist_and_broadcast(&market).await
  }

  pub async fn force_resolve(
    &self,
    market_id: &MarketId,
    outcome: Outcome,
    admin: &AdminIdentity,
    reason: &str,
  ) -> CoreResult<()> {
    self.resolution.force_resolve(market_id, outcome, admin, reason).await
  }

  // ---- trade path (spec §4.3) -----------------------------------------

  pub async fn execute_trade(&self, intent: TradeIntent) -> CoreResult<Trade> {
    let executor = TradeExecutor::new(&self.registry, self.store.as_ref(), &self.broadcaster);
    executor.execute(intent).await
  }

  pub async fn refund_position(&self, market_id: &MarketId, user: &Address, outcome: Outcome) -> CoreResult<Trade> {
    let executor = TradeExecutor::new(&self.registry, self.store.as_ref(), &self.broadcaster);
    executor.refund(market_id, user, outcome).await
  }

  // ---- query entry points (spec §6) -----------------------------------

  pub async fn list_active(&self) -> Vec<Market> {
    self.registry.list_all().await.into_iter().filter(|m| m.status == MarketStatus::Active).collect()
  }

  pub async fn get_market(&self, market_id: &MarketId) -> CoreResult<Market> {
    self.registry.snapshot(market_id).await
  }

  pub async fn get_user_positions(&self, user: &Address) -> CoreResult<Vec<(MarketId, Outcome, Position)>> {
    let mut out = vec![];
    for market in self.registry.list_all().await {
      for (key, position) in market.positions.iter() {
        if &key.user == user {
          out.push((market.id.clone(), key.outcome, position.clone()));
        }
      }
    }
    Ok(out)
  }

  pub async fn get_user_trades(&self, market_id: &MarketId, user: &Address) -> CoreResult<Vec<Trade>> {
    let market = self.registry.snapshot(market_id).await?;
    Ok(market.trades.into_iter().filter(|t| &t.user == user).collect())
  }

  pub async fn get_market_stats(&self, market_id: &MarketId) -> CoreResult<MarketStats> {
    let market = self.registry.snapshot(market_id).await?;
    Ok(MarketStats {
      total_volume: market.total_volume,
      trade_count: market.trades.len(),
      participant_count: market.participant_count(),
      price_yes: lmsr::price(&market.amm, Outcome::Yes),
      price_no: lmsr::price(&market.amm, Outcome::No),
      status: market.status,
    })
  }

  pub async fn get_locked_liquidity(&self, address: &Address) -> i128 {
    self.registry.locked_liquidity(address).await
  }

  pub async fn get_user_winnings(&self, market_id: &MarketId, user: &Address) -> CoreResult<i128> {
    let market = self.registry.snapshot(market_id).await?;
    let payouts = compute_payouts(&market);
    Ok(payouts.get(user).copied().unwrap_or(0))
  }

  async fn persist_and_broadcast(&self, market: &Market) -> CoreResult<()> {
    let snapshot = self.registry.snapshot_with_override(&market.id, market).await;
    self.store.save(&snapshot).await.map_err(CoreError::PersistenceFailure)?;
    self.broadcaster.publish(crate::broadcaster::CoreEvent::MarketUpdate(Box::new(market.clone())));
    Ok(())
  }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MarketStats {
  pub total_volume: i128,
  pub trade_count: usize,
  pub participant_count: usize,
  pub price_yes: f64,
  pub price_no: f64,
  pub status: MarketStatus,
}
