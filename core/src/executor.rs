//! Trade executor (component E, spec §4.3).

use common::time::now;
use uuid::Uuid;

use crate::broadcaster::{CoreEvent, EventBroadcaster};
use crate::error::{CoreError, CoreResult};
use crate::lifecycle;
use crate::lmsr::{self, Outcome};
use crate::market::{Address, MarketId, Trade, TradeId};
use crate::registry::MarketRegistry;
use crate::store::Store;

/// Default maximum tolerated slippage when the caller doesn't specify one.
pub const DEFAULT_MAX_SLIPPAGE: f64 = 0.05;

#[derive(Debug, Clone)]
pub struct TradeIntent {
  pub market_id: MarketId,
  pub user: Address,
  pub outcome: Outcome,
  pub amount: i128,
  pub max_slippage: Option<f64>,
}

pub struct TradeExecutor<'a> {
  pub registry: &'a MarketRegistry,
  pub store: &'a dyn Store,
  pub broadcaster: &'a EventBroadcaster,
}

impl<'a> TradeExecutor<'a> {
  pub fn new(registry: &'a MarketRegistry, store: &'a dyn Store, broadcaster: &'a EventBroadcaster) -> Self {
    Self { registry, store, broadcaster }
  }

  /// Steps 1-10 of spec §4.3, executed while holding the market's write
  /// lock for the full duration (persistence and broadcast included, per
  /// §5's "lock released only after the snapshot is durable" rule).
  pub async fn execute(&self, intent: TradeIntent) -> CoreResult<Trade> {
    if intent.amount <= 0 {
      return Err(CoreError::InvalidAmount);
    }

    let shared = self.registry.get(&intent.market_id)?;
    let mut market = shared.write().await;

    lifecycle::ensure_tradable(&market)?;

    let max_slippage = intent.max_slippage.unwrap_or(DEFAULT_MAX_SLIPPAGE);
    let price_before = lmsr::price(&market.amm, intent.outcome);

    let delta = lmsr::shares_for_cost(&market.amm, intent.outcome, intent.amount);
    let cost = lmsr::cost_of_buy(&market.amm, intent.outcome, delta);

    debug_assert!(cost <= intent.amount);
    debug_assert!(intent.amount - cost <= 1);

    lmsr::apply_buy(&mut market.amm, intent.outcome, delta);
    let price_after = lmsr::price(&market.amm, intent.outcome);
    let observed_slippage = lmsr::slippage(price_before, price_after);

    if observed_slippage > max_slippage {
      // Roll back the in-memory mutation; nothing was persisted yet.
      lmsr::apply_refund(&mut market.amm, intent.outcome, delta);
      return Err(CoreError::SlippageExceeded { observed: observed_slippage, max: max_slippage });
    }

    market.total_volume += cost;
    lifecycle::upsert_position(&mut market, &intent.user, intent.outcome, delta, cost);

    let trade = Trade {
      id: TradeId(Uuid::new_v4().to_string()),
      market_id: market.id.clone(),
      user: intent.user.clone(),
      outcome: intent.outcome,
      amount: cost,
      shares: delta,
      price_after,
      timestamp: now(),
    };
    market.trades.push(trade.clone());

    self.persist_and_broadcast(&market).await?;

    log::info!(
      "trade executed market={} user={} outcome={} cost={} shares={} price_after={:.6}",
      market.id,
      intent.user,
      intent.outcome,
      cost,
      delta,
      price_after
    );

    Ok(trade)
  }

  /// Early-exit refund entry point (spec §4.2 refund path), driven through
  /// the same market lock discipline as a trade.
  pub async fn refund(&self, market_id: &MarketId, user: &Address, outcome: Outcome) -> CoreResult<Trade> {
    let shared = self.registry.get(market_id)?;
    let mut market = shared.write().await;
    lifecycle::refund(&mut market, user, outcome, TradeId(Uuid::new_v4().to_string()))?;
    self.persist_and_broadcast(&market).await?;
    let trade = market.trades.last().cloned().expect("refund always appends a trade");
    Ok(trade)
  }

  async fn persist_and_broadcast(&self, market: &crate::market::Market) -> CoreResult<()> {
    let snapshot = self.registry.snapshot_with_override(&market.id, market).await;
    self.store.save(&snapshot).await.map_err(CoreError::PersistenceFailure)?;
    self.broadcaster.publish(CoreEvent::MarketUpdate(Box::new(market.clone())));
    Ok(())
  }
}
