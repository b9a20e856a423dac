//! Lifecycle controller (component D, spec §4.2): transitions, payout, and
//! refund calculation. Pure functions over a `&mut Market`; callers hold the
//! per-market lock for the duration of the call (spec §5).

use std::collections::HashMap;

use common::time::now;

use crate::error::{CoreError, CoreResult};
use crate::lmsr::{self, Outcome};
use crate::market::{Address, Market, MarketStatus, Position, PositionKey, Trade, TradeId};

/// Fraction of `total_cost` an early-exit refund returns to the user; the
/// remainder (`penalty`) stays in `total_volume` (spec §4.2, open question in
/// §9 — implemented literally, not "fixed").
const REFUND_SHARE_NUM: i128 = 1;
const REFUND_SHARE_DEN: i128 = 4;

pub fn ensure_tradable(market: &Market) -> CoreResult<()> {
  if market.status != MarketStatus::Active {
    return Err(CoreError::MarketNotTradable(market.id.clone()));
  }
  Ok(())
}

fn transition(market: &mut Market, to: MarketStatus, from_allowed: &[MarketStatus]) -> CoreResult<()> {
  if !from_allowed.contains(&market.status) {
    return Err(CoreError::IllegalTransition {
      market_id: market.id.clone(),
      from: market.status.label(),
      to: to.label(),
    });
  }
  log::info!("market {} transitioning {} -> {}", market.id, market.status, to);
  market.status = to;
  Ok(())
}

pub fn freeze(market: &mut Market) -> CoreResult<()> {
  transition(market, MarketStatus::Frozen, &[MarketStatus::Active])
}

pub fn resolve(market: &mut Market, outcome: Outcome) -> CoreResult<()> {
  transition(market, MarketStatus::Resolved, &[MarketStatus::Frozen])?;
  market.winning_outcome = Some(outcome);
  market.resolved_at = Some(now());
  Ok(())
}

pub fn settle(market: &mut Market) -> CoreResult<()> {
  transition(market, MarketStatus::Settled, &[MarketStatus::Resolved])?;
  market.settled_at = Some(now());
  Ok(())
}

pub fn cancel(market: &mut Market) -> CoreResult<()> {
  transition(market, MarketStatus::Cancelled, &[MarketStatus::Active, MarketStatus::Frozen])
}

/// Winner-take-all payout per spec §4.2. Degenerates to a refund of
/// `total_cost` when the winning outcome has zero outstanding shares. Sum of
/// payouts never exceeds `total_volume`; the floor residue is retained, not
/// redistributed.
pub fn compute_payouts(market: &Market) -> HashMap<Address, i128> {
  let winning_outcome = match market.winning_outcome {
    Some(outcome) => outcome,
    None => return HashMap::new(),
  };

  let winning_shares_total: i128 = market
    .positions
    .iter()
    .filter(|(key, _)| key.outcome == winning_outcome)
    .map(|(_, position)| position.shares)
    .sum();

  let mut payouts: HashMap<Address, i128> = HashMap::new();

  if winning_shares_total == 0 {
    for (key, position) in market.positions.iter() {
      *payouts.entry(key.user.clone()).or_insert(0) += position.total_cost;
    }
    return payouts;
  }

  for (key, position) in market.positions.iter() {
    if key.outcome != winning_outcome || position.shares == 0 {
      continue;
    }
    let payout = (position.shares * market.total_volume) / winning_shares_total;
    *payouts.entry(key.user.clone()).or_insert(0) += payout;
  }
  payouts
}

/// Removes `(user, outcome)`'s position, returns its shares to the AMM pool,
/// records a negative-amount/negative-shares refund trade, and returns the
/// refunded amount actually paid out to the user. The penalty stays in
/// `total_volume` by construction (it is simply never subtracted).
pub fn refund(market: &mut Market, user: &Address, outcome: Outcome, trade_id: TradeId) -> CoreResult<i128> {
  ensure_tradable(market)?;
  let key = PositionKey { user: user.clone(), outcome };
  let position = market.positions.remove(&key).ok_or_else(|| CoreError::InsufficientPosition(market.id.clone()))?;

  let refund_amount = position.total_cost * REFUND_SHARE_NUM / REFUND_SHARE_DEN;

  lmsr::apply_refund(&mut market.amm, outcome, position.shares);
  let price_after = lmsr::price(&market.amm, outcome);

  market.trades.push(Trade {
    id: trade_id,
    market_id: market.id.clone(),
    user: user.clone(),
    outcome,
    amount: -refund_amount,
    shares: -position.shares,
    price_after,
    timestamp: now(),
  });

  Ok(refund_amount)
}

pub fn upsert_position(market: &mut Market, user: &Address, outcome: Outcome, shares_delta: i128, cost: i128) {
  let key = PositionKey { user: user.clone(), outcome };
  let position = market.positions.entry(key).or_insert(Position { shares: 0, total_cost: 0 });
  position.shares += shares_delta;
  position.total_cost += cost;
}
