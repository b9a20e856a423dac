//! The aggregate data model (spec §3): `Market`, `Trade`, positions, and the
//! lifecycle status enum.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fixed_point::{deserialize_micro, serialize_micro};
use crate::lmsr::{AmmState, Outcome};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct MarketId(pub String);

impl fmt::Display for MarketId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct Address(pub String);

impl fmt::Display for Address {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TradeId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppSessionId(pub String);

/// Lifecycle status. Transitions follow the DAG in spec §4.2; enforcement
/// lives in `lifecycle.rs`, not here — this type is pure data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketStatus {
  Active,
  Frozen,
  Resolved,
  Settled,
  Cancelled,
}

impl MarketStatus {
  pub fn label(self) -> &'static str {
    match self {
      MarketStatus::Active => "ACTIVE",
      MarketStatus::Frozen => "FROZEN",
      MarketStatus::Resolved => "RESOLVED",
      MarketStatus::Settled => "SETTLED",
      MarketStatus::Cancelled => "CANCELLED",
    }
  }
}

impl fmt::Display for MarketStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.label())
  }
}

/// One entry in a market's authoritative trade log. A negative `amount`/
/// `shares` pair denotes a refund (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
  pub id: TradeId,
  pub market_id: MarketId,
  pub user: Address,
  pub outcome: Outcome,
  #[serde(serialize_with = "serialize_micro", deserialize_with = "deserialize_micro")]
  pub amount: i128,
  #[serde(serialize_with = "serialize_micro", deserialize_with = "deserialize_micro")]
  pub shares: i128,
  pub price_after: f64,
  pub timestamp: DateTime<Utc>,
}

/// A user's unsettled holding of one outcome in one market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
  #[serde(serialize_with = "serialize_micro", deserialize_with = "deserialize_micro")]
  pub shares: i128,
  #[serde(serialize_with = "serialize_micro", deserialize_with = "deserialize_micro")]
  pub total_cost: i128,
}

/// Typed compound key `(user, outcome)`. Deliberately not a concatenated
/// string (spec §9 flags the source's `"address_outcome"` string-key pattern
/// as fragile).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionKey {
  pub user: Address,
  pub outcome: Outcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
  pub id: MarketId,
  pub question: String,
  pub description: String,
  pub creator: Address,
  pub created_at: DateTime<Utc>,
  pub end_time: DateTime<Utc>,
  pub status: MarketStatus,
  pub amm: AmmState,
  #[serde(serialize_with = "serialize_micro", deserialize_with = "deserialize_micro")]
  pub total_volume: i128,
  pub trades: Vec<Trade>,
  pub positions: HashMap<PositionKey, Position>,
  pub winning_outcome: Option<Outcome>,
  pub resolved_at: Option<DateTime<Utc>>,
  pub settled_at: Option<DateTime<Utc>>,
  pub channel_id: ChannelId,
  pub app_session_id: AppSessionId,
}

impl Market {
  pub fn position(&self, user: &Address, outcome: Outcome) -> Option<&Position> {
    self.positions.get(&PositionKey { user: user.clone(), outcome })
  }

  /// Every participant address holding a non-zero position, deduplicated,
  /// sorted ascending — the order §4.5/§6 require for settlement encoding.
  pub fn participant_addresses_sorted(&self) -> Vec<Address> {
    let mut addrs: Vec<Address> = self.positions.keys().map(|k| k.user.clone()).collect();
    addrs.sort();
    addrs.dedup();
    addrs
  }

  pub fn participant_count(&self) -> usize {
    self.participant_addresses_sorted().len()
  }
}

/// Per-creator liquidity locked across all markets they created (spec §3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LockedLiquidity {
  balances: HashMap<Address, i128>,
}

impl LockedLiquidity {
  pub fn get(&self, address: &Address) -> i128 {
    self.balances.get(address).copied().unwrap_or(0)
  }

  pub fn lock(&mut self, address: &Address, amount: i128) {
    *self.balances.entry(address.clone()).or_insert(0) += amount;
  }

  pub fn release(&mut self, address: &Address, amount: i128) {
    let entry = self.balances.entry(address.clone()).or_insert(0);
    *entry -= amount;
    if *entry < 0 {
      *entry = 0;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn participant_addresses_are_sorted_and_deduped() {
    let mut positions = HashMap::new();
    positions.insert(
      PositionKey { user: Address("0xb".into()), outcome: Outcome::Yes },
      Position { shares: 1, total_cost: 1 },
    );
    positions.insert(
      PositionKey { user: Address("0xa".into()), outcome: Outcome::No },
      Position { shares: 1, total_cost: 1 },
    );
    positions.insert(
      PositionKey { user: Address("0xa".into()), outcome: Outcome::Yes },
      Position { shares: 1, total_cost: 1 },
    );
    let market = Market {
      id: MarketId("m".into()),
      question: "?".into(),
      description: "".into(),
      creator: Address("0xc".into()),
      created_at: Utc::now(),
      end_time: Utc::now(),
      status: MarketStatus::Active,
      amm: AmmState::new(1_000_000),
      total_volume: 0,
      trades: vec![],
      positions,
      winning_outcome: None,
      resolved_at: None,
      settled_at: None,
      channel_id: ChannelId("c".into()),
      app_session_id: AppSessionId("s".into()),
    };
    assert_eq!(
      market.participant_addresses_sorted(),
      vec![Address("0xa".into()), Address("0xb".into())]
    );
  }

  #[test]
  fn locked_liquidity_never_goes_negative() {
    let mut locked = LockedLiquidity::default();
    let addr = Address("0xa".into());
    locked.lock(&addr, 100);
    locked.release(&addr, 500);
    assert_eq!(locked.get(&addr), 0);
  }
}
