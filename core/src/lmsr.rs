//! Logarithmic Market Scoring Rule engine (component B, spec §4.1).
//!
//! All monetary/share quantities here are integer micro-units. Prices are
//! doubles, used only for display and slippage checks — never compared to
//! money, never round-tripped through money.

use serde::{Deserialize, Serialize};

/// A platform-safe bound on the exponent passed to `f64::exp`. Beyond this the
/// market is treated as degenerate (price saturated to {0,1}) rather than
/// letting the exponential overflow to infinity.
const EXPONENT_CLAMP: f64 = 700.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
  Yes,
  No,
}

impl Outcome {
  pub fn opposite(self) -> Outcome {
    match self {
      Outcome::Yes => Outcome::No,
      Outcome::No => Outcome::Yes,
    }
  }
}

impl std::fmt::Display for Outcome {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Outcome::Yes => write!(f, "YES"),
      Outcome::No => write!(f, "NO"),
    }
  }
}

/// The AMM half of a market: the immutable liquidity parameter `b` and the
/// monotonically non-decreasing (under buys) outstanding share counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmmState {
  /// Liquidity parameter, set at creation, never mutated (spec invariant 6).
  pub b: i128,
  pub shares_yes: i128,
  pub shares_no: i128,
}

impl AmmState {
  pub fn new(b: i128) -> Self {
    Self { b, shares_yes: 0, shares_no: 0 }
  }

  fn shares_of(&self, outcome: Outcome) -> i128 {
    match outcome {
      Outcome::Yes => self.shares_yes,
      Outcome::No => self.shares_no,
    }
  }

  fn shares_mut(&mut self, outcome: Outcome) -> &mut i128 {
    match outcome {
      Outcome::Yes => &mut self.shares_yes,
      Outcome::No => &mut self.shares_no,
    }
  }

  /// True if either outcome's ratio `q/b` would need clamping at the current
  /// state — the market has saturated to a {0,1} price.
  pub fn is_degenerate(&self) -> bool {
    raw_ratio(self.shares_yes, self.b).abs() > EXPONENT_CLAMP
      || raw_ratio(self.shares_no, self.b).abs() > EXPONENT_CLAMP
  }
}

fn raw_ratio(q: i128, b: i128) -> f64 {
  q as f64 / b as f64
}

fn clamped_ratio(q: i128, b: i128) -> f64 {
  raw_ratio(q, b).clamp(-EXPONENT_CLAMP, EXPONENT_CLAMP)
}

/// Numerically stable `log(exp(a) + exp(b))` via the standard log-sum-exp
/// shift: `m + log(exp(a-m) + exp(b-m))`, `m = max(a,b)`.
fn log_sum_exp(a: f64, b: f64) -> f64 {
  let m = a.max(b);
  m + ((a - m).exp() + (b - m).exp()).ln()
}

fn cost_f64(b: i128, shares_yes: i128, shares_no: i128) -> f64 {
  let ratio_yes = clamped_ratio(shares_yes, b);
  let ratio_no = clamped_ratio(shares_no, b);
  b as f64 * log_sum_exp(ratio_yes, ratio_no)
}

/// `C(q_Y, q_N) = b * log(exp(q_Y/b) + exp(q_N/b))`, rounded to the nearest
/// micro-unit.
pub fn cost(amm: &AmmState) -> i128 {
  cost_f64(amm.b, amm.shares_yes, amm.shares_no).round() as i128
}

/// Marginal cost of buying `delta` additional shares of `outcome`:
/// `C(q + delta*e_o) - C(q)`.
pub fn cost_of_buy(amm: &AmmState, outcome: Outcome, delta: i128) -> i128 {
  if delta == 0 {
    return 0;
  }
  let before = cost_f64(amm.b, amm.shares_yes, amm.shares_no);
  let (yes, no) = match outcome {
    Outcome::Yes => (amm.shares_yes + delta, amm.shares_no),
    Outcome::No => (amm.shares_yes, amm.shares_no + delta),
  };
  let after = cost_f64(amm.b, yes, no);
  (after - before).round() as i128
}

/// `price(o) = exp(q_o/b) / (exp(q_Y/b) + exp(q_N/b))`, computed via the
/// stabilized form. `price(YES)` is computed directly; `price(NO)` is derived
/// as `1 - price(YES)` so the two always sum to exactly 1.0.
pub fn price(amm: &AmmState, outcome: Outcome) -> f64 {
  let ratio_yes = clamped_ratio(amm.shares_yes, amm.b);
  let ratio_no = clamped_ratio(amm.shares_no, amm.b);
  let m = ratio_yes.max(ratio_no);
  let exp_yes = (ratio_yes - m).exp();
  let exp_no = (ratio_no - m).exp();
  let price_yes = exp_yes / (exp_yes + exp_no);
  match outcome {
    Outcome::Yes => price_yes,
    Outcome::No => 1.0 - price_yes,
  }
}

/// Largest integer `delta >= 0` such that `cost_of_buy(amm, outcome, delta) <=
/// target_cost`, found by monotone bisection. `cost_of_buy` is non-decreasing
/// and convex in `delta` with slope bounded by 1 (the marginal price never
/// exceeds 1.0), so `target_cost` itself is always a safe upper bound on the
/// answer; the `4x` multiplier below is slack for rounding at the saturated
/// extreme, not a correctness requirement.
pub fn shares_for_cost(amm: &AmmState, outcome: Outcome, target_cost: i128) -> i128 {
  if target_cost <= 0 {
    return 0;
  }
  let mut lo: i128 = 0;
  let mut hi: i128 = target_cost.saturating_mul(4).max(1);
  while cost_of_buy(amm, outcome, hi) <= target_cost {
    hi = hi.saturating_mul(2);
  }
  while hi - lo > 1 {
    let mid = lo + (hi - lo) / 2;
    if cost_of_buy(amm, outcome, mid) <= target_cost {
      lo = mid;
    } else {
      hi = mid;
    }
  }
  lo
}

/// `|price_after - price_before|` for the outcome being traded.
pub fn slippage(price_before: f64, price_after: f64) -> f64 {
  (price_after - price_before).abs()
}

/// Applies a buy of `delta` shares of `outcome` in place. Callers are
/// expected to have already validated `delta >= 0`.
pub fn apply_buy(amm: &mut AmmState, outcome: Outcome, delta: i128) {
  *amm.shares_mut(outcome) += delta;
}

/// Returns shares to the pool on refund (the inverse of `apply_buy`).
pub fn apply_refund(amm: &mut AmmState, outcome: Outcome, delta: i128) {
  *amm.shares_mut(outcome) -= delta;
}

pub fn shares_outstanding(amm: &AmmState, outcome: Outcome) -> i128 {
  amm.shares_of(outcome)
}
