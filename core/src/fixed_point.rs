//! Fixed-point conversion between external decimal amounts and the internal
//! integer micro-unit representation used everywhere money or shares cross a
//! component boundary (component A, spec §4.1).

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Six-decimal scaling: an external `1.0` is stored internally as `1_000_000`.
pub const MICRO_SCALE: i128 = 1_000_000;

/// `floor(x * 1e6)`. Scaling happens exactly once, at ingress.
pub fn to_micro(x: f64) -> i128 {
  (x * MICRO_SCALE as f64).floor() as i128
}

/// `n / 1e6`, for display only — never round-trip money through this.
pub fn from_micro(n: i128) -> f64 {
  n as f64 / MICRO_SCALE as f64
}

/// Serializes an `i128` as a decimal string so that values beyond 2^53 survive
/// a JSON round trip exactly (spec §6, §9).
pub fn serialize_micro<S: Serializer>(value: &i128, serializer: S) -> Result<S::Ok, S::Error> {
  serializer.serialize_str(&value.to_string())
}

pub fn deserialize_micro<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i128, D::Error> {
  let raw = String::deserialize(deserializer)?;
  raw.parse::<i128>().map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn scales_without_drift() {
    assert_eq!(to_micro(1.0), 1_000_000);
    assert_eq!(to_micro(1000.0), 1_000_000_000);
    assert_eq!(to_micro(0.000001), 1);
  }

  #[test]
  fn floors_rather_than_rounds() {
    assert_eq!(to_micro(1.0000009), 1_000_000);
  }

  #[test]
  fn round_trips_display_value() {
    assert!((from_micro(1_000_000_000) - 1000.0).abs() < 1e-9);
  }
}
