use chrono::{DateTime, Utc};

/// Wall-clock "now", isolated behind one function so callers never sprinkle
/// `Utc::now()` ad hoc and so tests can see where real time enters the system.
pub fn now() -> DateTime<Utc> {
  Utc::now()
}

/// True once `deadline` has passed relative to `now`.
pub fn has_elapsed(deadline: DateTime<Utc>, now: DateTime<Utc>) -> bool {
  now >= deadline
}
