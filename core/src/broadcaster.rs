//! Event broadcaster (component H, spec §4.6): fans out authoritative state
//! snapshots to subscribers, best-effort. A dropped/lagged subscriber never
//! blocks a producer — lag is logged and the subscriber simply skips ahead.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::market::{Market, MarketId};
use crate::settlement::SignatureProgress;

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CoreEvent {
  MarketUpdate(Box<Market>),
  SignatureRequest { market_id: MarketId, state_hash: String, deadline: chrono::DateTime<chrono::Utc> },
  SignatureProgress(SignatureProgress),
  SignatureRequestCancelled { market_id: MarketId, reason: String },
}

pub struct EventBroadcaster {
  sender: broadcast::Sender<CoreEvent>,
}

impl Default for EventBroadcaster {
  fn default() -> Self {
    Self::new()
  }
}

impl EventBroadcaster {
  pub fn new() -> Self {
    let (sender, _receiver) = broadcast::channel(CHANNEL_CAPACITY);
    Self { sender }
  }

  pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
    self.sender.subscribe()
  }

  /// Enqueues `event` to the broadcaster's internal buffer and returns. Per
  /// spec §5, the caller's mutation is considered committed once this
  /// returns — it does not wait for subscribers to actually receive it.
  /// Publish failures (no subscribers) are swallowed but logged (§7, §4.9).
  pub fn publish(&self, event: CoreEvent) {
    if let Err(err) = self.sender.send(event) {
      log::debug!("broadcast had no subscribers: {err}");
    }
  }
}
