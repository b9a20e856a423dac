//! Channel-client port (spec §6): opaque to the core. The trade path never
//! calls any of these; only market creation and settlement touch them, and
//! only to record/release locked liquidity — the actual transfer messages
//! and authentication handshake are the out-of-scope state-channel SDK's
//! job (spec §1).

use async_trait::async_trait;

use crate::market::{Address, ChannelId};

#[async_trait]
pub trait ChannelClient: Send + Sync {
  async fn open_channel(&self, amount: i128) -> anyhow::Result<ChannelId>;
  async fn resize(&self, channel_id: &ChannelId, amount_signed: i128) -> anyhow::Result<()>;
  async fn transfer(&self, channel_id: &ChannelId, dest: &Address, amount: i128) -> anyhow::Result<()>;
  async fn close(&self, channel_id: &ChannelId) -> anyhow::Result<()>;
}

/// In-process stand-in used by the engine binary's demo wiring and by tests.
/// A real adapter authenticates out-of-band against the state-channel
/// network; this one just hands back deterministic ids.
pub struct NullChannelClient;

#[async_trait]
impl ChannelClient for NullChannelClient {
  async fn open_channel(&self, _amount: i128) -> anyhow::Result<ChannelId> {
    Ok(ChannelId(uuid::Uuid::new_v4().to_string()))
  }

  async fn resize(&self, _channel_id: &ChannelId, _amount_signed: i128) -> anyhow::Result<()> {
    Ok(())
  }

  async fn transfer(&self, _channel_id: &ChannelId, _dest: &Address, _amount: i128) -> anyhow::Result<()> {
    Ok(())
  }

  async fn close(&self, _channel_id: &ChannelId) -> anyhow::Result<()> {
    Ok(())
  }
}
