use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use prediction_core::{
  admin::{AdminIdentity, AdminRegistry},
  broadcaster::EventBroadcaster,
  channel_client::NullChannelClient,
  executor::TradeIntent,
  facade::CreateMarketRequest,
  lmsr::Outcome,
  market::{Address, AppSessionId, ChannelId},
  oracle::MockOracle,
  registry::MarketRegistry,
  resolution::{ResolutionConfig, ResolutionEngine},
  settlement::SettlementCoordinator,
  store::{JsonFileStore, Store},
  MarketEngine,
};

use crate::config::EngineConfig;

/// Composition root: owns every adapter the core depends on and the
/// background workers that drive resolution and settlement forward.
pub struct ExchangeService {
  config: EngineConfig,
  engine: Arc<MarketEngine>,
  resolution: Arc<ResolutionEngine>,
}

impl ExchangeService {
  pub async fn new(config: EngineConfig) -> anyhow::Result<Self> {
    let registry = Arc::new(MarketRegistry::new());
    let store: Arc<dyn Store> = Arc::new(JsonFileStore::new(config.snapshot_path.clone()));
    let broadcaster = Arc::new(EventBroadcaster::new());
    let channel_client = Arc::new(NullChannelClient);
    let oracle = Arc::new(MockOracle::new("engine-mock-oracle"));

    let existing = store.load().await?;
    for market in existing.markets {
      log::info!("restored market {} from snapshot in status {}", market.id, market.status);
      registry.insert(market);
    }

    let admins = Arc::new(AdminRegistry::new([AdminIdentity(config.admin_identity.clone())]));

    let resolution = Arc::new(ResolutionEngine::new(
      registry.clone(),
      oracle.clone(),
      store.clone(),
      broadcaster.clone(),
      admins.clone(),
      ResolutionConfig {
        check_interval: std::time::Duration::from_secs(config.check_interval_seconds),
        auto_freeze: config.auto_freeze,
        auto_resolve: config.auto_resolve,
        require_manual_approval: config.require_manual_approval,
      },
    ));

    let settlement =
      Arc::new(SettlementCoordinator::new(registry.clone(), store.clone(), broadcaster.clone(), channel_client.clone()));

    let engine = Arc::new(MarketEngine {
      registry,
      store,
      broadcaster,
      channel_client,
      oracle,
      admins,
      resolution: resolution.clone(),
      settlement,
      default_max_slippage: config.default_max_slippage,
    });

    Ok(Self { config, engine, resolution })
  }

  /// Spawns the resolution worker and runs a representative end-to-end
  /// demo scenario (creation, a trade from each side, freeze, admin
  /// override resolution) before handing control to the caller's shutdown
  /// signal. A real deployment would drop the demo and just await `ctrl_c`.
  pub async fn start(&mut self) -> anyhow::Result<()> {
    let resolution = self.resolution.clone();
    tokio::spawn(async move {
      log::info!("resolution worker started");
      resolution.run().await;
    });

    self.run_demo_scenario().await?;

    log::info!("engine running, awaiting shutdown signal");
    tokio::signal::ctrl_c().await?;
    log::info!("shutdown signal received");
    Ok(())
  }

  async fn run_demo_scenario(&self) -> anyhow::Result<()> {
    let mut subscriber = self.engine.broadcaster.subscribe();
    tokio::spawn(async move {
      while let Ok(event) = subscriber.recv().await {
        log::debug!("broadcast event: {event:?}");
      }
    });

    let market_id = self
      .engine
      .create_market(CreateMarketRequest {
        question: "Will the demo market resolve YES?".to_string(),
        description: "Seeded at startup to exercise the full lifecycle.".to_string(),
        duration_seconds: 1,
        initial_liquidity: 1_000_000_000,
        creator: Address("0xdemo-creator".to_string()),
        channel_id: ChannelId(uuid::Uuid::new_v4().to_string()),
        app_session_id: AppSessionId(uuid::Uuid::new_v4().to_string()),
      })
      .await?;

    self
      .engine
      .execute_trade(TradeIntent {
        market_id: market_id.clone(),
        user: Address("0xdemo-yes".to_string()),
        outcome: Outcome::Yes,
        amount: 200_000_000,
        max_slippage: None,
      })
      .await?;
    self
      .engine
      .execute_trade(TradeIntent {
        market_id: market_id.clone(),
        user: Address("0xdemo-no".to_string()),
        outcome: Outcome::No,
        amount: 150_000_000,
        max_slippage: None,
      })
      .await?;

    let admin = AdminIdentity(self.config.admin_identity.clone());
    self.engine.freeze_market(&market_id, &admin).await?;
    self
      .engine
      .force_resolve(&market_id, Outcome::Yes, &admin, "demo scenario seeded outcome")
      .await?;

    let deadline = common::time::now() + ChronoDuration::seconds(self.config.signature_deadline_seconds);
    self.engine.settlement.request(&market_id, deadline, 1).await?;

    log::info!(
      "demo market {market_id} resolved; signature collection window open for {}s",
      self.config.signature_deadline_seconds
    );
    Ok(())
  }
}
