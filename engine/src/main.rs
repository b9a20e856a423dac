use crate::config::EngineConfig;
use crate::service::ExchangeService;

mod config;
mod service;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  dotenv::dotenv().ok();
  common::logger::init_logger();

  let config = EngineConfig::read()?;
  let mut service = ExchangeService::new(config).await?;
  service.start().await?;

  Ok(())
}
