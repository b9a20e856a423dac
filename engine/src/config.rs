//! Non-secret tunables come from a checked-in `config.yaml`; anything
//! environment-specific comes from the process environment. Mirrors the
//! split `baker`'s `BakerConfig` uses, just without a keypair to smuggle
//! through `serde`.

use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
struct YamlConfig {
  check_interval_seconds: u64,
  auto_freeze: bool,
  auto_resolve: bool,
  require_manual_approval: bool,
  default_max_slippage: f64,
  signature_deadline_seconds: i64,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
  pub check_interval_seconds: u64,
  pub auto_freeze: bool,
  pub auto_resolve: bool,
  pub require_manual_approval: bool,
  pub default_max_slippage: f64,
  pub signature_deadline_seconds: i64,
  pub snapshot_path: PathBuf,
  pub admin_identity: String,
}

impl EngineConfig {
  pub fn read() -> anyhow::Result<Self> {
    let dir = env!("CARGO_MANIFEST_DIR").to_string();
    let path = PathBuf::from_str(&format!("{dir}/config.yaml"))?;
    let contents = String::from_utf8(std::fs::read(path)?)?;
    let yaml: YamlConfig = serde_yaml::from_str(&contents)?;

    let snapshot_path = std::env::var("SNAPSHOT_PATH").unwrap_or_else(|_| "./market_snapshot.json".to_string());
    let admin_identity = std::env::var("ADMIN_IDENTITY").unwrap_or_else(|_| "default-admin".to_string());

    Ok(Self {
      check_interval_seconds: yaml.check_interval_seconds,
      auto_freeze: yaml.auto_freeze,
      auto_resolve: yaml.auto_resolve,
      require_manual_approval: yaml.require_manual_approval,
      default_max_slippage: yaml.default_max_slippage,
      signature_deadline_seconds: yaml.signature_deadline_seconds,
      snapshot_path: PathBuf::from(snapshot_path),
      admin_identity,
    })
  }
}
