use std::str::FromStr;

use log::LevelFilter;
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

/// Initializes the process-wide term logger. Level defaults to `Info` and can be
/// overridden with `RUST_LOG=debug` (or any other `log::LevelFilter` name).
pub fn init_logger() {
  let level = std::env::var("RUST_LOG")
    .ok()
    .and_then(|raw| LevelFilter::from_str(&raw).ok())
    .unwrap_or(LevelFilter::Info);

  TermLogger::init(level, Config::default(), TerminalMode::Mixed, ColorChoice::Auto)
    .expect("Failed to initialize logger");
}
