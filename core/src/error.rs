use thiserror::Error;

use crate::market::MarketId;

pub type CoreResult<T = ()> = Result<T, CoreError>;

/// Exhaustive error taxonomy for the core. Every public operation maps its
/// failures onto one of these variants; nothing escapes as a bare `String`.
#[derive(Debug, Error)]
pub enum CoreError {
  #[error("market `{0}` not found")]
  MarketNotFound(MarketId),

  #[error("market `{0}` is not tradable in its current status")]
  MarketNotTradable(MarketId),

  #[error("market `{0}` is already resolved")]
  MarketAlreadyResolved(MarketId),

  #[error("illegal lifecycle transition for market `{0}`: {from} -> {to}")]
  IllegalTransition { market_id: MarketId, from: &'static str, to: &'static str },

  #[error("invalid trade amount")]
  InvalidAmount,

  #[error("invalid outcome")]
  InvalidOutcome,

  #[error("position not found or insufficient for `{0}`")]
  InsufficientPosition(MarketId),

  #[error("slippage {observed:.6} exceeds maximum {max:.6}")]
  SlippageExceeded { observed: f64, max: f64 },

  #[error("oracle unavailable: {0}")]
  OracleUnavailable(String),

  #[error("oracle proof failed verification for market `{0}`")]
  OracleProofInvalid(MarketId),

  #[error("signature does not recover to the claimed signer")]
  SignatureInvalid,

  #[error("signature collection deadline has passed")]
  SignatureDeadlineExpired,

  #[error("signer `{0}` is not part of the required signer set")]
  SignerNotRequired(String),

  #[error("signer `{0}` already submitted a signature")]
  SignerAlreadyResponded(String),

  #[error("no pending signature request for market `{0}`")]
  NoSignatureRequest(MarketId),

  #[error("persistence failure: {0}")]
  PersistenceFailure(#[from] anyhow::Error),

  #[error("authorization denied: {0}")]
  AuthorizationDenied(String),
}
