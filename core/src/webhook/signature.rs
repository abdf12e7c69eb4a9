// escrow-core/src/webhook/signature.rs

//! Processor webhook signatures: header `t=<unix>,v1=<hex hmac>[,v1=...]`, where the
//! HMAC-SHA256 is computed over `"{t}.{raw body}"` with the endpoint secret.

use crate::error::CoreError;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
  #[error("Signature header is malformed")]
  MalformedHeader,
  #[error("Signature key is unusable")]
  InvalidKey,
  #[error("No signature in the header matches the payload")]
  Mismatch,
  #[error("Signature timestamp is {age_secs}s away from now")]
  OutsideTolerance { age_secs: i64 },
}

impl From<SignatureError> for CoreError {
  fn from(err: SignatureError) -> Self {
    CoreError::InvalidArgument(format!("Webhook signature rejected: {err}"))
  }
}

fn mac_for(secret: &str, timestamp: &str, payload: &[u8]) -> Result<Hmac<Sha256>, SignatureError> {
  let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidKey)?;
  mac.update(timestamp.as_bytes());
  mac.update(b".");
  mac.update(payload);
  Ok(mac)
}

/// Produces a header value for `payload`, as the processor would send it.
pub fn sign(payload: &[u8], secret: &str, timestamp: i64) -> Result<String, SignatureError> {
  let digest = mac_for(secret, &timestamp.to_string(), payload)?.finalize().into_bytes();
  Ok(format!("t={timestamp},v1={}", hex::encode(digest)))
}

pub fn verify_signature(
  payload: &[u8],
  header: &str,
  secret: &str,
  now: DateTime<Utc>,
  tolerance_secs: i64,
) -> Result<(), SignatureError> {
  let mut timestamp = None;
  let mut signatures = Vec::new();
  for part in header.split(',').map(str::trim) {
    if let Some(t) = part.strip_prefix("t=") {
      timestamp = Some(t);
    } else if let Some(v) = part.strip_prefix("v1=") {
      signatures.push(v);
    }
  }
  let timestamp = timestamp.ok_or(SignatureError::MalformedHeader)?;
  if signatures.is_empty() {
    return Err(SignatureError::MalformedHeader);
  }
  let issued_at: i64 = timestamp.parse().map_err(|_| SignatureError::MalformedHeader)?;

  let matched = signatures.iter().any(|candidate| {
    let Ok(expected) = hex::decode(candidate) else {
      return false;
    };
    mac_for(secret, timestamp, payload)
      .map(|mac| mac.verify_slice(&expected).is_ok())
      .unwrap_or(false)
  });
  if !matched {
    return Err(SignatureError::Mismatch);
  }

  let age_secs = now.timestamp() - issued_at;
  if age_secs.abs() > tolerance_secs {
    return Err(SignatureError::OutsideTolerance { age_secs });
  }
  Ok(())
}
