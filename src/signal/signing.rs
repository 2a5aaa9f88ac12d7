//! Authenticated ack signing.
//!
//! Acks are signed with HMAC-SHA256 over
//! `(coordinator_id, signal_id, timestamp, iteration)` using a secret all
//! coordinators share out-of-band. This is the authenticated counterpart
//! to the consensus evaluator's unkeyed vote hash: an ack signature cannot
//! be forged without the secret, and verification always uses a
//! constant-time comparison.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::types::SignalAck;
use super::{SignalError, SignalResult};

type HmacSha256 = Hmac<Sha256>;

/// Signs and verifies acks with a shared secret.
#[derive(Clone)]
pub struct AckSigner {
    secret: Vec<u8>,
}

impl std::fmt::Debug for AckSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AckSigner").finish_non_exhaustive()
    }
}

impl AckSigner {
    /// Create a signer. Fails fast on an empty secret — the protocol is
    /// meaningless without one shared by all coordinators.
    pub fn new(secret: impl AsRef<[u8]>) -> SignalResult<Self> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(SignalError::MissingSecret);
        }
        Ok(Self {
            secret: secret.to_vec(),
        })
    }

    /// Hex HMAC over the signed ack fields.
    pub fn sign(
        &self,
        coordinator_id: &str,
        signal_id: &str,
        timestamp: DateTime<Utc>,
        iteration: u32,
    ) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("hmac accepts any key length");
        mac.update(canonical_message(coordinator_id, signal_id, timestamp, iteration).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Re-verify an ack's signature in constant time.
    pub fn verify(&self, ack: &SignalAck) -> bool {
        let expected = self.sign(
            &ack.coordinator_id,
            &ack.signal_id,
            ack.timestamp,
            ack.iteration,
        );
        let (Ok(expected), Ok(actual)) = (hex::decode(expected), hex::decode(&ack.signature))
        else {
            return false;
        };
        if expected.len() != actual.len() {
            return false;
        }
        expected.ct_eq(&actual).into()
    }
}

fn canonical_message(
    coordinator_id: &str,
    signal_id: &str,
    timestamp: DateTime<Utc>,
    iteration: u32,
) -> String {
    format!(
        "{coordinator_id}:{signal_id}:{}:{iteration}",
        timestamp.timestamp_millis()
    )
}
