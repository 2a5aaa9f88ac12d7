//! Signal and ack wire types, ID validation, and store key schema.

use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{SignalError, SignalResult};

/// Allow-list for anything interpolated into a store key: alphanumeric,
/// `-` and `_`, at most 64 characters. Rejecting everything else prevents
/// key injection.
pub fn validate_id(id: &str) -> SignalResult<()> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("static regex"));
    if pattern.is_match(id) {
        Ok(())
    } else {
        Err(SignalError::InvalidId { id: id.to_string() })
    }
}

/// Store key schema used by the protocol.
pub mod keys {
    /// Latest signal addressed to a receiver.
    pub fn signal(receiver_id: &str) -> String {
        format!("signal:{receiver_id}")
    }

    /// Ack written by one coordinator for one signal.
    pub fn ack(coordinator_id: &str, signal_id: &str) -> String {
        format!("ack:{coordinator_id}:{signal_id}")
    }

    /// Idempotency record for a sent message.
    pub fn idempotency(message_id: &str) -> String {
        format!("idempotency:{message_id}")
    }

    /// One recorded retry attempt for a failed acknowledge.
    pub fn retry(signal_id: &str, attempt: u32) -> String {
        format!("retry:{signal_id}:{attempt}")
    }
}

/// A cross-coordinator signal, written once by its sender.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub signal_id: String,
    pub signal_type: String,
    pub source: String,
    pub targets: Vec<String>,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    /// Iteration the sender was in when it signalled.
    pub iteration: u32,
}

/// Acknowledgment of a signal by one coordinator.
///
/// Signed with the shared-secret HMAC; idempotent per
/// `(coordinator_id, signal_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalAck {
    pub coordinator_id: String,
    pub signal_id: String,
    pub timestamp: DateTime<Utc>,
    pub iteration: u32,
    pub signature: String,
    pub status: String,
}

/// Outcome of a send: the derived message id and whether the idempotency
/// record already existed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendOutcome {
    pub message_id: String,
    pub is_duplicate: bool,
}

/// Outcome of waiting for acks from a set of coordinators.
#[derive(Debug, Clone)]
pub struct AckWaitResult {
    /// Verified acks collected before the deadline.
    pub received: HashMap<String, SignalAck>,
    /// Coordinators that never produced a verifiable ack.
    pub missing: Vec<String>,
}

impl AckWaitResult {
    /// Whether every requested coordinator acked in time.
    pub fn complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// One recorded retry attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryAttempt {
    pub signal_id: String,
    pub attempt: u32,
    pub succeeded: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}
