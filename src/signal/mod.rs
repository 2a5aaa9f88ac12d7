//! Cross-coordinator signal/ack protocol over the shared keyed store.

mod protocol;
mod signing;
mod types;

pub use protocol::SignalProtocol;
pub use signing::AckSigner;
pub use types::{
    keys, validate_id, AckWaitResult, RetryAttempt, SendOutcome, Signal, SignalAck,
};

use crate::store::StoreError;

/// Error type for protocol operations.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// An identifier failed the safe-character allow-list.
    #[error("invalid identifier '{id}': must match [A-Za-z0-9_-]{{1,64}}")]
    InvalidId { id: String },

    /// The signer was constructed without a shared secret.
    #[error("ack signing secret is missing — it must be shared out-of-band")]
    MissingSecret,

    /// A stored ack failed signature re-verification.
    #[error("ack signature verification failed for ({coordinator_id}, {signal_id}) — possible spoofing")]
    SignatureVerification {
        coordinator_id: String,
        signal_id: String,
    },

    /// The shared store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// All acknowledge retries failed.
    #[error("ack retry exhausted for '{signal_id}' after {attempts} attempts: {last_error}")]
    RetryExhausted {
        signal_id: String,
        attempts: u32,
        last_error: String,
    },
}

/// Result type for protocol operations.
pub type SignalResult<T> = Result<T, SignalError>;
