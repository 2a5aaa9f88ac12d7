//! The signal/ack handshake over the shared keyed store.
//!
//! Durable, idempotent, and verifiable: sends deduplicate through an
//! idempotency record, acks are HMAC-signed and idempotent per
//! `(coordinator_id, signal_id)`, and anything read back is re-verified
//! before it is trusted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SignalConfig;
use crate::events::{CoordinationEvent, SharedEventBus};
use crate::hooks::{LifecycleHooks, NoopHooks};
use crate::store::SharedKeyedStore;

use super::signing::AckSigner;
use super::types::{
    keys, validate_id, AckWaitResult, RetryAttempt, SendOutcome, Signal, SignalAck,
};
use super::{SignalError, SignalResult};

/// Cross-coordinator signal protocol.
pub struct SignalProtocol {
    store: SharedKeyedStore,
    signer: AckSigner,
    config: SignalConfig,
    hooks: Arc<dyn LifecycleHooks>,
    bus: Option<SharedEventBus>,
}

impl SignalProtocol {
    /// Create a protocol instance over a shared store.
    pub fn new(store: SharedKeyedStore, signer: AckSigner, config: SignalConfig) -> Self {
        Self {
            store,
            signer,
            config,
            hooks: Arc::new(NoopHooks),
            bus: None,
        }
    }

    /// Attach lifecycle hooks.
    pub fn with_hooks(mut self, hooks: Arc<dyn LifecycleHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Attach an event bus.
    pub fn with_bus(mut self, bus: SharedEventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Send a signal to one receiver.
    ///
    /// The message id is derived deterministically from the send tuple; a
    /// retried send that reuses its original timestamp hits the
    /// idempotency record and skips the write while still reporting
    /// success.
    pub async fn send_signal(
        &self,
        sender_id: &str,
        receiver_id: &str,
        signal_type: &str,
        iteration: u32,
        payload: Value,
    ) -> SignalResult<SendOutcome> {
        validate_id(sender_id)?;
        validate_id(receiver_id)?;
        validate_id(signal_type)?;

        let timestamp = Utc::now();
        let message_id = derive_message_id(
            sender_id,
            receiver_id,
            signal_type,
            iteration,
            timestamp.timestamp_millis(),
        );

        if self.store.exists(&keys::idempotency(&message_id)).await? {
            debug!(message_id, "duplicate send suppressed by idempotency record");
            self.publish_sent(&message_id, signal_type, sender_id, true);
            return Ok(SendOutcome {
                message_id,
                is_duplicate: true,
            });
        }

        let signal = Signal {
            signal_id: message_id.clone(),
            signal_type: signal_type.to_string(),
            source: sender_id.to_string(),
            targets: vec![receiver_id.to_string()],
            payload,
            timestamp,
            iteration,
        };
        let bytes = serde_json::to_vec(&signal)
            .map_err(|e| SignalError::Serialization(e.to_string()))?;

        self.store
            .set(&keys::signal(receiver_id), bytes, self.config.signal_ttl_secs)
            .await?;
        self.store
            .set(
                &keys::idempotency(&message_id),
                b"1".to_vec(),
                self.config.signal_ttl_secs,
            )
            .await?;

        info!(message_id, signal_type, sender_id, receiver_id, "signal sent");
        self.publish_sent(&message_id, signal_type, sender_id, false);

        Ok(SendOutcome {
            message_id,
            is_duplicate: false,
        })
    }

    /// Read the pending signal addressed to a receiver, if any.
    pub async fn pending_signal(&self, receiver_id: &str) -> SignalResult<Option<Signal>> {
        validate_id(receiver_id)?;
        match self.store.get(&keys::signal(receiver_id)).await? {
            Some(bytes) => {
                let signal = serde_json::from_slice(&bytes)
                    .map_err(|e| SignalError::Serialization(e.to_string()))?;
                Ok(Some(signal))
            }
            None => Ok(None),
        }
    }

    /// Acknowledge a signal before processing its payload.
    ///
    /// Idempotent per `(coordinator_id, signal_id)`: an existing ack is
    /// re-verified and returned as-is. A stored ack that fails
    /// verification is treated as a spoofing attempt and surfaced, never
    /// silently accepted.
    pub async fn acknowledge_signal(
        &self,
        coordinator_id: &str,
        signal: &Signal,
    ) -> SignalResult<SignalAck> {
        validate_id(coordinator_id)?;
        validate_id(&signal.signal_id)?;

        if let Err(e) = self
            .hooks
            .on_signal_received(coordinator_id, &signal.signal_id, &signal.signal_type)
            .await
        {
            warn!(coordinator_id, error = %e, "on_signal_received hook failed (ignored)");
        }

        let ack_key = keys::ack(coordinator_id, &signal.signal_id);
        if let Some(bytes) = self.store.get(&ack_key).await? {
            let existing: SignalAck = serde_json::from_slice(&bytes)
                .map_err(|e| SignalError::Serialization(e.to_string()))?;
            if !self.signer.verify(&existing) {
                return Err(SignalError::SignatureVerification {
                    coordinator_id: coordinator_id.to_string(),
                    signal_id: signal.signal_id.clone(),
                });
            }
            debug!(coordinator_id, signal_id = %signal.signal_id, "returning cached ack");
            self.publish_ack(coordinator_id, &signal.signal_id, true);
            return Ok(existing);
        }

        let timestamp = Utc::now();
        let ack = SignalAck {
            coordinator_id: coordinator_id.to_string(),
            signal_id: signal.signal_id.clone(),
            timestamp,
            iteration: signal.iteration,
            signature: self
                .signer
                .sign(coordinator_id, &signal.signal_id, timestamp, signal.iteration),
            status: "received".to_string(),
        };
        let bytes =
            serde_json::to_vec(&ack).map_err(|e| SignalError::Serialization(e.to_string()))?;
        self.store
            .set(&ack_key, bytes, self.config.ack_ttl_secs)
            .await?;

        info!(coordinator_id, signal_id = %signal.signal_id, "ack recorded");
        self.publish_ack(coordinator_id, &signal.signal_id, false);
        Ok(ack)
    }

    /// Poll for acks from a set of coordinators until all are present or
    /// `timeout` elapses. Unverifiable acks count as not received.
    pub async fn wait_for_acks(
        &self,
        waiter_id: &str,
        coordinator_ids: &[String],
        signal_id: &str,
        timeout: Duration,
    ) -> SignalResult<AckWaitResult> {
        validate_id(waiter_id)?;
        validate_id(signal_id)?;
        for id in coordinator_ids {
            validate_id(id)?;
        }

        if let Err(e) = self.hooks.on_blocking_start(waiter_id, signal_id).await {
            warn!(waiter_id, error = %e, "on_blocking_start hook failed (ignored)");
        }

        let started = Instant::now();
        let deadline = started + timeout;
        let poll = Duration::from_millis(self.config.poll_interval_ms);
        let mut received: HashMap<String, SignalAck> = HashMap::new();

        loop {
            for id in coordinator_ids {
                if received.contains_key(id) {
                    continue;
                }
                if let Some(bytes) = self.store.get(&keys::ack(id, signal_id)).await? {
                    match serde_json::from_slice::<SignalAck>(&bytes) {
                        Ok(ack) if self.signer.verify(&ack) => {
                            debug!(coordinator_id = %id, signal_id, "ack collected");
                            received.insert(id.clone(), ack);
                        }
                        Ok(_) => {
                            warn!(coordinator_id = %id, signal_id, "ack failed verification — ignored");
                        }
                        Err(e) => {
                            warn!(coordinator_id = %id, signal_id, error = %e, "unreadable ack — ignored");
                        }
                    }
                }
            }

            if received.len() == coordinator_ids.len() {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                let waited_ms = now.duration_since(started).as_millis() as u64;
                if let Err(e) = self
                    .hooks
                    .on_blocking_timeout(waiter_id, signal_id, waited_ms)
                    .await
                {
                    warn!(waiter_id, error = %e, "on_blocking_timeout hook failed (ignored)");
                }
                break;
            }
            tokio::time::sleep(poll.min(deadline - now)).await;
        }

        let missing: Vec<String> = coordinator_ids
            .iter()
            .filter(|id| !received.contains_key(*id))
            .cloned()
            .collect();
        if !missing.is_empty() {
            warn!(signal_id, ?missing, "ack wait ended with missing coordinators");
        }

        Ok(AckWaitResult { received, missing })
    }

    /// Explicit recovery path for a failed acknowledge: the first attempt
    /// runs immediately, fixed backoff delays apply between failures,
    /// each attempt recorded in the store, the final failure surfaced as
    /// [`SignalError::RetryExhausted`].
    pub async fn retry_failed_signal(
        &self,
        coordinator_id: &str,
        signal: &Signal,
    ) -> SignalResult<SignalAck> {
        let delays: Vec<Duration> = self
            .config
            .retry_delays_ms
            .iter()
            .map(|ms| Duration::from_millis(*ms))
            .collect();

        let mut last_error = String::new();
        for idx in 0..delays.len() {
            let attempt = idx as u32 + 1;
            if idx > 0 {
                tokio::time::sleep(delays[idx - 1]).await;
            }

            match self.acknowledge_signal(coordinator_id, signal).await {
                Ok(ack) => {
                    self.record_attempt(&signal.signal_id, attempt, true, None)
                        .await;
                    info!(signal_id = %signal.signal_id, attempt, "ack retry succeeded");
                    return Ok(ack);
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!(signal_id = %signal.signal_id, attempt, error = %last_error, "ack retry failed");
                    self.record_attempt(&signal.signal_id, attempt, false, Some(last_error.clone()))
                        .await;
                }
            }
        }

        Err(SignalError::RetryExhausted {
            signal_id: signal.signal_id.clone(),
            attempts: delays.len() as u32,
            last_error,
        })
    }

    /// Recorded retry attempts for a signal (diagnostic surface).
    pub async fn retry_history(&self, signal_id: &str) -> SignalResult<Vec<RetryAttempt>> {
        validate_id(signal_id)?;
        let prefix = format!("retry:{signal_id}:");
        let mut attempts = Vec::new();
        for key in self.store.keys_matching(&prefix).await? {
            if let Some(bytes) = self.store.get(&key).await? {
                if let Ok(attempt) = serde_json::from_slice::<RetryAttempt>(&bytes) {
                    attempts.push(attempt);
                }
            }
        }
        attempts.sort_by_key(|a| a.attempt);
        Ok(attempts)
    }

    async fn record_attempt(
        &self,
        signal_id: &str,
        attempt: u32,
        succeeded: bool,
        error: Option<String>,
    ) {
        let record = RetryAttempt {
            signal_id: signal_id.to_string(),
            attempt,
            succeeded,
            error,
            timestamp: Utc::now(),
        };
        let Ok(bytes) = serde_json::to_vec(&record) else {
            return;
        };
        // Bookkeeping only — a failure here must not mask the real outcome.
        if let Err(e) = self
            .store
            .set(&keys::retry(signal_id, attempt), bytes, self.config.ack_ttl_secs)
            .await
        {
            warn!(signal_id, attempt, error = %e, "failed to record retry attempt");
        }
    }

    fn publish_sent(&self, message_id: &str, signal_type: &str, source: &str, duplicate: bool) {
        if let Some(bus) = &self.bus {
            bus.publish(CoordinationEvent::SignalSent {
                message_id: message_id.to_string(),
                signal_type: signal_type.to_string(),
                source: source.to_string(),
                duplicate,
                timestamp: Utc::now(),
            });
        }
    }

    fn publish_ack(&self, coordinator_id: &str, signal_id: &str, cached: bool) {
        if let Some(bus) = &self.bus {
            bus.publish(CoordinationEvent::AckRecorded {
                coordinator_id: coordinator_id.to_string(),
                signal_id: signal_id.to_string(),
                cached,
                timestamp: Utc::now(),
            });
        }
    }
}

/// Deterministic message id over the send tuple.
fn derive_message_id(
    sender_id: &str,
    receiver_id: &str,
    signal_type: &str,
    iteration: u32,
    timestamp_millis: i64,
) -> String {
    let message =
        format!("{sender_id}:{receiver_id}:{signal_type}:{iteration}:{timestamp_millis}");
    hex::encode(Sha256::digest(message.as_bytes()))
}
