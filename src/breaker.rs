//! Circuit breaker protecting remote calls.
//!
//! Tracks consecutive failures per named circuit. When failures reach a
//! configurable threshold the circuit *opens* and calls are rejected
//! without invoking the wrapped operation. After an exponential-backoff
//! cooldown the circuit enters *half-open* and admits a bounded number of
//! probe calls; enough successes close it, a single failure reopens it
//! with the backoff advanced.
//!
//! Every call additionally races a per-call timeout. The breaker is a pure
//! protection primitive: transitions are published as events and carry no
//! business logic.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::BreakerConfig;
use crate::events::{CoordinationEvent, SharedEventBus};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Healthy — calls pass through.
    Closed,
    /// Tripped — calls rejected until the cooldown expires.
    Open,
    /// Cooldown expired — a bounded number of probe calls allowed.
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Error type for breaker-wrapped calls.
#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E>
where
    E: std::fmt::Debug + std::fmt::Display,
{
    /// Rejected without invoking the operation.
    #[error("circuit '{circuit}' is {state}, retry in {retry_after_ms}ms")]
    CircuitOpen {
        circuit: String,
        state: BreakerState,
        retry_after_ms: u64,
    },

    /// The operation exceeded its deadline. Counts as a failure.
    #[error("circuit '{circuit}' call timed out after {timeout_ms}ms")]
    Timeout { circuit: String, timeout_ms: u64 },

    /// The operation itself failed. Counts as a failure.
    #[error("{0}")]
    Inner(E),
}

/// Result type for breaker-wrapped calls.
pub type BreakerResult<T, E> = Result<T, BreakerError<E>>;

/// Observable counters for a circuit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub circuit: String,
    pub state: BreakerState,
    pub failure_count: u32,
    pub success_count: u32,
    pub current_attempt: u32,
    /// Milliseconds until the next probe is admitted, when open.
    pub retry_after_ms: Option<u64>,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failure_count: u32,
    success_count: u32,
    current_attempt: u32,
    half_open_probes: u32,
    next_attempt_at: Option<Instant>,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            success_count: 0,
            current_attempt: 0,
            half_open_probes: 0,
            next_attempt_at: None,
        }
    }
}

/// Per-circuit call-protection wrapper.
///
/// One instance per logical operation class (e.g. "primary-execution",
/// "consensus-validation"). State is in-process only.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
    bus: Option<SharedEventBus>,
}

impl CircuitBreaker {
    /// Create a breaker for a named circuit.
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner::new()),
            bus: None,
        }
    }

    /// Attach an event bus for transition/call events.
    pub fn with_bus(mut self, bus: SharedEventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// The circuit name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute `op` through the breaker, racing the configured timeout.
    pub async fn execute<F, Fut, T, E>(&self, op: F) -> BreakerResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Debug + std::fmt::Display,
    {
        self.admit().await?;

        let timeout = Duration::from_millis(self.config.call_timeout_ms);
        match tokio::time::timeout(timeout, op()).await {
            Ok(Ok(value)) => {
                self.on_success().await;
                Ok(value)
            }
            Ok(Err(err)) => {
                self.on_failure(&err.to_string()).await;
                Err(BreakerError::Inner(err))
            }
            Err(_) => {
                self.on_failure("timeout").await;
                Err(BreakerError::Timeout {
                    circuit: self.name.clone(),
                    timeout_ms: self.config.call_timeout_ms,
                })
            }
        }
    }

    /// Current state of the circuit, resolving Open → HalfOpen when the
    /// cooldown has expired.
    pub async fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock().await;
        self.resolve_open(&mut inner);
        inner.state
    }

    /// Observable counters for metrics/logging.
    pub async fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock().await;
        BreakerSnapshot {
            circuit: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            current_attempt: inner.current_attempt,
            retry_after_ms: inner.next_attempt_at.map(|at| {
                at.saturating_duration_since(Instant::now()).as_millis() as u64
            }),
        }
    }

    /// Force the circuit back to closed with all counters reset.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        let from = inner.state;
        *inner = Inner::new();
        if from != BreakerState::Closed {
            self.publish_transition(from, BreakerState::Closed);
        }
    }

    /// Admit or reject the next call.
    async fn admit<E>(&self) -> Result<(), BreakerError<E>>
    where
        E: std::fmt::Debug + std::fmt::Display,
    {
        let mut inner = self.inner.lock().await;
        self.resolve_open(&mut inner);

        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let retry_after_ms = inner
                    .next_attempt_at
                    .map(|at| at.saturating_duration_since(Instant::now()).as_millis() as u64)
                    .unwrap_or(0);
                Err(BreakerError::CircuitOpen {
                    circuit: self.name.clone(),
                    state: inner.state,
                    retry_after_ms,
                })
            }
            BreakerState::HalfOpen => {
                if inner.half_open_probes < self.config.half_open_limit {
                    inner.half_open_probes += 1;
                    Ok(())
                } else {
                    Err(BreakerError::CircuitOpen {
                        circuit: self.name.clone(),
                        state: inner.state,
                        retry_after_ms: 0,
                    })
                }
            }
        }
    }

    /// Open → HalfOpen once the cooldown has elapsed.
    fn resolve_open(&self, inner: &mut Inner) {
        if inner.state == BreakerState::Open {
            let due = inner
                .next_attempt_at
                .map(|at| Instant::now() >= at)
                .unwrap_or(true);
            if due {
                inner.state = BreakerState::HalfOpen;
                inner.half_open_probes = 0;
                inner.success_count = 0;
                self.publish_transition(BreakerState::Open, BreakerState::HalfOpen);
            }
        }
    }

    async fn on_success(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            BreakerState::Closed => {
                inner.failure_count = 0;
            }
            BreakerState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    *inner = Inner::new();
                    self.publish_transition(BreakerState::HalfOpen, BreakerState::Closed);
                }
            }
            BreakerState::Open => {} // late completion after trip; nothing to do
        }
        if let Some(bus) = &self.bus {
            bus.publish(CoordinationEvent::BreakerCallSucceeded {
                circuit: self.name.clone(),
                timestamp: Utc::now(),
            });
        }
        debug!(circuit = %self.name, "breaker call succeeded");
    }

    async fn on_failure(&self, reason: &str) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            BreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    self.trip(&mut inner, BreakerState::Closed);
                }
            }
            BreakerState::HalfOpen => {
                // A single half-open failure reopens with backoff advanced.
                self.trip(&mut inner, BreakerState::HalfOpen);
            }
            BreakerState::Open => {}
        }
        if let Some(bus) = &self.bus {
            bus.publish(CoordinationEvent::BreakerCallFailed {
                circuit: self.name.clone(),
                reason: reason.to_string(),
                timestamp: Utc::now(),
            });
        }
        warn!(circuit = %self.name, reason, "breaker call failed");
    }

    /// Transition to Open and schedule the next probe.
    fn trip(&self, inner: &mut Inner, from: BreakerState) {
        inner.current_attempt += 1;
        let idx = (inner.current_attempt as usize - 1).min(
            self.config.backoff_delays_ms.len().saturating_sub(1),
        );
        let delay_ms = self
            .config
            .backoff_delays_ms
            .get(idx)
            .copied()
            .unwrap_or(1_000);
        inner.state = BreakerState::Open;
        inner.success_count = 0;
        inner.half_open_probes = 0;
        inner.next_attempt_at = Some(Instant::now() + Duration::from_millis(delay_ms));
        self.publish_transition(from, BreakerState::Open);
    }

    fn publish_transition(&self, from: BreakerState, to: BreakerState) {
        debug!(circuit = %self.name, %from, %to, "breaker state changed");
        if let Some(bus) = &self.bus {
            bus.publish(CoordinationEvent::BreakerStateChanged {
                circuit: self.name.clone(),
                from,
                to,
                timestamp: Utc::now(),
            });
        }
    }
}
