//! Explicit configuration for every coordination component.
//!
//! Nothing here is read from the environment. Each subsystem takes its
//! config struct at construction, so two orchestrators in one process can
//! run with different thresholds.

use serde::{Deserialize, Serialize};

/// Circuit breaker tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Half-open successes required to close the circuit.
    pub success_threshold: u32,
    /// Maximum probe calls admitted while half-open.
    pub half_open_limit: u32,
    /// Per-call deadline in milliseconds.
    pub call_timeout_ms: u64,
    /// Backoff table for Open cooldowns; clamped at the last entry.
    pub backoff_delays_ms: Vec<u64>,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 2,
            half_open_limit: 3,
            call_timeout_ms: 30 * 60 * 1000,
            backoff_delays_ms: vec![1_000, 2_000, 4_000, 8_000],
        }
    }
}

/// Signal/ack protocol tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    /// TTL for stored acks in seconds.
    pub ack_ttl_secs: u64,
    /// TTL for stored signals and idempotency records in seconds.
    pub signal_ttl_secs: u64,
    /// Poll interval while waiting for acks, in milliseconds.
    pub poll_interval_ms: u64,
    /// Fixed retry delays for a failed acknowledge, in milliseconds.
    pub retry_delays_ms: Vec<u64>,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            ack_ttl_secs: 3_600,
            signal_ttl_secs: 86_400,
            poll_interval_ms: 100,
            retry_delays_ms: vec![1_000, 2_000, 4_000],
        }
    }
}

/// Consensus evaluator tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Minimum score for the consensus gate to pass.
    pub threshold: f64,
    /// Run the Byzantine (quorum + malicious detection) path.
    pub byzantine: bool,
    /// Standard deviations from the mean before a confidence is an outlier.
    pub outlier_sigma: f64,
    /// Reasoning shorter than this many characters is suspicious.
    pub min_reasoning_len: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            threshold: 0.90,
            byzantine: true,
            outlier_sigma: 2.0,
            min_reasoning_len: 10,
        }
    }
}

/// Iteration orchestrator tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum outer (consensus-round) iterations per phase.
    pub max_loop2_iterations: u32,
    /// Maximum inner (primary-execution) iterations per phase.
    pub max_loop3_iterations: u32,
    /// Minimum self-reported confidence for the confidence gate.
    pub confidence_threshold: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_loop2_iterations: 5,
            max_loop3_iterations: 10,
            confidence_threshold: 0.75,
        }
    }
}

/// Feedback capture/injection tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackConfig {
    /// Maximum entries in the per-phase dedup registry.
    pub registry_capacity: usize,
    /// Age in seconds after which a dedup entry no longer suppresses.
    pub registry_ttl_secs: u64,
    /// Maximum length of any sanitized free-text field.
    pub max_field_len: usize,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            registry_capacity: 256,
            registry_ttl_secs: 3_600,
            max_field_len: 500,
        }
    }
}

/// Aggregate configuration for one coordination core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinationConfig {
    pub breaker: BreakerConfig,
    pub signal: SignalConfig,
    pub consensus: ConsensusConfig,
    pub orchestrator: OrchestratorConfig,
    pub feedback: FeedbackConfig,
}
