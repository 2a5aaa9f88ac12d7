//! Observable coordination events.
//!
//! Every state transition, gate decision, and protocol step emits one of
//! these. No consumer is required to exist — publishing is fire-and-forget.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::breaker::BreakerState;
use crate::consensus::ConsensusMode;
use crate::phase::Decision;

/// Events published by the coordination core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CoordinationEvent {
    /// A circuit breaker changed state.
    BreakerStateChanged {
        circuit: String,
        from: BreakerState,
        to: BreakerState,
        timestamp: DateTime<Utc>,
    },

    /// A breaker-wrapped call completed successfully.
    BreakerCallSucceeded {
        circuit: String,
        timestamp: DateTime<Utc>,
    },

    /// A breaker-wrapped call failed (including timeouts).
    BreakerCallFailed {
        circuit: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// The confidence gate was evaluated for an inner iteration.
    ConfidenceGateEvaluated {
        phase_id: String,
        iteration: u32,
        lowest_confidence: f64,
        threshold: f64,
        passed: bool,
        timestamp: DateTime<Utc>,
    },

    /// The inner loop ran out of iterations for this consensus round.
    InnerLoopExhausted {
        phase_id: String,
        consensus_round: u32,
        timestamp: DateTime<Utc>,
    },

    /// The consensus evaluator produced a result.
    ConsensusEvaluated {
        phase_id: String,
        score: f64,
        threshold: f64,
        passed: bool,
        mode: ConsensusMode,
        degraded: bool,
        timestamp: DateTime<Utc>,
    },

    /// A validator vote was flagged as malicious.
    MaliciousAgentDetected {
        agent_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Consensus failed and feedback was captured for the next round.
    FeedbackCaptured {
        phase_id: String,
        iteration: u32,
        step_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A signal was written to the shared store (or deduplicated).
    SignalSent {
        message_id: String,
        signal_type: String,
        source: String,
        duplicate: bool,
        timestamp: DateTime<Utc>,
    },

    /// An ack was stored (or an existing verified ack returned).
    AckRecorded {
        coordinator_id: String,
        signal_id: String,
        cached: bool,
        timestamp: DateTime<Utc>,
    },

    /// A phase finished successfully with a decision.
    PhaseCompleted {
        phase_id: String,
        decision: Decision,
        score: f64,
        timestamp: DateTime<Utc>,
    },

    /// A phase ended in escalation.
    PhaseEscalated {
        phase_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl CoordinationEvent {
    /// Stable machine-readable name for this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::BreakerStateChanged { .. } => "breaker_state_changed",
            Self::BreakerCallSucceeded { .. } => "breaker_call_succeeded",
            Self::BreakerCallFailed { .. } => "breaker_call_failed",
            Self::ConfidenceGateEvaluated { .. } => "confidence_gate_evaluated",
            Self::InnerLoopExhausted { .. } => "inner_loop_exhausted",
            Self::ConsensusEvaluated { .. } => "consensus_evaluated",
            Self::MaliciousAgentDetected { .. } => "malicious_agent_detected",
            Self::FeedbackCaptured { .. } => "feedback_captured",
            Self::SignalSent { .. } => "signal_sent",
            Self::AckRecorded { .. } => "ack_recorded",
            Self::PhaseCompleted { .. } => "phase_completed",
            Self::PhaseEscalated { .. } => "phase_escalated",
        }
    }

    /// When the event occurred.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::BreakerStateChanged { timestamp, .. }
            | Self::BreakerCallSucceeded { timestamp, .. }
            | Self::BreakerCallFailed { timestamp, .. }
            | Self::ConfidenceGateEvaluated { timestamp, .. }
            | Self::InnerLoopExhausted { timestamp, .. }
            | Self::ConsensusEvaluated { timestamp, .. }
            | Self::MaliciousAgentDetected { timestamp, .. }
            | Self::FeedbackCaptured { timestamp, .. }
            | Self::SignalSent { timestamp, .. }
            | Self::AckRecorded { timestamp, .. }
            | Self::PhaseCompleted { timestamp, .. }
            | Self::PhaseEscalated { timestamp, .. } => *timestamp,
        }
    }

    /// Phase this event belongs to, if any.
    pub fn phase_id(&self) -> Option<&str> {
        match self {
            Self::ConfidenceGateEvaluated { phase_id, .. }
            | Self::InnerLoopExhausted { phase_id, .. }
            | Self::ConsensusEvaluated { phase_id, .. }
            | Self::FeedbackCaptured { phase_id, .. }
            | Self::PhaseCompleted { phase_id, .. }
            | Self::PhaseEscalated { phase_id, .. } => Some(phase_id),
            _ => None,
        }
    }
}
