//! Phase orchestration: nested iteration, decision gate, escalation.

mod decision;
mod orchestrator;
mod state;

pub use decision::{Decision, DecisionGate, ProductOwnerDecision, ThresholdDecisionGate};
pub use orchestrator::{
    IterationOrchestrator, OrchestratorError, OrchestratorResult, PhaseOutcome,
};
pub use state::{AgentSpec, ConfidenceScore, IterationState, PhaseTask};
