//! Iteration counters and phase task definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::executor::AgentResponse;

/// One agent to run in a phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub agent_id: String,
    pub agent_type: String,
}

impl AgentSpec {
    pub fn new(agent_id: impl Into<String>, agent_type: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_type: agent_type.into(),
        }
    }
}

/// Everything the orchestrator needs to run one phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTask {
    /// Task description handed to every agent.
    pub description: String,
    /// Agents that produce the work.
    pub primary_agents: Vec<AgentSpec>,
    /// Agents that vote on the work.
    pub validator_agents: Vec<AgentSpec>,
}

/// The two nested iteration counters for one phase.
///
/// `loop2` counts outer consensus rounds. `loop3` counts inner
/// primary-execution attempts and persists across outer rounds — it is
/// reset only when the confidence gate passes, so a group that keeps
/// limping through on low confidence eventually exhausts it.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct IterationState {
    pub loop2: u32,
    pub loop3: u32,
}

impl IterationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the next outer round.
    pub fn next_round(&mut self) {
        self.loop2 += 1;
    }

    /// Record a failed inner attempt.
    pub fn record_inner_attempt(&mut self) {
        self.loop3 += 1;
    }

    /// The confidence gate passed; the inner counter starts over.
    pub fn reset_inner(&mut self) {
        self.loop3 = 0;
    }
}

/// Snapshot of one agent's self-reported confidence for the gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceScore {
    pub agent_id: String,
    pub agent_type: String,
    pub confidence: f64,
    pub reasoning: String,
    pub blockers: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl From<&AgentResponse> for ConfidenceScore {
    fn from(response: &AgentResponse) -> Self {
        Self {
            agent_id: response.agent_id.clone(),
            agent_type: response.agent_type.clone(),
            confidence: response.confidence,
            reasoning: response.reasoning.clone(),
            blockers: response.blockers.clone(),
            timestamp: response.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inner_counter_survives_rounds() {
        let mut state = IterationState::new();
        state.next_round();
        state.record_inner_attempt();
        state.record_inner_attempt();
        state.next_round();
        assert_eq!(state.loop2, 2);
        assert_eq!(state.loop3, 2, "inner counter must persist across rounds");

        state.reset_inner();
        assert_eq!(state.loop3, 0);
        assert_eq!(state.loop2, 2);
    }
}
