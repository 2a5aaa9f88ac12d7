//! Pluggable agent execution seam.
//!
//! The core never spawns agents itself; it hands instructions to an
//! [`AgentExecutor`] and treats the call as opaque, slow, and fallible
//! (every call site wraps it in a circuit breaker). Inbound payloads are
//! normalized through [`AgentReply::from_value`] — one explicit
//! parse-or-reject step — before entering the typed model.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::consensus::ValidatorVote;

/// Error type for agent execution.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("agent execution failed: {0}")]
    Failed(String),

    #[error("agent backend unavailable: {0}")]
    Unavailable(String),
}

/// Result type for agent execution.
pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// Instructions handed to one agent for one iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInstructions {
    pub agent_id: String,
    pub agent_type: String,
    /// The task description for this phase.
    pub task: String,
    /// Rendered feedback block from a failed consensus round, if any.
    pub injected_feedback: Option<String>,
    /// Inner-iteration counter this execution belongs to.
    pub iteration: u32,
}

impl AgentInstructions {
    /// The task text as the agent should see it, feedback first.
    pub fn rendered_task(&self) -> String {
        match &self.injected_feedback {
            Some(feedback) => format!("{feedback}\n\n{}", self.task),
            None => self.task.clone(),
        }
    }
}

/// What an agent returned for one execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub agent_id: String,
    pub agent_type: String,
    /// Opaque work product (or a vote payload for validators).
    pub deliverable: Value,
    /// Self-reported confidence (0.0–1.0).
    pub confidence: f64,
    pub reasoning: String,
    pub blockers: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// External capability that actually runs agents.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Execute one agent and return its response.
    async fn execute(&self, instructions: AgentInstructions) -> ExecutorResult<AgentResponse>;
}

/// Error type for reply normalization.
#[derive(Debug, thiserror::Error)]
pub enum ReplyParseError {
    #[error("invalid vote payload: {0}")]
    InvalidVote(String),

    #[error("unrecognized reply shape: expected a vote or response object")]
    UnrecognizedShape,
}

/// A normalized inbound payload: either a structured validator vote or a
/// plain agent response embedded in the deliverable.
#[derive(Debug, Clone)]
pub enum AgentReply {
    Vote(ValidatorVote),
    Response(Value),
}

impl AgentReply {
    /// Classify and validate an inbound payload.
    ///
    /// An object carrying a `vote` field must deserialize as a full
    /// [`ValidatorVote`] or the payload is rejected; anything else is
    /// treated as an opaque response deliverable.
    pub fn from_value(value: &Value) -> Result<Self, ReplyParseError> {
        match value {
            Value::Object(map) if map.contains_key("vote") => {
                let vote: ValidatorVote = serde_json::from_value(value.clone())
                    .map_err(|e| ReplyParseError::InvalidVote(e.to_string()))?;
                Ok(Self::Vote(vote))
            }
            Value::Object(_) | Value::String(_) => Ok(Self::Response(value.clone())),
            _ => Err(ReplyParseError::UnrecognizedShape),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::Vote;
    use serde_json::json;

    #[test]
    fn test_rendered_task_prepends_feedback() {
        let instructions = AgentInstructions {
            agent_id: "coder-1".to_string(),
            agent_type: "coder".to_string(),
            task: "implement the parser".to_string(),
            injected_feedback: Some("== FEEDBACK ==".to_string()),
            iteration: 2,
        };
        let rendered = instructions.rendered_task();
        assert!(rendered.starts_with("== FEEDBACK =="));
        assert!(rendered.ends_with("implement the parser"));
    }

    #[test]
    fn test_reply_classifies_vote() {
        let vote = ValidatorVote::new("v1", "validator", 0.9, Vote::Pass, "solid work here", vec![]);
        let value = serde_json::to_value(&vote).unwrap();

        match AgentReply::from_value(&value).unwrap() {
            AgentReply::Vote(parsed) => {
                assert_eq!(parsed.agent_id, "v1");
                assert!(parsed.signature_valid());
            }
            other => panic!("expected vote, got {other:?}"),
        }
    }

    #[test]
    fn test_reply_classifies_plain_response() {
        let value = json!({"summary": "done", "files": ["a.rs"]});
        assert!(matches!(
            AgentReply::from_value(&value).unwrap(),
            AgentReply::Response(_)
        ));
    }

    #[test]
    fn test_reply_rejects_malformed_vote() {
        // Has a vote field but the wrong shape — must reject, not coerce.
        let value = json!({"vote": "MAYBE", "agent_id": 7});
        assert!(matches!(
            AgentReply::from_value(&value),
            Err(ReplyParseError::InvalidVote(_))
        ));
    }

    #[test]
    fn test_reply_rejects_scalars() {
        assert!(matches!(
            AgentReply::from_value(&json!(42)),
            Err(ReplyParseError::UnrecognizedShape)
        ));
    }
}
