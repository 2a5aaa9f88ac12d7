//! Post-consensus decision gate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::consensus::ConsensusResult;

use super::state::ConfidenceScore;

/// Verdict on work that already passed consensus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Accept the work as-is.
    Proceed,
    /// Accept the work; open issues go to the backlog.
    Defer,
    /// Hand off to a human. Terminal for the phase.
    Escalate,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Proceed => write!(f, "proceed"),
            Self::Defer => write!(f, "defer"),
            Self::Escalate => write!(f, "escalate"),
        }
    }
}

/// A gate verdict with its rationale and any deferred items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductOwnerDecision {
    pub decision: Decision,
    pub rationale: String,
    /// Consensus score the verdict was based on.
    pub confidence: f64,
    /// All open blockers at decision time, whatever the verdict.
    pub blockers: Vec<String>,
    /// Open items accepted into the backlog on Defer.
    pub backlog_items: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Decides whether consensus-approved work ships.
///
/// The default implementation is a threshold rule; callers can plug in a
/// human-in-the-loop or model-backed gate.
#[async_trait]
pub trait DecisionGate: Send + Sync {
    async fn decide(
        &self,
        consensus: &ConsensusResult,
        primary_scores: &[ConfidenceScore],
    ) -> ProductOwnerDecision;
}

/// Rule-based gate: Proceed when nothing is blocked, Defer a small number
/// of open blockers to the backlog, Escalate everything else.
#[derive(Debug, Clone)]
pub struct ThresholdDecisionGate {
    /// Maximum open blockers that may be deferred instead of escalated.
    pub max_deferred_blockers: usize,
}

impl Default for ThresholdDecisionGate {
    fn default() -> Self {
        Self {
            max_deferred_blockers: 3,
        }
    }
}

#[async_trait]
impl DecisionGate for ThresholdDecisionGate {
    async fn decide(
        &self,
        consensus: &ConsensusResult,
        primary_scores: &[ConfidenceScore],
    ) -> ProductOwnerDecision {
        let blockers: Vec<String> = primary_scores
            .iter()
            .flat_map(|s| s.blockers.iter().cloned())
            .collect();

        let (decision, rationale) = if blockers.is_empty() {
            (
                Decision::Proceed,
                format!("consensus score {:.3}, no open blockers", consensus.score),
            )
        } else if blockers.len() <= self.max_deferred_blockers {
            (
                Decision::Defer,
                format!(
                    "consensus score {:.3}, {} open blocker(s) deferred to backlog",
                    consensus.score,
                    blockers.len()
                ),
            )
        } else {
            (
                Decision::Escalate,
                format!(
                    "{} open blockers exceed the deferral limit of {}",
                    blockers.len(),
                    self.max_deferred_blockers
                ),
            )
        };
        debug!(%decision, blockers = blockers.len(), "decision gate evaluated");

        ProductOwnerDecision {
            decision,
            rationale,
            confidence: consensus.score,
            backlog_items: if decision == Decision::Defer {
                blockers.clone()
            } else {
                Vec::new()
            },
            blockers,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConsensusConfig;
    use crate::consensus::{ConsensusEvaluator, ValidatorVote, Vote};

    async fn passing_consensus() -> ConsensusResult {
        let votes = vec![
            ValidatorVote::new("v1", "validator", 0.95, Vote::Pass, "well structured work", vec![]),
            ValidatorVote::new("v2", "validator", 0.93, Vote::Pass, "meets all the criteria", vec![]),
        ];
        ConsensusEvaluator::new(ConsensusConfig::default())
            .evaluate(&votes)
            .await
    }

    fn score(blockers: Vec<&str>) -> ConfidenceScore {
        ConfidenceScore {
            agent_id: "coder-1".to_string(),
            agent_type: "coder".to_string(),
            confidence: 0.9,
            reasoning: "implemented as asked".to_string(),
            blockers: blockers.into_iter().map(String::from).collect(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_proceed_without_blockers() {
        let gate = ThresholdDecisionGate::default();
        let verdict = gate.decide(&passing_consensus().await, &[score(vec![])]).await;
        assert_eq!(verdict.decision, Decision::Proceed);
        assert!(verdict.backlog_items.is_empty());
    }

    #[tokio::test]
    async fn test_defer_few_blockers_to_backlog() {
        let gate = ThresholdDecisionGate::default();
        let verdict = gate
            .decide(
                &passing_consensus().await,
                &[score(vec!["flaky test", "missing docs"])],
            )
            .await;
        assert_eq!(verdict.decision, Decision::Defer);
        assert_eq!(verdict.backlog_items.len(), 2);
    }

    #[tokio::test]
    async fn test_verdict_carries_confidence_and_blockers() {
        let gate = ThresholdDecisionGate {
            max_deferred_blockers: 1,
        };
        let consensus = passing_consensus().await;
        let verdict = gate
            .decide(&consensus, &[score(vec!["a", "b"]), score(vec!["c"])])
            .await;
        assert_eq!(verdict.decision, Decision::Escalate);
        assert!((verdict.confidence - consensus.score).abs() < 1e-9);
        // Blockers are reported even when nothing lands in the backlog.
        assert_eq!(verdict.blockers, vec!["a", "b", "c"]);
        assert!(verdict.backlog_items.is_empty());
    }

    #[tokio::test]
    async fn test_escalate_on_too_many_blockers() {
        let gate = ThresholdDecisionGate {
            max_deferred_blockers: 1,
        };
        let verdict = gate
            .decide(
                &passing_consensus().await,
                &[score(vec!["a", "b"]), score(vec!["c"])],
            )
            .await;
        assert_eq!(verdict.decision, Decision::Escalate);
        assert!(verdict.backlog_items.is_empty());
    }
}
