//! Converts validator criticism into deduplicated, prioritized steps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::BoundedCache;
use crate::config::FeedbackConfig;
use crate::consensus::{ConsensusResult, Vote};

/// Issue severity, which doubles as step priority (critical first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Critical => write!(f, "critical"),
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

/// One concrete criticism from a validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorIssue {
    /// Category such as "blocker" or "low_confidence".
    pub issue_type: String,
    pub severity: Severity,
    pub message: String,
    /// Where the issue applies (file, component), if stated.
    pub location: Option<String>,
}

impl ValidatorIssue {
    /// Registry key for suppression of verbatim repeats.
    pub fn dedup_key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.issue_type,
            self.severity,
            self.message,
            self.location.as_deref().unwrap_or("")
        )
    }
}

/// Issues attributed to one validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorFeedback {
    pub agent_id: String,
    pub issues: Vec<ValidatorIssue>,
}

/// An agent-directed instruction derived from issues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionableStep {
    pub description: String,
    pub priority: Severity,
    /// Rough effort in minutes; only the ordering matters.
    pub estimated_effort_mins: u32,
    pub source_agent: String,
}

/// Summary of an earlier failed round, carried forward for context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorIteration {
    pub iteration: u32,
    pub score: f64,
    pub step_count: usize,
}

/// Everything captured from one failed consensus round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusFeedback {
    pub phase_id: String,
    pub iteration: u32,
    pub score: f64,
    pub required_score: f64,
    pub per_validator_issues: Vec<ValidatorFeedback>,
    pub failed_criteria: Vec<String>,
    /// Priority-sorted, effort-ascending within a tier.
    pub actionable_steps: Vec<ActionableStep>,
    pub prior_iterations: Vec<PriorIteration>,
    pub timestamp: DateTime<Utc>,
}

/// Per-phase suppression registry for repeated issues.
pub struct DedupRegistry {
    seen: BoundedCache<String, ()>,
}

impl DedupRegistry {
    /// Create a registry sized from config.
    pub fn new(config: &FeedbackConfig) -> Self {
        Self {
            seen: BoundedCache::new(config.registry_capacity)
                .with_ttl(std::time::Duration::from_secs(config.registry_ttl_secs)),
        }
    }

    /// Whether the issue is new; records it either way.
    pub fn admit(&mut self, issue: &ValidatorIssue) -> bool {
        let key = issue.dedup_key();
        if self.seen.contains(&key) {
            false
        } else {
            self.seen.insert(key, ());
            true
        }
    }

    /// Forget everything (phase reset).
    pub fn clear(&mut self) {
        self.seen.clear();
    }
}

/// Builds [`ConsensusFeedback`] from a failed consensus result.
pub struct FeedbackCapture {
    config: FeedbackConfig,
}

impl FeedbackCapture {
    /// Create a capture engine.
    pub fn new(config: FeedbackConfig) -> Self {
        Self { config }
    }

    /// The config this engine runs with.
    pub fn config(&self) -> &FeedbackConfig {
        &self.config
    }

    /// Capture feedback from one failed round.
    ///
    /// Issues are extracted per validator, deduplicated against the
    /// per-phase registry, and converted into priority-sorted steps.
    pub fn capture(
        &self,
        registry: &mut DedupRegistry,
        phase_id: &str,
        iteration: u32,
        consensus: &ConsensusResult,
        prior: &[ConsensusFeedback],
    ) -> ConsensusFeedback {
        let mut per_validator_issues = Vec::new();
        let mut steps = Vec::new();

        for vote in &consensus.votes {
            let issues: Vec<ValidatorIssue> = extract_issues(vote)
                .into_iter()
                .filter(|issue| registry.admit(issue))
                .collect();
            if issues.is_empty() {
                continue;
            }
            for issue in &issues {
                steps.push(to_step(issue, &vote.agent_id));
            }
            per_validator_issues.push(ValidatorFeedback {
                agent_id: vote.agent_id.clone(),
                issues,
            });
        }

        // Critical first; quick wins first within a tier.
        steps.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.estimated_effort_mins.cmp(&b.estimated_effort_mins))
        });

        let feedback = ConsensusFeedback {
            phase_id: phase_id.to_string(),
            iteration,
            score: consensus.score,
            required_score: consensus.threshold,
            per_validator_issues,
            failed_criteria: failed_criteria(consensus),
            actionable_steps: steps,
            prior_iterations: prior
                .iter()
                .map(|f| PriorIteration {
                    iteration: f.iteration,
                    score: f.score,
                    step_count: f.actionable_steps.len(),
                })
                .collect(),
            timestamp: Utc::now(),
        };
        debug!(
            phase_id,
            iteration,
            steps = feedback.actionable_steps.len(),
            "feedback captured"
        );
        feedback
    }
}

/// Pull issues out of one vote.
fn extract_issues(vote: &crate::consensus::ValidatorVote) -> Vec<ValidatorIssue> {
    let mut issues = Vec::new();
    for blocker in &vote.blockers {
        issues.push(ValidatorIssue {
            issue_type: "blocker".to_string(),
            severity: if vote.confidence < 0.3 {
                Severity::Critical
            } else {
                Severity::High
            },
            message: blocker.clone(),
            location: None,
        });
    }
    if vote.vote == Vote::Fail && vote.blockers.is_empty() {
        issues.push(ValidatorIssue {
            issue_type: "rejection".to_string(),
            severity: Severity::High,
            message: vote.reasoning.clone(),
            location: None,
        });
    }
    if vote.vote == Vote::Fail && vote.confidence < 0.5 {
        issues.push(ValidatorIssue {
            issue_type: "low_confidence".to_string(),
            severity: Severity::Medium,
            message: format!(
                "validator confidence {:.2} is below 0.5",
                vote.confidence
            ),
            location: None,
        });
    }
    issues
}

/// Which consensus criteria failed, as human-readable strings.
fn failed_criteria(consensus: &ConsensusResult) -> Vec<String> {
    let mut criteria = Vec::new();
    if consensus.score < consensus.threshold {
        criteria.push(format!(
            "consensus score {:.3} below required {:.2}",
            consensus.score, consensus.threshold
        ));
    }
    if let Some(phases) = &consensus.pbft_phases {
        if !phases.prepare {
            criteria.push("prepare phase below quorum".to_string());
        }
        if !phases.commit {
            criteria.push("commit phase below quorum".to_string());
        }
        if !phases.reply {
            criteria.push("reply phase below quorum".to_string());
        }
    }
    for flag in &consensus.malicious_agents {
        criteria.push(format!("malicious vote from {}: {}", flag.agent_id, flag.reason));
    }
    criteria
}

/// Map an issue to a step with an effort estimate.
fn to_step(issue: &ValidatorIssue, agent_id: &str) -> ActionableStep {
    let base = match issue.severity {
        Severity::Critical => 120,
        Severity::High => 60,
        Severity::Medium => 30,
        Severity::Low => 15,
    };
    // Confidence/reporting issues are cheaper to address than blockers.
    let effort = match issue.issue_type.as_str() {
        "low_confidence" => base / 2,
        _ => base,
    };
    let description = match &issue.location {
        Some(location) => format!("[{}] {} ({})", issue.issue_type, issue.message, location),
        None => format!("[{}] {}", issue.issue_type, issue.message),
    };
    ActionableStep {
        description,
        priority: issue.severity,
        estimated_effort_mins: effort,
        source_agent: agent_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConsensusConfig;
    use crate::consensus::{ConsensusEvaluator, ValidatorVote};

    async fn failing_consensus(blockers: Vec<&str>) -> ConsensusResult {
        let votes = vec![
            ValidatorVote::new("v1", "validator", 0.9, Vote::Pass, "fine by me overall", vec![]),
            ValidatorVote::new(
                "v2",
                "validator",
                0.2,
                Vote::Fail,
                "multiple problems remain",
                blockers.into_iter().map(String::from).collect(),
            ),
        ];
        ConsensusEvaluator::new(ConsensusConfig {
            byzantine: false,
            ..Default::default()
        })
        .evaluate(&votes)
        .await
    }

    #[tokio::test]
    async fn test_capture_builds_sorted_steps() {
        let capture = FeedbackCapture::new(FeedbackConfig::default());
        let mut registry = DedupRegistry::new(capture.config());
        let consensus = failing_consensus(vec!["data race in worker pool", "missing tests"]).await;

        let feedback = capture.capture(&mut registry, "phase-1", 1, &consensus, &[]);

        assert!(!feedback.actionable_steps.is_empty());
        // Critical (confidence 0.2 < 0.3) blockers come before medium steps.
        let priorities: Vec<Severity> =
            feedback.actionable_steps.iter().map(|s| s.priority).collect();
        let mut sorted = priorities.clone();
        sorted.sort();
        assert_eq!(priorities, sorted);
        assert!(feedback
            .failed_criteria
            .iter()
            .any(|c| c.contains("below required")));
    }

    #[tokio::test]
    async fn test_dedup_suppresses_repeats() {
        let capture = FeedbackCapture::new(FeedbackConfig::default());
        let mut registry = DedupRegistry::new(capture.config());
        let consensus = failing_consensus(vec!["data race in worker pool"]).await;

        let first = capture.capture(&mut registry, "phase-1", 1, &consensus, &[]);
        assert!(!first.actionable_steps.is_empty());

        // The same criticism next round is suppressed.
        let second = capture.capture(&mut registry, "phase-1", 2, &consensus, &[first.clone()]);
        assert!(second
            .actionable_steps
            .iter()
            .all(|s| !s.description.contains("data race")));
        assert_eq!(second.prior_iterations.len(), 1);
        assert_eq!(second.prior_iterations[0].iteration, 1);
    }

    #[test]
    fn test_registry_clear_readmits() {
        let config = FeedbackConfig::default();
        let mut registry = DedupRegistry::new(&config);
        let issue = ValidatorIssue {
            issue_type: "blocker".to_string(),
            severity: Severity::High,
            message: "broken build".to_string(),
            location: Some("src/lib.rs".to_string()),
        };

        assert!(registry.admit(&issue));
        assert!(!registry.admit(&issue));
        registry.clear();
        assert!(registry.admit(&issue));
    }

    #[test]
    fn test_effort_orders_within_tier() {
        let cheap = ValidatorIssue {
            issue_type: "low_confidence".to_string(),
            severity: Severity::Medium,
            message: "m".to_string(),
            location: None,
        };
        let pricey = ValidatorIssue {
            issue_type: "blocker".to_string(),
            severity: Severity::Medium,
            message: "m".to_string(),
            location: None,
        };
        assert!(to_step(&cheap, "v").estimated_effort_mins < to_step(&pricey, "v").estimated_effort_mins);
    }
}
