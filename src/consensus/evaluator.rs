//! Consensus evaluation — simple and Byzantine modes.
//!
//! Simple mode scores the arithmetic mean of validator confidences.
//! Byzantine mode runs prepare/commit/reply quorum checks and flags
//! malicious votes; any internal error degrades to simple mode rather
//! than failing the phase.

use std::collections::HashSet;

use chrono::Utc;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::audit::{RiskLevel, SharedAuditSink};
use crate::config::ConsensusConfig;
use crate::events::{CoordinationEvent, SharedEventBus};

use super::types::{
    ConsensusMode, ConsensusResult, MaliciousFlag, PbftPhases, ValidatorVote, Vote,
};

/// Turns a set of validator votes into a pass/fail score.
///
/// Agents flagged as malicious are distrusted for the lifetime of the
/// evaluator: their votes carry no weight in the round that flags them
/// and are dropped outright from every later round.
pub struct ConsensusEvaluator {
    config: ConsensusConfig,
    audit: Option<SharedAuditSink>,
    bus: Option<SharedEventBus>,
    distrusted: Mutex<HashSet<String>>,
}

impl ConsensusEvaluator {
    /// Create an evaluator with the given config.
    pub fn new(config: ConsensusConfig) -> Self {
        Self {
            config,
            audit: None,
            bus: None,
            distrusted: Mutex::new(HashSet::new()),
        }
    }

    /// Attach an audit sink for malicious-agent records.
    pub fn with_audit(mut self, audit: SharedAuditSink) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Attach an event bus for detection events.
    pub fn with_bus(mut self, bus: SharedEventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Agents flagged in earlier evaluations and no longer trusted.
    pub async fn distrusted_agents(&self) -> HashSet<String> {
        self.distrusted.lock().await.clone()
    }

    /// Evaluate a vote set. Infallible: an empty set fails the gate with
    /// score 0, and Byzantine-path errors degrade to simple mode.
    pub async fn evaluate(&self, votes: &[ValidatorVote]) -> ConsensusResult {
        if votes.is_empty() {
            warn!("consensus evaluation with no votes — failing the gate");
            return ConsensusResult {
                score: 0.0,
                threshold: self.config.threshold,
                passed: false,
                votes: Vec::new(),
                quorum_size: None,
                malicious_agents: Vec::new(),
                pbft_phases: None,
                mode: if self.config.byzantine {
                    ConsensusMode::Byzantine
                } else {
                    ConsensusMode::Simple
                },
                degraded: false,
                timestamp: Utc::now(),
            };
        }

        if self.config.byzantine {
            match self.evaluate_byzantine(votes).await {
                Ok(result) => result,
                Err(reason) => {
                    warn!(reason, "byzantine path failed — degrading to simple mode");
                    let mut result = self.evaluate_simple(votes);
                    result.degraded = true;
                    result
                }
            }
        } else {
            self.evaluate_simple(votes)
        }
    }

    /// Simple mode: mean of all confidences vs threshold.
    fn evaluate_simple(&self, votes: &[ValidatorVote]) -> ConsensusResult {
        let score = votes.iter().map(|v| v.confidence).sum::<f64>() / votes.len() as f64;
        let passed = score >= self.config.threshold;
        debug!(score, threshold = self.config.threshold, passed, "simple consensus evaluated");
        ConsensusResult {
            score,
            threshold: self.config.threshold,
            passed,
            votes: votes.to_vec(),
            quorum_size: None,
            malicious_agents: Vec::new(),
            pbft_phases: None,
            mode: ConsensusMode::Simple,
            degraded: false,
            timestamp: Utc::now(),
        }
    }

    /// Byzantine mode: prepare/commit/reply quorum checks plus a
    /// PASS-weighted score.
    ///
    /// The score sums confidence over PASS votes only but divides by the
    /// FULL vote count, so a FAIL vote both contributes zero and shrinks
    /// the average. This asymmetry is the intended formula.
    async fn evaluate_byzantine(&self, votes: &[ValidatorVote]) -> Result<ConsensusResult, String> {
        if votes.iter().any(|v| !v.confidence.is_finite()) {
            return Err("non-finite confidence in vote set".to_string());
        }

        let mut distrusted = self.distrusted.lock().await;
        let trusted: Vec<ValidatorVote> = votes
            .iter()
            .filter(|v| !distrusted.contains(&v.agent_id))
            .cloned()
            .collect();
        if trusted.len() < votes.len() {
            debug!(
                dropped = votes.len() - trusted.len(),
                "dropped votes from previously flagged agents"
            );
        }

        let malicious_agents = self.detect_malicious(&trusted).await;
        for flag in &malicious_agents {
            distrusted.insert(flag.agent_id.clone());
        }
        let counted: Vec<ValidatorVote> = trusted
            .into_iter()
            .filter(|v| !distrusted.contains(&v.agent_id))
            .collect();
        drop(distrusted);

        if counted.is_empty() {
            warn!("no trusted votes remain — failing the gate");
            return Ok(ConsensusResult {
                score: 0.0,
                threshold: self.config.threshold,
                passed: false,
                votes: Vec::new(),
                quorum_size: None,
                malicious_agents,
                pbft_phases: None,
                mode: ConsensusMode::Byzantine,
                degraded: false,
                timestamp: Utc::now(),
            });
        }

        let n = counted.len();
        let quorum = quorum_size(n);

        let prepare = counted.iter().filter(|v| v.confidence > 0.0).count() >= quorum;
        let commit = counted.iter().filter(|v| v.confidence >= 0.5).count() >= quorum;
        let reply = counted.iter().filter(|v| v.vote == Vote::Pass).count() >= quorum;
        let phases = PbftPhases {
            prepare,
            commit,
            reply,
        };

        let pass_confidence: f64 = counted
            .iter()
            .filter(|v| v.vote == Vote::Pass)
            .map(|v| v.confidence)
            .sum();
        let score = pass_confidence / n as f64;

        let passed = score >= self.config.threshold && phases.all();
        debug!(
            score,
            threshold = self.config.threshold,
            quorum,
            prepare,
            commit,
            reply,
            passed,
            malicious = malicious_agents.len(),
            "byzantine consensus evaluated"
        );

        Ok(ConsensusResult {
            score,
            threshold: self.config.threshold,
            passed,
            votes: counted,
            quorum_size: Some(quorum),
            malicious_agents,
            pbft_phases: Some(phases),
            mode: ConsensusMode::Byzantine,
            degraded: false,
            timestamp: Utc::now(),
        })
    }

    /// Flag votes meeting at least two suspicion criteria:
    /// confidence outlier (> `outlier_sigma` std-devs from the mean),
    /// failed signature recomputation, or reasoning shorter than
    /// `min_reasoning_len` characters.
    ///
    /// Never fails — an unusable statistic just disables that criterion.
    async fn detect_malicious(&self, votes: &[ValidatorVote]) -> Vec<MaliciousFlag> {
        let n = votes.len() as f64;
        let mean = votes.iter().map(|v| v.confidence).sum::<f64>() / n;
        let variance = votes
            .iter()
            .map(|v| (v.confidence - mean).powi(2))
            .sum::<f64>()
            / n;
        let std_dev = variance.sqrt();
        let outlier_usable = votes.len() >= 2 && std_dev.is_finite() && std_dev > 0.0;

        let mut flags = Vec::new();
        for vote in votes {
            let mut criteria = Vec::new();

            if outlier_usable
                && (vote.confidence - mean).abs() > self.config.outlier_sigma * std_dev
            {
                criteria.push(format!(
                    "confidence {:.2} is an outlier (mean {:.2}, sigma {:.2})",
                    vote.confidence, mean, std_dev
                ));
            }
            if !vote.signature_valid() {
                criteria.push("signature failed recomputation".to_string());
            }
            if vote.reasoning.trim().chars().count() < self.config.min_reasoning_len {
                criteria.push(format!(
                    "reasoning shorter than {} characters",
                    self.config.min_reasoning_len
                ));
            }

            if criteria.len() >= 2 {
                let reason = criteria.join("; ");
                warn!(agent_id = %vote.agent_id, %reason, "malicious vote detected");

                if let Some(bus) = &self.bus {
                    bus.publish(CoordinationEvent::MaliciousAgentDetected {
                        agent_id: vote.agent_id.clone(),
                        reason: reason.clone(),
                        timestamp: Utc::now(),
                    });
                }
                if let Some(audit) = &self.audit {
                    audit
                        .record_event(
                            "malicious_agent",
                            json!({
                                "agent_id": vote.agent_id,
                                "agent_type": vote.agent_type,
                                "confidence": vote.confidence,
                                "reason": reason,
                            }),
                            RiskLevel::High,
                        )
                        .await;
                }

                flags.push(MaliciousFlag {
                    agent_id: vote.agent_id.clone(),
                    reason,
                });
            }
        }
        flags
    }
}

/// Byzantine quorum: ceil(2n/3).
pub fn quorum_size(n: usize) -> usize {
    (2 * n).div_ceil(3)
}
