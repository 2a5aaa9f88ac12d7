//! Vote and consensus-result types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A validator's verdict on the primary group's work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Vote {
    Pass,
    Fail,
}

impl std::fmt::Display for Vote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => write!(f, "PASS"),
            Self::Fail => write!(f, "FAIL"),
        }
    }
}

/// One validator's vote for an outer iteration.
///
/// The signature is a deterministic SHA-256 over
/// `(agent_id, confidence, vote, timestamp)` — an integrity check among
/// parties who can recompute it. It is deliberately NOT keyed: anyone who
/// knows the vote fields can forge it. The signal/ack protocol's HMAC is
/// the authenticated construction; votes are not assumed adversarial at
/// the transport layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorVote {
    pub agent_id: String,
    pub agent_type: String,
    /// Self-reported confidence in the verdict (0.0–1.0).
    pub confidence: f64,
    pub vote: Vote,
    pub reasoning: String,
    pub signature: String,
    pub timestamp: DateTime<Utc>,
    /// Blocking issues the validator observed.
    pub blockers: Vec<String>,
}

impl ValidatorVote {
    /// Build a vote, computing its signature.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agent_id: impl Into<String>,
        agent_type: impl Into<String>,
        confidence: f64,
        vote: Vote,
        reasoning: impl Into<String>,
        blockers: Vec<String>,
    ) -> Self {
        let agent_id = agent_id.into();
        let timestamp = Utc::now();
        let signature = Self::compute_signature(&agent_id, confidence, vote, timestamp);
        Self {
            agent_id,
            agent_type: agent_type.into(),
            confidence,
            vote,
            reasoning: reasoning.into(),
            signature,
            timestamp,
            blockers,
        }
    }

    /// Deterministic hash of the signed vote fields.
    pub fn compute_signature(
        agent_id: &str,
        confidence: f64,
        vote: Vote,
        timestamp: DateTime<Utc>,
    ) -> String {
        let message = format!(
            "{}:{:.6}:{}:{}",
            agent_id,
            confidence,
            vote,
            timestamp.timestamp_millis()
        );
        hex::encode(Sha256::digest(message.as_bytes()))
    }

    /// Whether the stored signature matches recomputation.
    pub fn signature_valid(&self) -> bool {
        self.signature
            == Self::compute_signature(&self.agent_id, self.confidence, self.vote, self.timestamp)
    }
}

/// Which evaluator path produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusMode {
    Simple,
    Byzantine,
}

impl std::fmt::Display for ConsensusMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Simple => write!(f, "simple"),
            Self::Byzantine => write!(f, "byzantine"),
        }
    }
}

/// Byzantine phase-check outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PbftPhases {
    /// Votes with confidence > 0 reached quorum.
    pub prepare: bool,
    /// Votes with confidence >= 0.5 reached quorum.
    pub commit: bool,
    /// PASS votes reached quorum.
    pub reply: bool,
}

impl PbftPhases {
    /// Whether every phase check held.
    pub fn all(&self) -> bool {
        self.prepare && self.commit && self.reply
    }
}

/// A vote flagged as malicious, with a human-readable reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaliciousFlag {
    pub agent_id: String,
    pub reason: String,
}

/// Immutable outcome of one consensus evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusResult {
    /// Agreement score (0.0–1.0); formula depends on `mode`.
    pub score: f64,
    /// Threshold the score was compared against.
    pub threshold: f64,
    /// Whether the consensus gate passed.
    pub passed: bool,
    /// The votes that were evaluated.
    pub votes: Vec<ValidatorVote>,
    /// Quorum size used by the Byzantine path.
    pub quorum_size: Option<usize>,
    /// Agents flagged by malicious detection.
    pub malicious_agents: Vec<MaliciousFlag>,
    /// Byzantine phase-check outcomes.
    pub pbft_phases: Option<PbftPhases>,
    /// Which path produced this result.
    pub mode: ConsensusMode,
    /// True when the Byzantine path failed and simple mode was used.
    pub degraded: bool,
    pub timestamp: DateTime<Utc>,
}

impl ConsensusResult {
    /// PASS votes in the evaluated set.
    pub fn pass_count(&self) -> usize {
        self.votes.iter().filter(|v| v.vote == Vote::Pass).count()
    }
}
