//! Consensus evaluation for validator vote sets.

mod evaluator;
mod types;

pub use evaluator::{quorum_size, ConsensusEvaluator};
pub use types::{ConsensusMode, ConsensusResult, MaliciousFlag, PbftPhases, ValidatorVote, Vote};
