//! Consensus coordination core for multi-agent swarms.
//!
//! Provides the fault-tolerance and agreement layer between a coordinator
//! and its agent groups:
//!
//! - [`breaker`] — per-circuit call protection with timeout, exponential
//!   backoff, and half-open probing
//! - [`signal`] — idempotent cross-coordinator signals with HMAC-signed
//!   acks over a shared keyed store
//! - [`consensus`] — simple and Byzantine vote evaluation with
//!   malicious-agent detection
//! - [`phase`] — the nested-iteration orchestrator: confidence gate,
//!   consensus rounds, feedback injection, decision gate, escalation
//! - [`feedback`] — capture of failed-round criticism into sanitized,
//!   prioritized steps for the next round
//!
//! Agent execution is pluggable through [`executor::AgentExecutor`];
//! persistence is pluggable through [`store::KeyedStore`]. Everything
//! observable is published on the [`events`] bus.

pub mod audit;
pub mod breaker;
pub mod cache;
pub mod config;
pub mod consensus;
pub mod events;
pub mod executor;
pub mod feedback;
pub mod hooks;
pub mod phase;
pub mod signal;
pub mod store;

pub use breaker::{BreakerError, BreakerState, CircuitBreaker};
pub use config::CoordinationConfig;
pub use consensus::{ConsensusEvaluator, ConsensusResult, ValidatorVote, Vote};
pub use events::{CoordinationEvent, EventBus};
pub use executor::{AgentExecutor, AgentInstructions, AgentResponse};
pub use phase::{IterationOrchestrator, PhaseOutcome, PhaseTask};
pub use signal::{AckSigner, SignalProtocol};
pub use store::{KeyedStore, MemoryStore};
