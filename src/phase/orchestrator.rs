//! Nested-iteration phase orchestrator.
//!
//! One phase runs an outer loop of consensus rounds. Each round executes
//! the primary agents until their self-reported confidence clears the
//! gate, then puts the work to the validators. A failed round captures
//! feedback and injects it into the next round's instructions; exhausting
//! either counter ends the phase in escalation. Escalation is an outcome,
//! not an error — `run_phase` only errors on unusable input.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::SharedAuditSink;
use crate::breaker::{BreakerError, CircuitBreaker};
use crate::config::CoordinationConfig;
use crate::consensus::{ConsensusEvaluator, ConsensusResult, ValidatorVote, Vote};
use crate::events::{CoordinationEvent, SharedEventBus};
use crate::executor::{
    AgentExecutor, AgentInstructions, AgentReply, AgentResponse, ExecutorError,
};
use crate::feedback::{ConsensusFeedback, DedupRegistry, FeedbackCapture, FeedbackRenderer};

use super::decision::{Decision, DecisionGate, ProductOwnerDecision, ThresholdDecisionGate};
use super::state::{AgentSpec, ConfidenceScore, IterationState, PhaseTask};

const PRIMARY_CIRCUIT: &str = "primary-execution";
const VALIDATION_CIRCUIT: &str = "consensus-validation";

/// Error type for phase orchestration.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// A phase needs at least one primary and one validator.
    #[error("phase '{phase_id}' has no {role} agents")]
    NoAgents { phase_id: String, role: String },
}

/// Result type for phase orchestration.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// How a phase ended.
#[derive(Debug, Clone)]
pub enum PhaseOutcome {
    /// Consensus passed and the decision gate accepted the work.
    Succeeded {
        decision: ProductOwnerDecision,
        consensus: ConsensusResult,
        iterations: IterationState,
    },
    /// The phase was handed off to a human.
    Escalated {
        reason: String,
        iterations: IterationState,
        feedback_history: Vec<ConsensusFeedback>,
    },
}

impl PhaseOutcome {
    /// Whether the phase ended in escalation.
    pub fn escalated(&self) -> bool {
        matches!(self, Self::Escalated { .. })
    }
}

/// Runs phases end to end: primaries, confidence gate, validators,
/// consensus, feedback, decision.
pub struct IterationOrchestrator {
    config: CoordinationConfig,
    executor: Arc<dyn AgentExecutor>,
    evaluator: ConsensusEvaluator,
    gate: Box<dyn DecisionGate>,
    capture: FeedbackCapture,
    renderer: FeedbackRenderer,
    primary_breaker: CircuitBreaker,
    validation_breaker: CircuitBreaker,
    bus: Option<SharedEventBus>,
    audit: Option<SharedAuditSink>,
}

impl IterationOrchestrator {
    /// Create an orchestrator with the default threshold decision gate.
    pub fn new(config: CoordinationConfig, executor: Arc<dyn AgentExecutor>) -> Self {
        let evaluator = ConsensusEvaluator::new(config.consensus.clone());
        let primary_breaker = CircuitBreaker::new(PRIMARY_CIRCUIT, config.breaker.clone());
        let validation_breaker = CircuitBreaker::new(VALIDATION_CIRCUIT, config.breaker.clone());
        Self {
            capture: FeedbackCapture::new(config.feedback.clone()),
            renderer: FeedbackRenderer::new(config.feedback.clone()),
            config,
            executor,
            evaluator,
            gate: Box::new(ThresholdDecisionGate::default()),
            primary_breaker,
            validation_breaker,
            bus: None,
            audit: None,
        }
    }

    /// Attach an event bus; threads it through the breakers and evaluator.
    pub fn with_bus(mut self, bus: SharedEventBus) -> Self {
        self.bus = Some(bus);
        self.rewire();
        self
    }

    /// Attach an audit sink for malicious-agent records.
    pub fn with_audit(mut self, audit: SharedAuditSink) -> Self {
        self.audit = Some(audit);
        self.rewire();
        self
    }

    /// Replace the decision gate.
    pub fn with_decision_gate(mut self, gate: Box<dyn DecisionGate>) -> Self {
        self.gate = gate;
        self
    }

    // Builders run before any phase, so rebuilding wired components is safe.
    fn rewire(&mut self) {
        let mut evaluator = ConsensusEvaluator::new(self.config.consensus.clone());
        let mut primary = CircuitBreaker::new(PRIMARY_CIRCUIT, self.config.breaker.clone());
        let mut validation = CircuitBreaker::new(VALIDATION_CIRCUIT, self.config.breaker.clone());
        if let Some(bus) = &self.bus {
            evaluator = evaluator.with_bus(bus.clone());
            primary = primary.with_bus(bus.clone());
            validation = validation.with_bus(bus.clone());
        }
        if let Some(audit) = &self.audit {
            evaluator = evaluator.with_audit(audit.clone());
        }
        self.evaluator = evaluator;
        self.primary_breaker = primary;
        self.validation_breaker = validation;
    }

    /// Run one phase to completion or escalation.
    pub async fn run_phase(&self, phase_id: &str, task: &PhaseTask) -> OrchestratorResult<PhaseOutcome> {
        if task.primary_agents.is_empty() {
            return Err(OrchestratorError::NoAgents {
                phase_id: phase_id.to_string(),
                role: "primary".to_string(),
            });
        }
        if task.validator_agents.is_empty() {
            return Err(OrchestratorError::NoAgents {
                phase_id: phase_id.to_string(),
                role: "validator".to_string(),
            });
        }

        let run_id = Uuid::new_v4();
        info!(phase_id, %run_id, "phase started");

        let orchestrator_cfg = &self.config.orchestrator;
        let mut state = IterationState::new();
        let mut registry = DedupRegistry::new(self.capture.config());
        let mut feedback_history: Vec<ConsensusFeedback> = Vec::new();
        let mut injected: Option<String> = None;

        while state.loop2 < orchestrator_cfg.max_loop2_iterations {
            state.next_round();
            info!(phase_id, round = state.loop2, "starting consensus round");

            // Inner loop: primaries until the confidence gate passes.
            // Exhaustion fails this round only; the counter persists across
            // rounds, so an exhausted group burns the remaining outer
            // rounds instead of getting a fresh inner budget.
            let responses = loop {
                if state.loop3 >= orchestrator_cfg.max_loop3_iterations {
                    self.publish_inner_exhausted(phase_id, state.loop2);
                    break None;
                }

                let responses = match self
                    .execute_group(&self.primary_breaker, &task.primary_agents, &task.description, injected.as_deref(), state.loop3)
                    .await
                {
                    Ok(responses) => responses,
                    Err(reason) => {
                        return Ok(self.escalate(phase_id, state, feedback_history, reason));
                    }
                };

                if responses.is_empty() {
                    state.record_inner_attempt();
                    continue;
                }

                let lowest = responses
                    .iter()
                    .map(|r| r.confidence)
                    .fold(f64::INFINITY, f64::min);
                let passed = lowest >= orchestrator_cfg.confidence_threshold;
                self.publish(CoordinationEvent::ConfidenceGateEvaluated {
                    phase_id: phase_id.to_string(),
                    iteration: state.loop3,
                    lowest_confidence: lowest,
                    threshold: orchestrator_cfg.confidence_threshold,
                    passed,
                    timestamp: Utc::now(),
                });

                if passed {
                    state.reset_inner();
                    break Some(responses);
                }

                debug!(phase_id, lowest, "confidence gate failed, re-running primaries");
                state.record_inner_attempt();
            };
            let Some(responses) = responses else {
                // Failed gate result for this round; the outer loop decides.
                continue;
            };

            // Validators vote on the primaries' work.
            let validation_task = validation_task(&task.description, &responses);
            let validator_responses = match self
                .execute_group(&self.validation_breaker, &task.validator_agents, &validation_task, None, state.loop2)
                .await
            {
                Ok(responses) => responses,
                Err(reason) => {
                    return Ok(self.escalate(phase_id, state, feedback_history, reason));
                }
            };
            let votes = collect_votes(&validator_responses);

            let consensus = self.evaluator.evaluate(&votes).await;
            self.publish(CoordinationEvent::ConsensusEvaluated {
                phase_id: phase_id.to_string(),
                score: consensus.score,
                threshold: consensus.threshold,
                passed: consensus.passed,
                mode: consensus.mode,
                degraded: consensus.degraded,
                timestamp: Utc::now(),
            });

            if consensus.passed {
                let scores: Vec<ConfidenceScore> =
                    responses.iter().map(ConfidenceScore::from).collect();
                let decision = self.gate.decide(&consensus, &scores).await;
                if decision.decision == Decision::Escalate {
                    return Ok(self.escalate(phase_id, state, feedback_history, decision.rationale));
                }
                self.publish(CoordinationEvent::PhaseCompleted {
                    phase_id: phase_id.to_string(),
                    decision: decision.decision,
                    score: consensus.score,
                    timestamp: Utc::now(),
                });
                info!(phase_id, decision = %decision.decision, score = consensus.score, "phase completed");
                return Ok(PhaseOutcome::Succeeded {
                    decision,
                    consensus,
                    iterations: state,
                });
            }

            // Failed round: capture feedback for the next one.
            let feedback = self.capture.capture(
                &mut registry,
                phase_id,
                state.loop2,
                &consensus,
                &feedback_history,
            );
            self.publish(CoordinationEvent::FeedbackCaptured {
                phase_id: phase_id.to_string(),
                iteration: state.loop2,
                step_count: feedback.actionable_steps.len(),
                timestamp: Utc::now(),
            });
            injected = self.renderer.render(&feedback);
            feedback_history.push(feedback);
        }

        Ok(self.escalate(
            phase_id,
            state,
            feedback_history,
            format!(
                "consensus not reached within {} rounds",
                orchestrator_cfg.max_loop2_iterations
            ),
        ))
    }

    /// Run a group of agents concurrently through a breaker.
    ///
    /// Individual agent failures are tolerated (the agent just produces no
    /// response this attempt); an open circuit aborts the phase.
    async fn execute_group(
        &self,
        breaker: &CircuitBreaker,
        agents: &[AgentSpec],
        task: &str,
        injected_feedback: Option<&str>,
        iteration: u32,
    ) -> Result<Vec<AgentResponse>, String> {
        let calls = agents.iter().map(|agent| {
            let instructions = AgentInstructions {
                agent_id: agent.agent_id.clone(),
                agent_type: agent.agent_type.clone(),
                task: task.to_string(),
                injected_feedback: injected_feedback.map(String::from),
                iteration,
            };
            let executor = Arc::clone(&self.executor);
            async move {
                let result: Result<AgentResponse, BreakerError<ExecutorError>> = breaker
                    .execute(move || async move { executor.execute(instructions).await })
                    .await;
                (agent.agent_id.clone(), result)
            }
        });

        let mut responses = Vec::with_capacity(agents.len());
        for (agent_id, result) in join_all(calls).await {
            match result {
                Ok(response) => responses.push(response),
                Err(BreakerError::CircuitOpen {
                    circuit,
                    state,
                    retry_after_ms,
                }) => {
                    return Err(format!(
                        "circuit '{circuit}' is {state}; next attempt in {retry_after_ms}ms"
                    ));
                }
                Err(err) => {
                    warn!(%agent_id, error = %err, "agent execution failed");
                }
            }
        }
        Ok(responses)
    }

    fn escalate(
        &self,
        phase_id: &str,
        iterations: IterationState,
        feedback_history: Vec<ConsensusFeedback>,
        reason: String,
    ) -> PhaseOutcome {
        warn!(phase_id, %reason, "phase escalated");
        self.publish(CoordinationEvent::PhaseEscalated {
            phase_id: phase_id.to_string(),
            reason: reason.clone(),
            timestamp: Utc::now(),
        });
        PhaseOutcome::Escalated {
            reason,
            iterations,
            feedback_history,
        }
    }

    fn publish_inner_exhausted(&self, phase_id: &str, consensus_round: u32) {
        self.publish(CoordinationEvent::InnerLoopExhausted {
            phase_id: phase_id.to_string(),
            consensus_round,
            timestamp: Utc::now(),
        });
    }

    fn publish(&self, event: CoordinationEvent) {
        if let Some(bus) = &self.bus {
            bus.publish(event);
        }
    }
}

/// Compose the task validators see: the original description plus the
/// primaries' deliverables.
fn validation_task(description: &str, responses: &[AgentResponse]) -> String {
    let deliverables: Vec<serde_json::Value> = responses
        .iter()
        .map(|r| {
            json!({
                "agent_id": r.agent_id,
                "confidence": r.confidence,
                "deliverable": r.deliverable,
            })
        })
        .collect();
    format!(
        "Review the following work and vote PASS or FAIL.\nTask: {description}\nDeliverables: {}",
        serde_json::Value::Array(deliverables)
    )
}

/// Normalize validator responses into votes.
///
/// A structured vote payload is used as-is. A plain response is
/// synthesized into a vote from the validator's own confidence (PASS at
/// 0.5 and above). Malformed payloads are logged and skipped so one
/// broken validator cannot take down the round.
fn collect_votes(responses: &[AgentResponse]) -> Vec<ValidatorVote> {
    let mut votes = Vec::with_capacity(responses.len());
    for response in responses {
        match AgentReply::from_value(&response.deliverable) {
            Ok(AgentReply::Vote(vote)) => votes.push(vote),
            Ok(AgentReply::Response(_)) => {
                votes.push(ValidatorVote::new(
                    response.agent_id.clone(),
                    response.agent_type.clone(),
                    response.confidence,
                    if response.confidence >= 0.5 {
                        Vote::Pass
                    } else {
                        Vote::Fail
                    },
                    response.reasoning.clone(),
                    response.blockers.clone(),
                ));
            }
            Err(err) => {
                warn!(agent_id = %response.agent_id, error = %err, "skipping malformed validator reply");
            }
        }
    }
    votes
}
