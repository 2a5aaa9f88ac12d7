//! End-to-end phase orchestration: confidence gate, consensus rounds,
//! feedback injection, escalation.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::sync::Mutex;

use swarm_consensus::config::CoordinationConfig;
use swarm_consensus::consensus::{ValidatorVote, Vote};
use swarm_consensus::events::EventBus;
use swarm_consensus::executor::{
    AgentExecutor, AgentInstructions, AgentResponse, ExecutorError, ExecutorResult,
};
use swarm_consensus::phase::{
    AgentSpec, Decision, IterationOrchestrator, OrchestratorError, PhaseOutcome, PhaseTask,
};

/// Route orchestrator tracing through the test harness; honors RUST_LOG.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Executor that produces confident primary work and scripted validator
/// votes: FAIL until `validators_pass_from_round`, PASS afterwards.
struct ScriptedExecutor {
    log: Mutex<Vec<AgentInstructions>>,
    primary_confidence: f64,
    validators_pass_from_round: u32,
}

impl ScriptedExecutor {
    fn new(primary_confidence: f64, validators_pass_from_round: u32) -> Self {
        Self {
            log: Mutex::new(Vec::new()),
            primary_confidence,
            validators_pass_from_round,
        }
    }

    async fn instructions_seen(&self) -> Vec<AgentInstructions> {
        self.log.lock().await.clone()
    }
}

#[async_trait]
impl AgentExecutor for ScriptedExecutor {
    async fn execute(&self, instructions: AgentInstructions) -> ExecutorResult<AgentResponse> {
        self.log.lock().await.push(instructions.clone());

        if instructions.agent_type == "validator" {
            let vote = if instructions.iteration >= self.validators_pass_from_round {
                ValidatorVote::new(
                    instructions.agent_id.clone(),
                    "validator",
                    0.95,
                    Vote::Pass,
                    "deliverable satisfies the task requirements",
                    vec![],
                )
            } else {
                ValidatorVote::new(
                    instructions.agent_id.clone(),
                    "validator",
                    0.30,
                    Vote::Fail,
                    "deliverable misses key requirements",
                    vec!["missing error handling".to_string()],
                )
            };
            return Ok(AgentResponse {
                agent_id: instructions.agent_id,
                agent_type: "validator".to_string(),
                confidence: vote.confidence,
                reasoning: vote.reasoning.clone(),
                deliverable: serde_json::to_value(&vote).unwrap(),
                blockers: vec![],
                timestamp: Utc::now(),
            });
        }

        Ok(AgentResponse {
            agent_id: instructions.agent_id,
            agent_type: instructions.agent_type,
            deliverable: json!({"summary": "implemented the task", "files": ["src/lib.rs"]}),
            confidence: self.primary_confidence,
            reasoning: "implementation complete with tests".to_string(),
            blockers: vec![],
            timestamp: Utc::now(),
        })
    }
}

/// Executor whose every call fails, to drive the breaker open.
struct FailingExecutor;

#[async_trait]
impl AgentExecutor for FailingExecutor {
    async fn execute(&self, _instructions: AgentInstructions) -> ExecutorResult<AgentResponse> {
        Err(ExecutorError::Unavailable("backend down".to_string()))
    }
}

fn task() -> PhaseTask {
    PhaseTask {
        description: "implement the retry layer".to_string(),
        primary_agents: vec![
            AgentSpec::new("coder-1", "coder"),
            AgentSpec::new("coder-2", "coder"),
        ],
        validator_agents: vec![
            AgentSpec::new("validator-1", "validator"),
            AgentSpec::new("validator-2", "validator"),
            AgentSpec::new("validator-3", "validator"),
        ],
    }
}

#[tokio::test]
async fn test_phase_succeeds_first_round() {
    init_tracing();
    let executor = Arc::new(ScriptedExecutor::new(0.9, 1));
    let orchestrator =
        IterationOrchestrator::new(CoordinationConfig::default(), executor.clone());

    let outcome = orchestrator.run_phase("phase-1", &task()).await.unwrap();

    match outcome {
        PhaseOutcome::Succeeded {
            decision,
            consensus,
            iterations,
        } => {
            assert_eq!(decision.decision, Decision::Proceed);
            assert!(consensus.passed);
            assert_eq!(iterations.loop2, 1);
            assert_eq!(iterations.loop3, 0, "gate pass must reset the inner counter");
        }
        other => panic!("expected success, got {other:?}"),
    }

    // No feedback was ever injected.
    let seen = executor.instructions_seen().await;
    assert!(seen.iter().all(|i| i.injected_feedback.is_none()));
}

#[tokio::test]
async fn test_escalates_after_max_rounds() {
    init_tracing();
    let mut config = CoordinationConfig::default();
    config.orchestrator.max_loop2_iterations = 2;
    // Validators never pass.
    let executor = Arc::new(ScriptedExecutor::new(0.9, u32::MAX));
    let orchestrator = IterationOrchestrator::new(config, executor);

    let outcome = orchestrator.run_phase("phase-1", &task()).await.unwrap();

    match outcome {
        PhaseOutcome::Escalated {
            reason,
            iterations,
            feedback_history,
        } => {
            assert!(reason.contains("2 rounds"), "reason: {reason}");
            assert_eq!(iterations.loop2, 2);
            assert_eq!(feedback_history.len(), 2);
            assert!(
                !feedback_history[0].actionable_steps.is_empty(),
                "first round must capture the validators' blockers"
            );
        }
        other => panic!("expected escalation, got {other:?}"),
    }
}

#[tokio::test]
async fn test_feedback_injected_into_second_round() {
    init_tracing();
    // Round 1 fails, round 2 passes.
    let executor = Arc::new(ScriptedExecutor::new(0.9, 2));
    let orchestrator =
        IterationOrchestrator::new(CoordinationConfig::default(), executor.clone());

    let outcome = orchestrator.run_phase("phase-1", &task()).await.unwrap();
    assert!(!outcome.escalated());

    let seen = executor.instructions_seen().await;
    let primaries: Vec<&AgentInstructions> =
        seen.iter().filter(|i| i.agent_type == "coder").collect();
    // Two primaries per round, two rounds.
    assert_eq!(primaries.len(), 4);
    assert!(primaries[0].injected_feedback.is_none());
    assert!(primaries[1].injected_feedback.is_none());

    let second_round = primaries[2]
        .injected_feedback
        .as_deref()
        .expect("second round must carry injected feedback");
    assert!(second_round.contains("Validator feedback"));
    assert!(second_round.contains("missing error handling"));
}

#[tokio::test]
async fn test_low_confidence_exhausts_inner_loop() {
    init_tracing();
    let bus = EventBus::new().shared();
    let mut receiver = bus.subscribe();

    let mut config = CoordinationConfig::default();
    config.orchestrator.max_loop2_iterations = 2;
    config.orchestrator.max_loop3_iterations = 3;
    // Primaries never clear the 0.75 confidence gate.
    let executor = Arc::new(ScriptedExecutor::new(0.5, 1));
    let orchestrator = IterationOrchestrator::new(config, executor).with_bus(bus);

    let outcome = orchestrator.run_phase("phase-1", &task()).await.unwrap();

    match outcome {
        PhaseOutcome::Escalated {
            reason, iterations, ..
        } => {
            // Inner exhaustion fails each round; outer exhaustion escalates.
            assert!(reason.contains("2 rounds"), "reason: {reason}");
            assert_eq!(iterations.loop2, 2);
            assert_eq!(
                iterations.loop3, 3,
                "inner counter must persist, not reset per round"
            );
        }
        other => panic!("expected escalation, got {other:?}"),
    }

    let mut exhausted_rounds = 0;
    while let Ok(event) = receiver.try_recv() {
        if event.event_type() == "inner_loop_exhausted" {
            exhausted_rounds += 1;
        }
    }
    assert_eq!(exhausted_rounds, 2, "both rounds hit the exhausted inner counter");
}

#[tokio::test]
async fn test_open_circuit_escalates() {
    init_tracing();
    let orchestrator =
        IterationOrchestrator::new(CoordinationConfig::default(), Arc::new(FailingExecutor));

    let outcome = orchestrator.run_phase("phase-1", &task()).await.unwrap();

    match outcome {
        PhaseOutcome::Escalated { reason, .. } => {
            assert!(reason.contains("primary-execution"), "reason: {reason}");
        }
        other => panic!("expected escalation, got {other:?}"),
    }
}

#[tokio::test]
async fn test_phase_without_validators_is_an_error() {
    init_tracing();
    let orchestrator = IterationOrchestrator::new(
        CoordinationConfig::default(),
        Arc::new(ScriptedExecutor::new(0.9, 1)),
    );
    let mut task = task();
    task.validator_agents.clear();

    let result = orchestrator.run_phase("phase-1", &task).await;
    assert!(matches!(result, Err(OrchestratorError::NoAgents { .. })));
}

#[tokio::test]
async fn test_events_published_through_a_phase() {
    init_tracing();
    let bus = EventBus::new().shared();
    let mut receiver = bus.subscribe();

    let mut config = CoordinationConfig::default();
    config.orchestrator.max_loop2_iterations = 1;
    let orchestrator =
        IterationOrchestrator::new(config, Arc::new(ScriptedExecutor::new(0.9, u32::MAX)))
            .with_bus(bus);

    let outcome = orchestrator.run_phase("phase-1", &task()).await.unwrap();
    assert!(outcome.escalated());

    let mut seen = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        seen.push(event.event_type());
    }
    for expected in [
        "confidence_gate_evaluated",
        "consensus_evaluated",
        "feedback_captured",
        "phase_escalated",
    ] {
        assert!(seen.contains(&expected), "missing {expected} in {seen:?}");
    }
}
