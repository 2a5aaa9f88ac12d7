//! Full signal/ack handshake across coordinators over a shared store.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde_json::json;

use swarm_consensus::config::SignalConfig;
use swarm_consensus::events::EventBus;
use swarm_consensus::signal::{AckSigner, SignalProtocol};
use swarm_consensus::store::MemoryStore;

fn protocol_over(store: Arc<MemoryStore>) -> anyhow::Result<SignalProtocol> {
    Ok(SignalProtocol::new(
        store,
        AckSigner::new("shared-secret")?,
        SignalConfig::default(),
    ))
}

#[tokio::test]
async fn test_full_handshake() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let sender = protocol_over(store.clone())?;
    let receiver = protocol_over(store.clone())?;

    let outcome = sender
        .send_signal(
            "phase-coordinator",
            "consensus-coordinator",
            "phase_complete",
            3,
            json!({"phase": "implementation"}),
        )
        .await?;
    assert!(!outcome.is_duplicate);

    // The receiver reads the pending signal and acknowledges it.
    let signal = receiver
        .pending_signal("consensus-coordinator")
        .await?
        .context("signal must be pending")?;
    assert_eq!(signal.signal_id, outcome.message_id);
    assert_eq!(signal.iteration, 3);

    let ack = receiver
        .acknowledge_signal("consensus-coordinator", &signal)
        .await?;
    assert_eq!(ack.iteration, 3);

    // The sender collects the ack.
    let result = sender
        .wait_for_acks(
            "phase-coordinator",
            &["consensus-coordinator".to_string()],
            &signal.signal_id,
            Duration::from_secs(1),
        )
        .await?;
    assert!(result.complete());
    assert_eq!(
        result.received["consensus-coordinator"].signal_id,
        signal.signal_id
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_wait_collects_late_ack() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let waiter = Arc::new(protocol_over(store.clone())?);
    let late = Arc::new(protocol_over(store.clone())?);

    let outcome = waiter
        .send_signal("sender-1", "coord-1", "review_request", 1, json!({}))
        .await?;
    let signal = waiter
        .pending_signal("coord-1")
        .await?
        .context("signal must be pending")?;

    // The coordinator acks 350ms into the wait.
    let signal_for_task = signal.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(350)).await;
        late.acknowledge_signal("coord-1", &signal_for_task)
            .await
            .unwrap();
    });

    let result = waiter
        .wait_for_acks(
            "sender-1",
            &["coord-1".to_string()],
            &outcome.message_id,
            Duration::from_secs(2),
        )
        .await?;
    assert!(result.complete());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_wait_reports_missing_coordinator() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let protocol = protocol_over(store.clone())?;

    let outcome = protocol
        .send_signal("sender-1", "coord-1", "review_request", 1, json!({}))
        .await?;
    let signal = protocol
        .pending_signal("coord-1")
        .await?
        .context("signal must be pending")?;
    protocol.acknowledge_signal("coord-1", &signal).await?;

    let coordinators = vec!["coord-1".to_string(), "coord-2".to_string()];
    let result = protocol
        .wait_for_acks("sender-1", &coordinators, &outcome.message_id, Duration::from_millis(500))
        .await?;

    assert!(!result.complete());
    assert_eq!(result.missing, vec!["coord-2".to_string()]);
    assert_eq!(result.received.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_signal_and_ack_events() -> anyhow::Result<()> {
    let bus = EventBus::new().shared();
    let mut receiver = bus.subscribe();

    let store = Arc::new(MemoryStore::new());
    let protocol = protocol_over(store)?.with_bus(bus);

    protocol
        .send_signal("sender-1", "coord-1", "phase_complete", 1, json!({}))
        .await?;
    let signal = protocol
        .pending_signal("coord-1")
        .await?
        .context("signal must be pending")?;
    protocol.acknowledge_signal("coord-1", &signal).await?;
    // Second ack is served from the store.
    protocol.acknowledge_signal("coord-1", &signal).await?;

    let mut seen = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        seen.push(event);
    }
    assert_eq!(seen[0].event_type(), "signal_sent");
    assert_eq!(seen[1].event_type(), "ack_recorded");
    assert_eq!(seen[2].event_type(), "ack_recorded");
    Ok(())
}

#[tokio::test]
async fn test_acks_from_wrong_secret_never_complete_the_wait() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let sender = protocol_over(store.clone())?;
    let imposter = SignalProtocol::new(
        store.clone(),
        AckSigner::new("wrong-secret")?,
        SignalConfig::default(),
    );

    let outcome = sender
        .send_signal("sender-1", "coord-1", "phase_complete", 1, json!({}))
        .await?;
    let signal = sender
        .pending_signal("coord-1")
        .await?
        .context("signal must be pending")?;
    imposter.acknowledge_signal("coord-1", &signal).await?;

    let result = sender
        .wait_for_acks(
            "sender-1",
            &["coord-1".to_string()],
            &outcome.message_id,
            Duration::from_millis(250),
        )
        .await?;
    assert!(!result.complete(), "a foreign-secret ack must not count");
    Ok(())
}
