//! Lifecycle hook seam.
//!
//! Optional callbacks invoked around blocking waits and signal receipt.
//! Hook failures are logged by the caller and never propagate.

use async_trait::async_trait;

/// Error type for hook execution.
#[derive(Debug, thiserror::Error)]
#[error("hook failed: {0}")]
pub struct HookError(pub String);

/// Result type for hook execution.
pub type HookResult = Result<(), HookError>;

/// Lifecycle callbacks for external integrations (scripts, notifications).
///
/// All methods default to no-ops so implementors override only what they
/// need.
#[async_trait]
pub trait LifecycleHooks: Send + Sync {
    /// A coordinator is about to start waiting on acks.
    async fn on_blocking_start(&self, coordinator_id: &str, signal_id: &str) -> HookResult {
        let _ = (coordinator_id, signal_id);
        Ok(())
    }

    /// An ack wait ended with coordinators still missing.
    async fn on_blocking_timeout(
        &self,
        coordinator_id: &str,
        signal_id: &str,
        waited_ms: u64,
    ) -> HookResult {
        let _ = (coordinator_id, signal_id, waited_ms);
        Ok(())
    }

    /// A signal is about to be acknowledged and processed.
    async fn on_signal_received(
        &self,
        coordinator_id: &str,
        signal_id: &str,
        signal_type: &str,
    ) -> HookResult {
        let _ = (coordinator_id, signal_id, signal_type);
        Ok(())
    }
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

#[async_trait]
impl LifecycleHooks for NoopHooks {}
