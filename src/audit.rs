//! Audit/persistence seam.
//!
//! Fire-and-forget event recording: implementations must swallow their own
//! failures (log-and-continue) so auditing can never abort a coordination
//! operation.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

/// How concerning an audited event is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// Shared reference to an audit sink.
pub type SharedAuditSink = Arc<dyn AuditSink>;

/// External audit collaborator.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Record an event. Must not fail the caller.
    async fn record_event(&self, category: &str, payload: serde_json::Value, risk: RiskLevel);
}

/// Audit sink that drops everything (default).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAudit;

#[async_trait]
impl AuditSink for NullAudit {
    async fn record_event(&self, category: &str, _payload: serde_json::Value, risk: RiskLevel) {
        debug!(category, ?risk, "audit event dropped (null sink)");
    }
}

/// One recorded audit entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub category: String,
    pub payload: serde_json::Value,
    pub risk: RiskLevel,
    pub timestamp: DateTime<Utc>,
}

/// In-memory audit sink for tests and diagnostics.
#[derive(Debug, Default)]
pub struct MemoryAudit {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAudit {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared trait-object reference.
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Snapshot of everything recorded so far.
    pub async fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAudit {
    async fn record_event(&self, category: &str, payload: serde_json::Value, risk: RiskLevel) {
        self.records.lock().await.push(AuditRecord {
            category: category.to_string(),
            payload,
            risk,
            timestamp: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_audit_records() {
        let sink = MemoryAudit::new();
        sink.record_event("malicious_agent", json!({"agent_id": "v3"}), RiskLevel::High)
            .await;

        let records = sink.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].category, "malicious_agent");
        assert_eq!(records[0].risk, RiskLevel::High);
    }

    #[test]
    fn test_risk_level_ordering() {
        assert!(RiskLevel::Critical > RiskLevel::High);
        assert!(RiskLevel::High > RiskLevel::Low);
    }
}
