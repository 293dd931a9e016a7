//! Audit events emitted by the ledger and the job engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::collab::AuditSink;
use crate::types::{ActionType, DecisionKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    DecisionRecorded {
        decision_id: String,
        proposal_id: String,
        organization_id: String,
        action_type: ActionType,
        decision: DecisionKind,
        decided_by_user_id: String,
        at: DateTime<Utc>,
    },
    /// A caller tried to act on another tenant's record.
    OrgMismatch {
        context: String,
        expected_org: String,
        actual_org: String,
        at: DateTime<Utc>,
    },
    /// The audit log was read without tenant scoping.
    PlatformAuditRead { at: DateTime<Utc> },
}

/// Writes audit events to the `govern::audit` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) {
        let body = serde_json::to_string(event).unwrap_or_else(|_| format!("{event:?}"));
        match event {
            AuditEvent::DecisionRecorded { .. } => {
                tracing::info!(target: "govern::audit", event = %body, "decision recorded")
            }
            AuditEvent::OrgMismatch { .. } => {
                tracing::warn!(target: "govern::audit", event = %body, "cross-tenant access refused")
            }
            AuditEvent::PlatformAuditRead { .. } => {
                tracing::warn!(target: "govern::audit", event = %body, "platform-wide audit read")
            }
        }
    }
}
