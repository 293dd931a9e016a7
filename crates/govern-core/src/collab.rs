//! Seams to the systems that surround the governance core.
//!
//! Everything here is implemented outside the pipeline: the product's
//! proposal storage, its org/role directory, the connectors that perform
//! side effects, and the email/push transport. [`crate::store::GovernStore`]
//! provides local implementations of the lookup traits so the CLI can run
//! stand-alone.

use async_trait::async_trait;
use serde_json::Value;

use crate::audit::AuditEvent;
use crate::error::Result;
use crate::jobs::{ApprovedAction, PlaybookStep};
use crate::outbox::OutboxMessage;
use crate::proposal::ActionProposal;

/// Source of proposal snapshots.
pub trait ProposalStore: Send + Sync {
    fn get_proposal(&self, proposal_id: &str) -> Result<Option<ActionProposal>>;
}

/// Regulatory flag and role lookup consulted by the policy engine.
pub trait PolicyDirectory: Send + Sync {
    fn regulatory_mode(&self, organization_id: &str, project_id: Option<&str>) -> Result<bool>;
    fn active_roles(&self, organization_id: &str, project_id: Option<&str>) -> Result<Vec<String>>;
}

pub trait OrgDirectory: Send + Sync {
    /// The user who receives escalations for `organization_id`.
    fn find_org_admin(&self, organization_id: &str) -> Result<Option<String>>;
}

/// Performs the side effect of an approved action.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Circuit-breaker key for the system `action` talks to.
    fn resource_name(&self, action: &ApprovedAction) -> String {
        format!("connector:{}", action.action_type.as_str().to_ascii_lowercase())
    }

    async fn execute(&self, action: &ApprovedAction) -> Result<Value>;

    async fn advance_playbook_step(&self, step: &PlaybookStep) -> Result<Value>;
}

/// Delivers one notification. Must be idempotent on the message id, since
/// the outbox delivers at least once.
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn deliver(&self, message: &OutboxMessage) -> Result<()>;
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent);
}
