//! Decision ledger: the immutable record of human dispositions.
//!
//! `action_decisions` is keyed by proposal id. Recording checks for an
//! existing row and inserts inside one write transaction, so of two reviewers
//! racing on the same proposal exactly one succeeds and the other gets
//! [`GovernError::DecisionConflict`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{ReadableTable, WriteTransaction};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::audit::AuditEvent;
use crate::clock::Clock;
use crate::collab::{AuditSink, ProposalStore};
use crate::error::{db_err, GovernError, Result};
use crate::proposal::ActionProposal;
use crate::store::{get_json, put_json, scan_json, GovernStore, DECISIONS, DECISION_IDS};
use crate::types::{ActionType, DecisionKind};

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDecision {
    pub id: Uuid,
    pub proposal_id: String,
    pub organization_id: String,
    pub decision: DecisionKind,
    pub decided_by_user_id: String,
    /// The proposal as it was when decided.
    pub proposal_snapshot: ActionProposal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_payload: Option<Map<String, Value>>,
    pub decided_at: DateTime<Utc>,
}

impl ActionDecision {
    /// Snapshot payload with the reviewer's edits applied on top.
    pub fn effective_payload(&self) -> Map<String, Value> {
        let mut payload = self.proposal_snapshot.payload_preview.clone();
        if let Some(edits) = &self.modified_payload {
            for (k, v) in edits {
                payload.insert(k.clone(), v.clone());
            }
        }
        payload
    }
}

/// Decision input as it arrives from the API layer. Fields are untyped
/// strings so that each validation step can report its own error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordDecision {
    #[serde(default)]
    pub proposal_id: String,
    #[serde(default)]
    pub organization_id: String,
    #[serde(default)]
    pub decision: String,
    #[serde(default)]
    pub decided_by_user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_payload: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditScope {
    Organization(String),
    /// Superadmin bypass: no tenant clause at all.
    AllOrganizations,
}

#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub decision: Option<DecisionKind>,
    pub action_type: Option<ActionType>,
    pub decided_by: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl AuditFilter {
    fn matches(&self, d: &ActionDecision) -> bool {
        self.decision.map_or(true, |k| d.decision == k)
            && self
                .action_type
                .map_or(true, |a| d.proposal_snapshot.action_type == a)
            && self
                .decided_by
                .as_deref()
                .map_or(true, |u| d.decided_by_user_id == u)
            && self.since.map_or(true, |t| d.decided_at >= t)
            && self.until.map_or(true, |t| d.decided_at <= t)
    }
}

// ---------------------------------------------------------------------------
// DecisionLedger
// ---------------------------------------------------------------------------

pub struct DecisionLedger {
    store: Arc<GovernStore>,
    proposals: Arc<dyn ProposalStore>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(GovernError::InvalidDecisionInput(format!("{field} is required")));
    }
    Ok(())
}

impl DecisionLedger {
    pub fn new(
        store: Arc<GovernStore>,
        proposals: Arc<dyn ProposalStore>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            proposals,
            audit,
            clock,
        }
    }

    pub fn record_decision(&self, input: &RecordDecision) -> Result<ActionDecision> {
        self.record_decision_with(input, |_, _| Ok(()))
            .map(|(decision, ())| decision)
    }

    /// Record a decision and run `then` in the same write transaction.
    /// If `then` fails the decision is not recorded.
    pub(crate) fn record_decision_with<T>(
        &self,
        input: &RecordDecision,
        then: impl FnOnce(&WriteTransaction, &ActionDecision) -> Result<T>,
    ) -> Result<(ActionDecision, T)> {
        require("proposal_id", &input.proposal_id)?;
        require("organization_id", &input.organization_id)?;
        require("decision", &input.decision)?;
        require("decided_by_user_id", &input.decided_by_user_id)?;

        let kind: DecisionKind = input.decision.parse()?;
        match (kind, &input.modified_payload) {
            (DecisionKind::Modified, None) => {
                return Err(GovernError::InvalidDecisionInput(
                    "modified_payload is required for MODIFIED decisions".into(),
                ))
            }
            (DecisionKind::Approved | DecisionKind::Rejected, Some(_)) => {
                return Err(GovernError::InvalidDecisionInput(format!(
                    "modified_payload is only accepted for MODIFIED decisions, not {kind}"
                )))
            }
            _ => {}
        }

        let snapshot = self
            .proposals
            .get_proposal(&input.proposal_id)?
            .ok_or_else(|| GovernError::ProposalNotFound(input.proposal_id.clone()))?;

        if snapshot.organization_id != input.organization_id {
            self.reject_cross_tenant("record_decision", &input.organization_id, &snapshot.organization_id);
            return Err(GovernError::OrgMismatch {
                expected: input.organization_id.clone(),
                actual: snapshot.organization_id.clone(),
            });
        }

        if let Some(edits) = &input.modified_payload {
            let allowed = snapshot.action_type.modifiable_fields();
            if let Some(field) = edits.keys().find(|k| !allowed.contains(&k.as_str())) {
                return Err(GovernError::ModifiedFieldNotAllowed {
                    action_type: snapshot.action_type.to_string(),
                    field: field.clone(),
                });
            }
        }

        let decision = ActionDecision {
            id: Uuid::new_v4(),
            proposal_id: input.proposal_id.clone(),
            organization_id: input.organization_id.clone(),
            decision: kind,
            decided_by_user_id: input.decided_by_user_id.clone(),
            proposal_snapshot: snapshot,
            modified_payload: input.modified_payload.clone(),
            decided_at: self.clock.now(),
        };

        let extra = self.store.write(|wt| {
            {
                let mut table = wt.open_table(DECISIONS).map_err(db_err)?;
                if table.get(decision.proposal_id.as_str()).map_err(db_err)?.is_some() {
                    return Err(GovernError::DecisionConflict(decision.proposal_id.clone()));
                }
                put_json(&mut table, &decision.proposal_id, &decision)?;
                let mut ids = wt.open_table(DECISION_IDS).map_err(db_err)?;
                let id = decision.id.to_string();
                ids.insert(id.as_str(), decision.proposal_id.as_str())
                    .map_err(db_err)?;
            }
            then(wt, &decision)
        })?;

        tracing::info!(
            decision_id = %decision.id,
            proposal = %decision.proposal_id,
            org = %decision.organization_id,
            decision = %decision.decision,
            "decision recorded"
        );
        self.audit.record(&AuditEvent::DecisionRecorded {
            decision_id: decision.id.to_string(),
            proposal_id: decision.proposal_id.clone(),
            organization_id: decision.organization_id.clone(),
            action_type: decision.proposal_snapshot.action_type,
            decision: decision.decision,
            decided_by_user_id: decision.decided_by_user_id.clone(),
            at: decision.decided_at,
        });
        Ok((decision, extra))
    }

    pub(crate) fn reject_cross_tenant(&self, context: &str, expected: &str, actual: &str) {
        tracing::warn!(context, expected_org = expected, actual_org = actual, "organization mismatch");
        self.audit.record(&AuditEvent::OrgMismatch {
            context: context.to_string(),
            expected_org: expected.to_string(),
            actual_org: actual.to_string(),
            at: self.clock.now(),
        });
    }

    pub fn get_decision(&self, id: Uuid) -> Result<ActionDecision> {
        let key = id.to_string();
        let found = self.store.read(|rt| {
            let ids = rt.open_table(DECISION_IDS).map_err(db_err)?;
            let proposal_id = match ids.get(key.as_str()).map_err(db_err)? {
                Some(g) => g.value().to_string(),
                None => return Ok(None),
            };
            let table = rt.open_table(DECISIONS).map_err(db_err)?;
            get_json::<ActionDecision, _>(&table, &proposal_id)
        })?;
        found.ok_or(GovernError::DecisionNotFound(key))
    }

    /// The decision for `proposal_id`, if any, within `organization_id`.
    pub fn get_decisions_by_proposal(
        &self,
        proposal_id: &str,
        organization_id: &str,
    ) -> Result<Vec<ActionDecision>> {
        let found: Option<ActionDecision> = self.store.read(|rt| {
            let table = rt.open_table(DECISIONS).map_err(db_err)?;
            get_json(&table, proposal_id)
        })?;
        Ok(found
            .into_iter()
            .filter(|d| d.organization_id == organization_id)
            .collect())
    }

    /// Decisions newest first. Tenant scoping is part of the query itself;
    /// only [`AuditScope::AllOrganizations`] omits it.
    pub fn get_audit_log(&self, scope: &AuditScope, filter: &AuditFilter) -> Result<Vec<ActionDecision>> {
        if *scope == AuditScope::AllOrganizations {
            self.audit.record(&AuditEvent::PlatformAuditRead {
                at: self.clock.now(),
            });
        }
        let mut rows: Vec<ActionDecision> = self.store.read(|rt| {
            let table = rt.open_table(DECISIONS).map_err(db_err)?;
            scan_json(&table)
        })?;
        rows.retain(|d| match scope {
            AuditScope::Organization(org) => &d.organization_id == org,
            AuditScope::AllOrganizations => true,
        });
        rows.retain(|d| filter.matches(d));
        rows.sort_by(|a, b| b.decided_at.cmp(&a.decided_at));
        let limit = filter.limit.unwrap_or(usize::MAX);
        Ok(rows.into_iter().skip(filter.offset).take(limit).collect())
    }
}

/// Load a decision by id inside an open write transaction.
pub(crate) fn decision_in(wt: &WriteTransaction, id: Uuid) -> Result<Option<ActionDecision>> {
    let key = id.to_string();
    let proposal_id = {
        let ids = wt.open_table(DECISION_IDS).map_err(db_err)?;
        let value = ids.get(key.as_str()).map_err(db_err)?.map(|g| g.value().to_string());
        value
    };
    match proposal_id {
        Some(p) => {
            let table = wt.open_table(DECISIONS).map_err(db_err)?;
            get_json(&table, &p)
        }
        None => Ok(None),
    }
}

/// True if `proposal_id` already has a decision.
pub(crate) fn is_decided(wt: &WriteTransaction, proposal_id: &str) -> Result<bool> {
    let table = wt.open_table(DECISIONS).map_err(db_err)?;
    let found = table.get(proposal_id).map_err(db_err)?.is_some();
    Ok(found)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
