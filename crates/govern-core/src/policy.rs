//! Policy engine: how autonomously AI proposals may act for an org/project.
//!
//! Stored records are taken as configured. Clamping to the organization's
//! ceiling and the regulatory override are applied every time a policy is
//! read, so lowering the ceiling or enabling regulatory mode takes effect on
//! the very next request.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::collab::PolicyDirectory;
use crate::error::{db_err, GovernError, Result};
use crate::proposal::ActionProposal;
use crate::store::{get_json, put_json, GovernStore, POLICIES};
use crate::types::{ActionType, PolicyLevel, RiskLevel};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One row of `ai_policies`. Org-level rows carry the ceiling; project rows
/// are overrides and never do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRecord {
    pub organization_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub policy_level: PolicyLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_policy_level: Option<PolicyLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    pub updated_at: DateTime<Utc>,
}

fn policy_key(organization_id: &str, project_id: Option<&str>) -> String {
    match project_id {
        Some(p) => format!("{organization_id}/{p}"),
        None => organization_id.to_string(),
    }
}

/// Request to change a policy. Levels arrive as strings from the API layer
/// and are validated against [`PolicyLevel`] before anything is written.
#[derive(Debug, Clone, Default)]
pub struct PolicyUpdate {
    pub organization_id: String,
    pub project_id: Option<String>,
    pub policy_level: String,
    pub max_policy_level: Option<String>,
    pub updated_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectivePolicy {
    pub organization_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub policy_level: PolicyLevel,
    /// Level before the ceiling and regulatory override were applied.
    pub configured_level: PolicyLevel,
    pub max_policy_level: PolicyLevel,
    pub regulatory_mode_enabled: bool,
    pub active_roles: Vec<String>,
    /// True when the ceiling lowered the configured level.
    pub clamped: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyCheck {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub effective_level: PolicyLevel,
    pub required_level: PolicyLevel,
}

/// What the pipeline should do with a freshly generated proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateOutcome {
    Denied { reason: String },
    RequiresApproval,
    AutoRun,
}

// ---------------------------------------------------------------------------
// PolicyEngine
// ---------------------------------------------------------------------------

pub struct PolicyEngine {
    store: Arc<GovernStore>,
    directory: Arc<dyn PolicyDirectory>,
    clock: Arc<dyn Clock>,
}

impl PolicyEngine {
    pub fn new(
        store: Arc<GovernStore>,
        directory: Arc<dyn PolicyDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            directory,
            clock,
        }
    }

    fn load_record(&self, organization_id: &str, project_id: Option<&str>) -> Result<Option<PolicyRecord>> {
        let key = policy_key(organization_id, project_id);
        self.store.read(|rt| {
            let table = rt.open_table(POLICIES).map_err(db_err)?;
            get_json(&table, &key)
        })
    }

    /// Compute the policy in force right now. Never cached.
    pub fn get_effective_policy(
        &self,
        organization_id: &str,
        project_id: Option<&str>,
    ) -> Result<EffectivePolicy> {
        let org = self.load_record(organization_id, None)?;
        let (org_level, ceiling) = match &org {
            Some(r) => (
                r.policy_level,
                r.max_policy_level.unwrap_or(PolicyLevel::Advisory),
            ),
            None => (PolicyLevel::Advisory, PolicyLevel::Advisory),
        };

        let configured = match project_id {
            Some(p) => self
                .load_record(organization_id, Some(p))?
                .map(|r| r.policy_level)
                .unwrap_or(org_level),
            None => org_level,
        };

        let capped = configured.min(ceiling);
        let regulatory = self.directory.regulatory_mode(organization_id, project_id)?;
        let active_roles = self.directory.active_roles(organization_id, project_id)?;
        let policy_level = if regulatory {
            PolicyLevel::Advisory
        } else {
            capped
        };

        Ok(EffectivePolicy {
            organization_id: organization_id.to_string(),
            project_id: project_id.map(str::to_string),
            policy_level,
            configured_level: configured,
            max_policy_level: ceiling,
            regulatory_mode_enabled: regulatory,
            active_roles,
            clamped: capped < configured,
        })
    }

    pub fn can_perform_action(
        &self,
        action_type: ActionType,
        organization_id: &str,
        project_id: Option<&str>,
    ) -> Result<PolicyCheck> {
        let policy = self.get_effective_policy(organization_id, project_id)?;
        Ok(check_against(action_type, &policy))
    }

    /// Validate and store a policy level (and, at org level, a ceiling).
    ///
    /// An override above the ceiling is stored as requested and clamped on
    /// read, never rejected.
    pub fn update_policy(&self, update: &PolicyUpdate) -> Result<PolicyRecord> {
        if update.organization_id.trim().is_empty() {
            return Err(GovernError::InvalidInput("organization_id is required".into()));
        }
        let level: PolicyLevel = update.policy_level.parse()?;
        let max = update
            .max_policy_level
            .as_deref()
            .map(str::parse::<PolicyLevel>)
            .transpose()?;
        if update.project_id.is_some() && max.is_some() {
            return Err(GovernError::InvalidInput(
                "max_policy_level can only be set at organization level".into(),
            ));
        }

        let key = policy_key(&update.organization_id, update.project_id.as_deref());
        let now = self.clock.now();
        let record = self.store.write(|wt| {
            let mut table = wt.open_table(POLICIES).map_err(db_err)?;
            let existing: Option<PolicyRecord> = get_json(&table, &key)?;
            let max_policy_level = match (&update.project_id, max) {
                (Some(_), _) => None,
                (None, Some(m)) => Some(m),
                // A new org without an explicit ceiling starts with its own level as ceiling.
                (None, None) => Some(
                    existing
                        .as_ref()
                        .and_then(|r| r.max_policy_level)
                        .unwrap_or(level),
                ),
            };
            let record = PolicyRecord {
                organization_id: update.organization_id.clone(),
                project_id: update.project_id.clone(),
                policy_level: level,
                max_policy_level,
                updated_by: update.updated_by.clone(),
                updated_at: now,
            };
            put_json(&mut table, &key, &record)?;
            Ok(record)
        })?;

        tracing::info!(
            org = %record.organization_id,
            project = ?record.project_id,
            level = %record.policy_level,
            max = ?record.max_policy_level,
            "policy updated"
        );
        Ok(record)
    }

    /// Decide whether a new proposal is refused, queued for a human, or may
    /// run unattended.
    pub fn gate_proposal(&self, proposal: &ActionProposal) -> Result<GateOutcome> {
        let policy =
            self.get_effective_policy(&proposal.organization_id, proposal.project_id.as_deref())?;
        let check = check_against(proposal.action_type, &policy);
        if !check.allowed {
            return Ok(GateOutcome::Denied {
                reason: check.reason.unwrap_or_default(),
            });
        }
        let auto = policy.policy_level == PolicyLevel::Autopilot
            && !proposal.requires_approval
            && proposal.risk_level == RiskLevel::Low;
        Ok(if auto {
            GateOutcome::AutoRun
        } else {
            GateOutcome::RequiresApproval
        })
    }
}

fn check_against(action_type: ActionType, policy: &EffectivePolicy) -> PolicyCheck {
    let required = action_type.min_policy_level();
    let allowed = policy.policy_level >= required;
    let reason = if allowed {
        None
    } else if policy.regulatory_mode_enabled {
        Some(format!(
            "{action_type} requires {required} policy level (regulatory mode forces ADVISORY)"
        ))
    } else {
        Some(format!("{action_type} requires {required} policy level"))
    };
    PolicyCheck {
        allowed,
        reason,
        effective_level: policy.policy_level,
        required_level: required,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::store::OrgSettings;
    use crate::types::ProposalScope;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<GovernStore>, PolicyEngine) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(GovernStore::open(&dir.path().join("gov.redb")).unwrap());
        let engine = PolicyEngine::new(store.clone(), store.clone(), Arc::new(SystemClock));
        (dir, store, engine)
    }

    fn set(engine: &PolicyEngine, org: &str, project: Option<&str>, level: &str, max: Option<&str>) {
        engine
            .update_policy(&PolicyUpdate {
                organization_id: org.into(),
                project_id: project.map(Into::into),
                policy_level: level.into(),
                max_policy_level: max.map(Into::into),
                updated_by: Some("u-admin".into()),
            })
            .unwrap();
    }

    fn proposal(action_type: ActionType, risk: RiskLevel, requires_approval: bool) -> ActionProposal {
        ActionProposal {
            proposal_id: "p-1".into(),
            organization_id: "org-1".into(),
            project_id: None,
            action_type,
            scope: ProposalScope::Project,
            payload_preview: serde_json::Map::new(),
            risk_level: risk,
            requires_approval,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn unset_org_defaults_to_advisory() {
        let (_dir, _store, engine) = setup();
        let policy = engine.get_effective_policy("org-new", None).unwrap();
        assert_eq!(policy.policy_level, PolicyLevel::Advisory);
        assert_eq!(policy.max_policy_level, PolicyLevel::Advisory);
        assert!(!policy.regulatory_mode_enabled);
    }

    #[test]
    fn advisory_org_cannot_create_draft_task() {
        let (_dir, _store, engine) = setup();
        set(&engine, "org-trial", None, "ADVISORY", None);
        let check = engine
            .can_perform_action(ActionType::CreateDraftTask, "org-trial", None)
            .unwrap();
        assert!(!check.allowed);
        assert!(check
            .reason
            .unwrap()
            .contains("requires ASSISTED policy level"));
        assert_eq!(check.required_level, PolicyLevel::Assisted);
    }

    #[test]
    fn project_override_above_ceiling_is_clamped() {
        let (_dir, _store, engine) = setup();
        set(&engine, "org-1", None, "ASSISTED", Some("PROACTIVE"));
        set(&engine, "org-1", Some("proj-1"), "AUTOPILOT", None);
        let policy = engine.get_effective_policy("org-1", Some("proj-1")).unwrap();
        assert_eq!(policy.configured_level, PolicyLevel::Autopilot);
        assert_eq!(policy.policy_level, PolicyLevel::Proactive);
        assert!(policy.clamped);

        // Lowering the ceiling later also caps the stored override.
        set(&engine, "org-1", None, "ASSISTED", Some("ASSISTED"));
        let policy = engine.get_effective_policy("org-1", Some("proj-1")).unwrap();
        assert_eq!(policy.policy_level, PolicyLevel::Assisted);
    }

    #[test]
    fn project_override_may_lower_level() {
        let (_dir, _store, engine) = setup();
        set(&engine, "org-1", None, "PROACTIVE", Some("AUTOPILOT"));
        set(&engine, "org-1", Some("proj-quiet"), "ADVISORY", None);
        let policy = engine.get_effective_policy("org-1", Some("proj-quiet")).unwrap();
        assert_eq!(policy.policy_level, PolicyLevel::Advisory);
        assert!(!policy.clamped);
        let other = engine.get_effective_policy("org-1", Some("proj-other")).unwrap();
        assert_eq!(other.policy_level, PolicyLevel::Proactive);
    }

    #[test]
    fn regulatory_mode_forces_advisory() {
        let (_dir, store, engine) = setup();
        set(&engine, "org-1", None, "AUTOPILOT", Some("AUTOPILOT"));
        store
            .put_org_settings(&OrgSettings {
                organization_id: "org-1".into(),
                regulatory_mode: true,
                ..Default::default()
            })
            .unwrap();
        let policy = engine.get_effective_policy("org-1", None).unwrap();
        assert_eq!(policy.policy_level, PolicyLevel::Advisory);
        assert!(policy.regulatory_mode_enabled);
        let check = engine
            .can_perform_action(ActionType::TaskCreate, "org-1", None)
            .unwrap();
        assert!(!check.allowed);
        assert!(check.reason.unwrap().contains("regulatory"));
    }

    #[test]
    fn update_rejects_unknown_level_without_writing() {
        let (_dir, _store, engine) = setup();
        let err = engine
            .update_policy(&PolicyUpdate {
                organization_id: "org-1".into(),
                policy_level: "TURBO".into(),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, GovernError::InvalidPolicyLevel(_)));
        assert!(engine.load_record("org-1", None).unwrap().is_none());
    }

    #[test]
    fn ceiling_only_at_org_level() {
        let (_dir, _store, engine) = setup();
        let err = engine
            .update_policy(&PolicyUpdate {
                organization_id: "org-1".into(),
                project_id: Some("proj-1".into()),
                policy_level: "ASSISTED".into(),
                max_policy_level: Some("AUTOPILOT".into()),
                updated_by: None,
            })
            .unwrap_err();
        assert!(matches!(err, GovernError::InvalidInput(_)));
    }

    #[test]
    fn gate_outcomes() {
        let (_dir, _store, engine) = setup();
        set(&engine, "org-1", None, "AUTOPILOT", Some("AUTOPILOT"));
        assert_eq!(
            engine
                .gate_proposal(&proposal(ActionType::TaskCreate, RiskLevel::Low, false))
                .unwrap(),
            GateOutcome::AutoRun
        );
        assert_eq!(
            engine
                .gate_proposal(&proposal(ActionType::TaskCreate, RiskLevel::High, false))
                .unwrap(),
            GateOutcome::RequiresApproval
        );
        assert_eq!(
            engine
                .gate_proposal(&proposal(ActionType::TaskCreate, RiskLevel::Low, true))
                .unwrap(),
            GateOutcome::RequiresApproval
        );

        set(&engine, "org-1", None, "ASSISTED", Some("AUTOPILOT"));
        assert!(matches!(
            engine
                .gate_proposal(&proposal(ActionType::MeetingSchedule, RiskLevel::Low, false))
                .unwrap(),
            GateOutcome::Denied { .. }
        ));
    }
}
