//! Human approval workqueue with SLA deadlines and escalation.
//!
//! A proposal has at most one live (PENDING or ACKED) assignment. The
//! `live_assignments` table maps proposal id → assignment id; creating an
//! assignment checks and fills that slot in one write transaction.
//!
//! The SLA sweep expires overdue live assignments and escalates each to the
//! organization's admin. Every expiry is a compare-and-set in its own write
//! transaction, so concurrent sweepers never double-escalate a row.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use redb::{ReadableTable, WriteTransaction};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::clock::Clock;
use crate::collab::{OrgDirectory, ProposalStore};
use crate::config::{WorkqueueConfig, MAX_SLA_HOURS};
use crate::decision::is_decided;
use crate::error::{db_err, GovernError, Result};
use crate::outbox::{self, Notification, OutboxType};
use crate::store::{get_json, put_json, GovernStore, ASSIGNMENTS, LIVE_ASSIGNMENTS};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentStatus {
    Pending,
    Acked,
    Done,
    Expired,
}

impl AssignmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AssignmentStatus::Pending => "PENDING",
            AssignmentStatus::Acked => "ACKED",
            AssignmentStatus::Done => "DONE",
            AssignmentStatus::Expired => "EXPIRED",
        }
    }

    pub fn is_live(self) -> bool {
        matches!(self, AssignmentStatus::Pending | AssignmentStatus::Acked)
    }
}

impl std::fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkqueueAssignment {
    pub id: Uuid,
    pub proposal_id: String,
    pub assignee_user_id: String,
    pub organization_id: String,
    pub status: AssignmentStatus,
    pub sla_deadline: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalated_to: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acked_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkqueueAssignment {
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status.is_live() && now > self.sla_deadline
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SlaReport {
    pub expired: u32,
    pub escalated: u32,
}

// ---------------------------------------------------------------------------
// Transaction helpers
// ---------------------------------------------------------------------------

fn load(wt: &WriteTransaction, id: Uuid) -> Result<WorkqueueAssignment> {
    let table = wt.open_table(ASSIGNMENTS).map_err(db_err)?;
    get_json(&table, &id.to_string())?.ok_or_else(|| GovernError::AssignmentNotFound(id.to_string()))
}

fn save(wt: &WriteTransaction, a: &WorkqueueAssignment) -> Result<()> {
    let mut table = wt.open_table(ASSIGNMENTS).map_err(db_err)?;
    put_json(&mut table, &a.id.to_string(), a)
}

fn release_live(wt: &WriteTransaction, proposal_id: &str) -> Result<()> {
    let mut live = wt.open_table(LIVE_ASSIGNMENTS).map_err(db_err)?;
    live.remove(proposal_id).map_err(db_err)?;
    Ok(())
}

fn invalid(a: &WorkqueueAssignment, to: AssignmentStatus) -> GovernError {
    GovernError::InvalidTransition {
        entity: format!("assignment {}", a.id),
        from: a.status.as_str().into(),
        to: to.as_str().into(),
    }
}

/// Mark the live assignment of `proposal_id` DONE inside `wt`, if there is one.
pub(crate) fn complete_live_in(
    wt: &WriteTransaction,
    proposal_id: &str,
    now: DateTime<Utc>,
) -> Result<Option<WorkqueueAssignment>> {
    let live_id = {
        let live = wt.open_table(LIVE_ASSIGNMENTS).map_err(db_err)?;
        let value = live.get(proposal_id).map_err(db_err)?.map(|g| g.value().to_string());
        value
    };
    let Some(live_id) = live_id else {
        return Ok(None);
    };
    let id = Uuid::parse_str(&live_id).map_err(db_err)?;
    let mut a = load(wt, id)?;
    a.status = AssignmentStatus::Done;
    a.completed_at = Some(now);
    a.updated_at = now;
    save(wt, &a)?;
    release_live(wt, proposal_id)?;
    Ok(Some(a))
}

// ---------------------------------------------------------------------------
// Workqueue
// ---------------------------------------------------------------------------

pub struct Workqueue {
    store: Arc<GovernStore>,
    proposals: Arc<dyn ProposalStore>,
    orgs: Arc<dyn OrgDirectory>,
    clock: Arc<dyn Clock>,
    config: WorkqueueConfig,
}

impl Workqueue {
    pub fn new(
        store: Arc<GovernStore>,
        proposals: Arc<dyn ProposalStore>,
        orgs: Arc<dyn OrgDirectory>,
        clock: Arc<dyn Clock>,
        config: WorkqueueConfig,
    ) -> Self {
        Self {
            store,
            proposals,
            orgs,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &WorkqueueConfig {
        &self.config
    }

    /// Assign a proposal to a reviewer with a deadline `sla_hours` from now
    /// (config default when None). Raises APPROVAL_DUE to the assignee.
    pub fn assign_approval(
        &self,
        proposal_id: &str,
        assignee_user_id: &str,
        sla_hours: Option<u32>,
    ) -> Result<WorkqueueAssignment> {
        if assignee_user_id.trim().is_empty() {
            return Err(GovernError::InvalidInput("assignee_user_id is required".into()));
        }
        let hours = sla_hours.unwrap_or(self.config.default_sla_hours);
        if hours == 0 || hours > MAX_SLA_HOURS {
            return Err(GovernError::InvalidInput(format!(
                "sla_hours must be between 1 and {MAX_SLA_HOURS}, got {hours}"
            )));
        }
        let proposal = self
            .proposals
            .get_proposal(proposal_id)?
            .ok_or_else(|| GovernError::ProposalNotFound(proposal_id.to_string()))?;

        let now = self.clock.now();
        let sla_deadline = now
            .checked_add_signed(chrono::Duration::hours(i64::from(hours)))
            .ok_or_else(|| GovernError::InvalidInput(format!("sla_hours {hours} is out of range")))?;
        let assignment = WorkqueueAssignment {
            id: Uuid::new_v4(),
            proposal_id: proposal_id.to_string(),
            assignee_user_id: assignee_user_id.to_string(),
            organization_id: proposal.organization_id.clone(),
            status: AssignmentStatus::Pending,
            sla_deadline,
            escalated_to: None,
            created_at: now,
            updated_at: now,
            acked_at: None,
            completed_at: None,
        };

        self.store.write(|wt| {
            if is_decided(wt, proposal_id)? {
                return Err(GovernError::AssignmentConflict(format!(
                    "proposal {proposal_id} is already decided"
                )));
            }
            {
                let mut live = wt.open_table(LIVE_ASSIGNMENTS).map_err(db_err)?;
                if let Some(existing) = live.get(proposal_id).map_err(db_err)? {
                    return Err(GovernError::AssignmentConflict(format!(
                        "proposal {proposal_id} already has live assignment {}",
                        existing.value()
                    )));
                }
                let id = assignment.id.to_string();
                live.insert(proposal_id, id.as_str()).map_err(db_err)?;
            }
            save(wt, &assignment)?;
            outbox::stage(
                wt,
                Notification::new(
                    OutboxType::ApprovalDue,
                    assignee_user_id,
                    &assignment.organization_id,
                    json!({
                        "assignment_id": assignment.id,
                        "proposal_id": proposal_id,
                        "action_type": proposal.action_type,
                        "sla_deadline": assignment.sla_deadline,
                    }),
                ),
                now,
            )?;
            Ok(())
        })?;

        tracing::info!(
            assignment_id = %assignment.id,
            proposal = proposal_id,
            assignee = assignee_user_id,
            deadline = %assignment.sla_deadline,
            "approval assigned"
        );
        Ok(assignment)
    }

    pub fn acknowledge_approval(&self, id: Uuid) -> Result<WorkqueueAssignment> {
        let now = self.clock.now();
        self.store.write(|wt| {
            let mut a = load(wt, id)?;
            if a.status != AssignmentStatus::Pending {
                return Err(invalid(&a, AssignmentStatus::Acked));
            }
            a.status = AssignmentStatus::Acked;
            a.acked_at = Some(now);
            a.updated_at = now;
            save(wt, &a)?;
            Ok(a)
        })
    }

    pub fn complete_approval(&self, id: Uuid) -> Result<WorkqueueAssignment> {
        let now = self.clock.now();
        self.store.write(|wt| {
            let mut a = load(wt, id)?;
            if !a.status.is_live() {
                return Err(invalid(&a, AssignmentStatus::Done));
            }
            a.status = AssignmentStatus::Done;
            a.completed_at = Some(now);
            a.updated_at = now;
            save(wt, &a)?;
            release_live(wt, &a.proposal_id)?;
            Ok(a)
        })
    }

    /// Complete whatever live assignment `proposal_id` has.
    pub fn complete_for_proposal(&self, proposal_id: &str) -> Result<Option<WorkqueueAssignment>> {
        let now = self.clock.now();
        self.store.write(|wt| complete_live_in(wt, proposal_id, now))
    }

    pub fn get_assignment(&self, id: Uuid) -> Result<WorkqueueAssignment> {
        let found: Option<WorkqueueAssignment> = self.store.read(|rt| {
            let table = rt.open_table(ASSIGNMENTS).map_err(db_err)?;
            get_json(&table, &id.to_string())
        })?;
        found.ok_or_else(|| GovernError::AssignmentNotFound(id.to_string()))
    }

    fn live_assignments(&self) -> Result<Vec<WorkqueueAssignment>> {
        self.store.read(|rt| {
            let live = rt.open_table(LIVE_ASSIGNMENTS).map_err(db_err)?;
            let table = rt.open_table(ASSIGNMENTS).map_err(db_err)?;
            let mut out = Vec::new();
            for entry in live.iter().map_err(db_err)? {
                let (_, id) = entry.map_err(db_err)?;
                if let Some(a) = get_json::<WorkqueueAssignment, _>(&table, id.value())? {
                    out.push(a);
                }
            }
            Ok(out)
        })
    }

    /// Live assignments of `user_id`, soonest deadline first.
    pub fn get_my_approvals(&self, user_id: &str, organization_id: &str) -> Result<Vec<WorkqueueAssignment>> {
        let mut mine: Vec<_> = self
            .live_assignments()?
            .into_iter()
            .filter(|a| a.assignee_user_id == user_id && a.organization_id == organization_id)
            .collect();
        mine.sort_by(|a, b| a.sla_deadline.cmp(&b.sla_deadline));
        Ok(mine)
    }

    pub fn get_overdue_count(&self, organization_id: &str) -> Result<u64> {
        let now = self.clock.now();
        Ok(self
            .live_assignments()?
            .iter()
            .filter(|a| a.organization_id == organization_id && a.is_overdue(now))
            .count() as u64)
    }

    /// Expire overdue live assignments and escalate each to the org admin.
    pub fn run_sla_check(&self) -> Result<SlaReport> {
        let now = self.clock.now();
        let overdue: Vec<_> = self
            .live_assignments()?
            .into_iter()
            .filter(|a| a.is_overdue(now))
            .collect();

        let mut report = SlaReport::default();
        for candidate in overdue {
            let admin = match self.orgs.find_org_admin(&candidate.organization_id) {
                Ok(a) => a,
                Err(e) => {
                    tracing::warn!(org = %candidate.organization_id, error = %e, "org admin lookup failed");
                    None
                }
            };
            let expired = self.store.write(|wt| {
                let mut a = load(wt, candidate.id)?;
                if !a.is_overdue(now) {
                    // Another sweeper or a reviewer got there first.
                    return Ok(None);
                }
                a.status = AssignmentStatus::Expired;
                a.escalated_to = admin.clone();
                a.updated_at = now;
                save(wt, &a)?;
                release_live(wt, &a.proposal_id)?;
                if let Some(admin) = &admin {
                    outbox::stage(
                        wt,
                        Notification::new(
                            OutboxType::Escalation,
                            admin.as_str(),
                            &a.organization_id,
                            json!({
                                "assignment_id": a.id,
                                "proposal_id": a.proposal_id,
                                "assignee_user_id": a.assignee_user_id,
                                "sla_deadline": a.sla_deadline,
                            }),
                        ),
                        now,
                    )?;
                }
                Ok(Some(a))
            })?;

            let Some(a) = expired else { continue };
            report.expired += 1;
            match &a.escalated_to {
                Some(admin) => {
                    report.escalated += 1;
                    tracing::warn!(
                        assignment_id = %a.id,
                        proposal = %a.proposal_id,
                        escalated_to = %admin,
                        "approval SLA breached; escalated"
                    );
                }
                None => tracing::warn!(
                    assignment_id = %a.id,
                    org = %a.organization_id,
                    "approval SLA breached but organization has no admin to escalate to"
                ),
            }
        }
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// SlaTimer
// ---------------------------------------------------------------------------

/// Runs [`Workqueue::run_sla_check`] on a fixed interval.
pub struct SlaTimer {
    workqueue: Arc<Workqueue>,
    interval: Duration,
}

impl SlaTimer {
    pub fn new(workqueue: Arc<Workqueue>) -> Self {
        let interval = Duration::from_secs(workqueue.config.sla_check_interval_secs.max(1));
        Self {
            workqueue,
            interval,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(interval_secs = self.interval.as_secs(), "SLA timer started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match self.workqueue.run_sla_check() {
                        Ok(r) if r.expired > 0 => {
                            tracing::info!(expired = r.expired, escalated = r.escalated, "SLA sweep");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "SLA sweep failed"),
                    }
                }
            }
        }
        tracing::info!("SLA timer stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
