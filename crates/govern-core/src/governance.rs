//! The pipeline wired together: proposal → gate → assignment → decision →
//! job → execution → notifications.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::audit::TracingAuditSink;
use crate::breaker::BreakerRegistry;
use crate::clock::{Clock, SystemClock};
use crate::collab::{ActionExecutor, AuditSink, NotificationTransport, OrgDirectory, PolicyDirectory, ProposalStore};
use crate::config::GovernConfig;
use crate::decision::{ActionDecision, DecisionLedger, RecordDecision};
use crate::error::{GovernError, Result};
use crate::jobs::{AsyncJob, JobPayload, JobProcessor, JobQueue};
use crate::outbox::{Outbox, OutboxWorker};
use crate::policy::{GateOutcome, PolicyEngine};
use crate::store::GovernStore;
use crate::workqueue::{complete_live_in, SlaTimer, Workqueue, WorkqueueAssignment};

/// Decided-by marker for decisions the policy engine took on its own.
pub const AUTOPILOT_USER: &str = "system:autopilot";

/// Implementations of the systems around the pipeline.
#[derive(Clone)]
pub struct Collaborators {
    pub proposals: Arc<dyn ProposalStore>,
    pub policy_directory: Arc<dyn PolicyDirectory>,
    pub orgs: Arc<dyn OrgDirectory>,
    pub audit: Arc<dyn AuditSink>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// Use the store's own proposal and org tables, tracing audit, wall clock.
    pub fn local(store: &Arc<GovernStore>) -> Self {
        Self {
            proposals: store.clone(),
            policy_directory: store.clone(),
            orgs: store.clone(),
            audit: Arc::new(TracingAuditSink),
            clock: Arc::new(SystemClock),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub outcome: GateOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignment: Option<WorkqueueAssignment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<ActionDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<AsyncJob>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DecisionResult {
    pub decision: ActionDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_assignment: Option<WorkqueueAssignment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<AsyncJob>,
}

pub struct Governance {
    pub config: GovernConfig,
    pub store: Arc<GovernStore>,
    pub proposals: Arc<dyn ProposalStore>,
    pub policy: Arc<PolicyEngine>,
    pub ledger: Arc<DecisionLedger>,
    pub jobs: Arc<JobQueue>,
    pub workqueue: Arc<Workqueue>,
    pub outbox: Arc<Outbox>,
    pub breakers: Arc<BreakerRegistry>,
    clock: Arc<dyn Clock>,
}

impl Governance {
    pub fn new(store: Arc<GovernStore>, config: GovernConfig, collab: Collaborators) -> Self {
        let clock = collab.clock.clone();
        let policy = Arc::new(PolicyEngine::new(
            store.clone(),
            collab.policy_directory.clone(),
            clock.clone(),
        ));
        let ledger = Arc::new(DecisionLedger::new(
            store.clone(),
            collab.proposals.clone(),
            collab.audit.clone(),
            clock.clone(),
        ));
        let jobs = Arc::new(JobQueue::new(
            store.clone(),
            collab.orgs.clone(),
            clock.clone(),
            config.jobs.clone(),
        ));
        let workqueue = Arc::new(Workqueue::new(
            store.clone(),
            collab.proposals.clone(),
            collab.orgs.clone(),
            clock.clone(),
            config.workqueue.clone(),
        ));
        let outbox = Arc::new(Outbox::new(store.clone(), clock.clone(), config.outbox.clone()));
        let breakers = Arc::new(BreakerRegistry::new(config.breaker.clone(), clock.clone()));
        Self {
            config,
            store,
            proposals: collab.proposals,
            policy,
            ledger,
            jobs,
            workqueue,
            outbox,
            breakers,
            clock,
        }
    }

    /// Open the data directory under `root` with local collaborators.
    pub fn open(root: &Path) -> Result<Self> {
        let config = GovernConfig::load(root)?;
        let store = Arc::new(GovernStore::open_root(root)?);
        let collab = Collaborators::local(&store);
        Ok(Self::new(store, config, collab))
    }

    /// Gate a proposal and route it: refuse, queue for a reviewer, or run.
    pub fn submit_proposal(&self, proposal_id: &str, reviewer: Option<&str>) -> Result<Submission> {
        let proposal = self
            .proposals
            .get_proposal(proposal_id)?
            .ok_or_else(|| GovernError::ProposalNotFound(proposal_id.to_string()))?;
        let outcome = self.policy.gate_proposal(&proposal)?;
        match &outcome {
            GateOutcome::Denied { reason } => {
                tracing::info!(proposal = proposal_id, reason = %reason, "proposal denied by policy");
                Err(GovernError::PolicyDenied {
                    reason: reason.clone(),
                })
            }
            GateOutcome::RequiresApproval => {
                let assignment = reviewer
                    .map(|r| self.workqueue.assign_approval(proposal_id, r, None))
                    .transpose()?;
                Ok(Submission {
                    outcome,
                    assignment,
                    decision: None,
                    job: None,
                })
            }
            GateOutcome::AutoRun => {
                let result = self.decide(&RecordDecision {
                    proposal_id: proposal_id.to_string(),
                    organization_id: proposal.organization_id.clone(),
                    decision: "APPROVED".into(),
                    decided_by_user_id: AUTOPILOT_USER.into(),
                    modified_payload: None,
                })?;
                Ok(Submission {
                    outcome,
                    assignment: None,
                    decision: Some(result.decision),
                    job: result.job,
                })
            }
        }
    }

    /// Record a decision. In the same transaction, close the proposal's live
    /// assignment and, for APPROVED/MODIFIED, enqueue its execution.
    pub fn decide(&self, input: &RecordDecision) -> Result<DecisionResult> {
        let now = self.clock.now();
        let (decision, (completed_assignment, job)) =
            self.ledger.record_decision_with(input, |wt, decision| {
                let completed = complete_live_in(wt, &decision.proposal_id, now)?;
                let job = if decision.decision.is_executable() {
                    Some(self.jobs.stage(
                        wt,
                        JobPayload::ExecuteDecision {
                            decision_id: decision.id,
                        },
                        &decision.organization_id,
                    )?)
                } else {
                    None
                };
                Ok((completed, job))
            })?;
        if let Some(job) = &job {
            tracing::info!(job_id = %job.id, decision_id = %decision.id, "execution enqueued");
        }
        Ok(DecisionResult {
            decision,
            completed_assignment,
            job,
        })
    }

    pub fn processor(&self, executor: Arc<dyn ActionExecutor>) -> JobProcessor {
        JobProcessor::new(
            self.jobs.clone(),
            self.ledger.clone(),
            self.policy.clone(),
            self.breakers.clone(),
            executor,
        )
    }

    /// Start the job processor, SLA timer and outbox delivery as tokio tasks.
    /// They stop when `shutdown` is cancelled.
    pub fn spawn_workers(
        &self,
        executor: Arc<dyn ActionExecutor>,
        transport: Arc<dyn NotificationTransport>,
        shutdown: CancellationToken,
    ) -> Result<Vec<JoinHandle<()>>> {
        let recovered = self
            .jobs
            .startup_recovery(Duration::from_secs(self.config.jobs.stale_running_secs))?;
        if recovered > 0 {
            tracing::info!(recovered, "requeued jobs orphaned by a previous run");
        }

        let processor = Arc::new(self.processor(executor));
        let poll = Duration::from_millis(self.config.jobs.poll_interval_ms.max(10));
        let sla = SlaTimer::new(self.workqueue.clone());
        let delivery = OutboxWorker::new(self.outbox.clone(), transport);

        Ok(vec![
            tokio::spawn(processor.run(poll, shutdown.clone())),
            tokio::spawn(sla.run(shutdown.clone())),
            tokio::spawn(delivery.run(shutdown)),
        ])
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
