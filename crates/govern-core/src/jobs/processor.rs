//! Job processor: pick up due jobs, run them, record the outcome.
//!
//! Errors inside a job become state transitions on that job. Only storage
//! failures while claiming or recording escape `run_once`, and the loop in
//! `run` logs those and carries on.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::job::{ApprovedAction, AsyncJob, JobPayload, JobStatus, PlaybookStep};
use super::queue::JobQueue;
use crate::breaker::BreakerRegistry;
use crate::collab::ActionExecutor;
use crate::decision::DecisionLedger;
use crate::error::{GovernError, Result};
use crate::policy::PolicyEngine;

/// Breaker key for the playbook engine.
pub const PLAYBOOK_RESOURCE: &str = "playbook-engine";

/// Summary of one processed job.
#[derive(Debug, Clone)]
pub struct JobRun {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub attempts: u32,
}

pub struct JobProcessor {
    queue: Arc<JobQueue>,
    ledger: Arc<DecisionLedger>,
    policy: Arc<PolicyEngine>,
    breakers: Arc<BreakerRegistry>,
    executor: Arc<dyn ActionExecutor>,
}

impl JobProcessor {
    pub fn new(
        queue: Arc<JobQueue>,
        ledger: Arc<DecisionLedger>,
        policy: Arc<PolicyEngine>,
        breakers: Arc<BreakerRegistry>,
        executor: Arc<dyn ActionExecutor>,
    ) -> Self {
        Self {
            queue,
            ledger,
            policy,
            breakers,
            executor,
        }
    }

    /// Process at most one due job. Returns None when nothing is due.
    pub async fn run_once(&self) -> Result<Option<JobRun>> {
        let Some(job) = self.queue.claim_next()? else {
            return Ok(None);
        };
        let span = tracing::info_span!("job", job_id = %job.id, kind = %job.job_type(), attempt = job.attempts);
        let outcome = self.execute(&job).instrument(span).await;
        let after = self.queue.record_outcome(job.id, outcome)?;
        Ok(Some(JobRun {
            job_id: after.id,
            status: after.status,
            attempts: after.attempts,
        }))
    }

    /// Process due jobs until none are left or `max` have run.
    pub async fn drain(&self, max: usize) -> Result<Vec<JobRun>> {
        let mut runs = Vec::new();
        while runs.len() < max {
            match self.run_once().await? {
                Some(run) => runs.push(run),
                None => break,
            }
        }
        Ok(runs)
    }

    async fn execute(&self, job: &AsyncJob) -> Result<Value> {
        match &job.payload {
            JobPayload::ExecuteDecision { decision_id } => {
                self.execute_decision(job, *decision_id).await
            }
            JobPayload::AdvancePlaybookStep { run_id, step_id } => {
                let step = PlaybookStep {
                    job_id: job.id,
                    run_id: run_id.clone(),
                    step_id: step_id.clone(),
                    organization_id: job.organization_id.clone(),
                };
                self.breakers
                    .execute(
                        PLAYBOOK_RESOURCE,
                        self.breakers.default_timeout(),
                        self.executor.advance_playbook_step(&step),
                    )
                    .await
            }
        }
    }

    async fn execute_decision(&self, job: &AsyncJob, decision_id: Uuid) -> Result<Value> {
        let decision = self.ledger.get_decision(decision_id)?;
        if decision.organization_id != job.organization_id {
            self.ledger
                .reject_cross_tenant("execute_decision", &job.organization_id, &decision.organization_id);
            return Err(GovernError::OrgMismatch {
                expected: job.organization_id.clone(),
                actual: decision.organization_id,
            });
        }
        if !decision.decision.is_executable() {
            return Err(GovernError::InvalidInput(format!(
                "decision {decision_id} is {} and cannot be executed",
                decision.decision
            )));
        }

        // Policy may have tightened since approval. Errors here fail closed.
        let snapshot = &decision.proposal_snapshot;
        let check = self.policy.can_perform_action(
            snapshot.action_type,
            &decision.organization_id,
            snapshot.project_id.as_deref(),
        )?;
        if !check.allowed {
            return Err(GovernError::PolicyDenied {
                reason: check.reason.unwrap_or_default(),
            });
        }

        let action = ApprovedAction {
            job_id: job.id,
            decision_id,
            proposal_id: decision.proposal_id.clone(),
            organization_id: decision.organization_id.clone(),
            project_id: snapshot.project_id.clone(),
            action_type: snapshot.action_type,
            payload: decision.effective_payload(),
            decided_by_user_id: decision.decided_by_user_id.clone(),
        };
        let resource = self.executor.resource_name(&action);
        self.breakers
            .execute(
                &resource,
                self.breakers.default_timeout(),
                self.executor.execute(&action),
            )
            .await
    }

    /// Poll for due jobs every `poll_interval` until `shutdown` is cancelled.
    pub async fn run(self: Arc<Self>, poll_interval: Duration, shutdown: CancellationToken) {
        tracing::info!(poll_ms = poll_interval.as_millis() as u64, "job processor started");
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    loop {
                        if shutdown.is_cancelled() {
                            break;
                        }
                        match self.run_once().await {
                            Ok(Some(_)) => continue,
                            Ok(None) => break,
                            Err(e) => {
                                tracing::error!(error = %e, "job processor pass failed");
                                break;
                            }
                        }
                    }
                }
            }
        }
        tracing::info!("job processor stopped");
    }
}
