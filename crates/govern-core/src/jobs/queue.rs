//! Persistent job queue on redb.
//!
//! Job records live in `async_jobs` keyed by id. QUEUED jobs also have an
//! entry in `job_queue` under `[available_at_ms | uuid]`, so picking the next
//! due job is a single range scan. Every status change is a compare-and-set
//! inside one write transaction: a worker only owns a job if it removed that
//! job's queue entry.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use redb::WriteTransaction;
use serde_json::{json, Value};
use uuid::Uuid;

use super::job::{AsyncJob, JobPayload, JobStatus, JobType};
use crate::clock::Clock;
use crate::collab::OrgDirectory;
use crate::config::JobsConfig;
use crate::decision::decision_in;
use crate::error::{db_err, GovernError, Result};
use crate::outbox::{self, Notification, OutboxType};
use crate::store::{due_entries, get_json, put_json, queue_key, scan_json, GovernStore, JOBS, JOB_QUEUE};
use crate::types::DecisionKind;

#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub organization_id: Option<String>,
    pub status: Option<JobStatus>,
    pub job_type: Option<JobType>,
    pub limit: Option<usize>,
}

pub struct JobQueue {
    store: Arc<GovernStore>,
    orgs: Arc<dyn OrgDirectory>,
    clock: Arc<dyn Clock>,
    config: JobsConfig,
}

fn load(wt: &WriteTransaction, id: Uuid) -> Result<AsyncJob> {
    let table = wt.open_table(JOBS).map_err(db_err)?;
    get_json(&table, &id.to_string())?.ok_or_else(|| GovernError::JobNotFound(id.to_string()))
}

fn save(wt: &WriteTransaction, job: &AsyncJob) -> Result<()> {
    let mut table = wt.open_table(JOBS).map_err(db_err)?;
    put_json(&mut table, &job.id.to_string(), job)
}

fn push_queue(wt: &WriteTransaction, job: &AsyncJob) -> Result<()> {
    let mut queue = wt.open_table(JOB_QUEUE).map_err(db_err)?;
    let id = job.id.to_string();
    queue
        .insert(queue_key(job.available_at, job.id).as_slice(), id.as_str())
        .map_err(db_err)?;
    Ok(())
}

fn pop_queue(wt: &WriteTransaction, job: &AsyncJob) -> Result<bool> {
    let mut queue = wt.open_table(JOB_QUEUE).map_err(db_err)?;
    let removed = queue
        .remove(queue_key(job.available_at, job.id).as_slice())
        .map_err(db_err)?
        .is_some();
    Ok(removed)
}

impl JobQueue {
    pub fn new(
        store: Arc<GovernStore>,
        orgs: Arc<dyn OrgDirectory>,
        clock: Arc<dyn Clock>,
        config: JobsConfig,
    ) -> Self {
        Self {
            store,
            orgs,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &JobsConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Enqueue
    // -----------------------------------------------------------------------

    /// Insert a new QUEUED job inside `wt`.
    pub(crate) fn stage(
        &self,
        wt: &WriteTransaction,
        payload: JobPayload,
        organization_id: &str,
    ) -> Result<AsyncJob> {
        let now = self.clock.now();
        let job = AsyncJob {
            id: Uuid::new_v4(),
            payload,
            status: JobStatus::Queued,
            attempts: 0,
            max_attempts: self.config.max_attempts,
            organization_id: organization_id.to_string(),
            created_at: now,
            updated_at: now,
            available_at: now,
            started_at: None,
            finished_at: None,
            last_error: None,
            result: None,
        };
        save(wt, &job)?;
        push_queue(wt, &job)?;
        Ok(job)
    }

    pub fn enqueue(&self, payload: JobPayload, organization_id: &str) -> Result<AsyncJob> {
        if organization_id.trim().is_empty() {
            return Err(GovernError::InvalidInput("organization_id is required".into()));
        }
        let job = self.store.write(|wt| self.stage(wt, payload, organization_id))?;
        tracing::info!(job_id = %job.id, kind = %job.job_type(), org = %job.organization_id, "job enqueued");
        Ok(job)
    }

    /// Enqueue execution of an existing, non-rejected decision of `organization_id`.
    pub fn enqueue_execute_decision(&self, decision_id: Uuid, organization_id: &str) -> Result<AsyncJob> {
        let job = self.store.write(|wt| {
            let decision = decision_in(wt, decision_id)?
                .ok_or_else(|| GovernError::DecisionNotFound(decision_id.to_string()))?;
            if decision.organization_id != organization_id {
                tracing::warn!(
                    decision_id = %decision_id,
                    expected_org = organization_id,
                    actual_org = %decision.organization_id,
                    "refusing to enqueue another tenant's decision"
                );
                return Err(GovernError::OrgMismatch {
                    expected: organization_id.to_string(),
                    actual: decision.organization_id,
                });
            }
            if decision.decision == DecisionKind::Rejected {
                return Err(GovernError::InvalidInput(format!(
                    "decision {decision_id} is REJECTED and cannot be executed"
                )));
            }
            self.stage(wt, JobPayload::ExecuteDecision { decision_id }, organization_id)
        })?;
        tracing::info!(job_id = %job.id, decision_id = %decision_id, "execute-decision job enqueued");
        Ok(job)
    }

    pub fn enqueue_playbook_step(&self, run_id: &str, step_id: &str, organization_id: &str) -> Result<AsyncJob> {
        if run_id.trim().is_empty() || step_id.trim().is_empty() {
            return Err(GovernError::InvalidInput("run_id and step_id are required".into()));
        }
        self.enqueue(
            JobPayload::AdvancePlaybookStep {
                run_id: run_id.to_string(),
                step_id: step_id.to_string(),
            },
            organization_id,
        )
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn get_job(&self, id: Uuid) -> Result<AsyncJob> {
        let found: Option<AsyncJob> = self.store.read(|rt| {
            let table = rt.open_table(JOBS).map_err(db_err)?;
            get_json(&table, &id.to_string())
        })?;
        found.ok_or_else(|| GovernError::JobNotFound(id.to_string()))
    }

    /// Jobs matching `filter`, newest first.
    pub fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<AsyncJob>> {
        let mut jobs: Vec<AsyncJob> = self.store.read(|rt| {
            let table = rt.open_table(JOBS).map_err(db_err)?;
            scan_json(&table)
        })?;
        jobs.retain(|j| {
            filter
                .organization_id
                .as_deref()
                .map_or(true, |o| j.organization_id == o)
                && filter.status.map_or(true, |s| j.status == s)
                && filter.job_type.map_or(true, |t| j.job_type() == t)
        });
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            jobs.truncate(limit);
        }
        Ok(jobs)
    }

    pub fn job_counts(&self, organization_id: Option<&str>) -> Result<BTreeMap<String, u64>> {
        let jobs = self.list_jobs(&JobFilter {
            organization_id: organization_id.map(str::to_string),
            ..Default::default()
        })?;
        let mut counts = BTreeMap::new();
        for j in jobs {
            *counts.entry(j.status.as_str().to_string()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    // -----------------------------------------------------------------------
    // Operator actions
    // -----------------------------------------------------------------------

    /// Cancel a QUEUED or RUNNING job. A RUNNING job's in-flight call is not
    /// interrupted; its result is recorded but the job stays CANCELLED.
    pub fn cancel_job(&self, id: Uuid) -> Result<AsyncJob> {
        let now = self.clock.now();
        let job = self.store.write(|wt| {
            let mut job = load(wt, id)?;
            if !job.status.is_cancellable() {
                return Err(GovernError::InvalidTransition {
                    entity: format!("job {id}"),
                    from: job.status.as_str().into(),
                    to: JobStatus::Cancelled.as_str().into(),
                });
            }
            if job.status == JobStatus::Queued {
                pop_queue(wt, &job)?;
            }
            job.status = JobStatus::Cancelled;
            job.updated_at = now;
            job.finished_at = Some(now);
            save(wt, &job)?;
            Ok(job)
        })?;
        tracing::info!(job_id = %id, "job cancelled");
        Ok(job)
    }

    /// Requeue a FAILED or DEAD_LETTER job with a fresh attempt budget,
    /// optionally raising `max_attempts`.
    pub fn retry_job(&self, id: Uuid, max_attempts: Option<u32>) -> Result<AsyncJob> {
        if max_attempts == Some(0) {
            return Err(GovernError::InvalidInput("max_attempts must be at least 1".into()));
        }
        let now = self.clock.now();
        let job = self.store.write(|wt| {
            let mut job = load(wt, id)?;
            if !job.status.is_retryable_by_operator() {
                return Err(GovernError::InvalidTransition {
                    entity: format!("job {id}"),
                    from: job.status.as_str().into(),
                    to: JobStatus::Queued.as_str().into(),
                });
            }
            if let Some(max) = max_attempts {
                job.max_attempts = max;
            }
            job.status = JobStatus::Queued;
            job.attempts = 0;
            job.available_at = now;
            job.updated_at = now;
            job.finished_at = None;
            save(wt, &job)?;
            push_queue(wt, &job)?;
            Ok(job)
        })?;
        tracing::info!(job_id = %id, max_attempts = job.max_attempts, "job requeued by operator");
        Ok(job)
    }

    // -----------------------------------------------------------------------
    // Processing
    // -----------------------------------------------------------------------

    /// Claim the oldest due job, moving it to RUNNING and counting the attempt.
    pub fn claim_next(&self) -> Result<Option<AsyncJob>> {
        let now = self.clock.now();
        let due = self.store.read(|rt| {
            let queue = rt.open_table(JOB_QUEUE).map_err(db_err)?;
            due_entries(&queue, now, 16)
        })?;
        for (key, id) in due {
            let claimed = self.store.write(|wt| {
                {
                    let mut queue = wt.open_table(JOB_QUEUE).map_err(db_err)?;
                    if queue.remove(key.as_slice()).map_err(db_err)?.is_none() {
                        return Ok(None);
                    }
                }
                let table = wt.open_table(JOBS).map_err(db_err)?;
                let found: Option<AsyncJob> = get_json(&table, &id)?;
                drop(table);
                let Some(mut job) = found else {
                    return Ok(None);
                };
                if job.status != JobStatus::Queued {
                    return Ok(None);
                }
                job.status = JobStatus::Running;
                job.attempts += 1;
                job.started_at = Some(now);
                job.updated_at = now;
                save(wt, &job)?;
                Ok(Some(job))
            })?;
            if let Some(job) = claimed {
                tracing::debug!(job_id = %job.id, attempt = job.attempts, "job claimed");
                return Ok(Some(job));
            }
        }
        Ok(None)
    }

    fn admin_for(&self, organization_id: &str) -> Option<String> {
        match self.orgs.find_org_admin(organization_id) {
            Ok(admin) => admin,
            Err(e) => {
                tracing::warn!(org = organization_id, error = %e, "org admin lookup failed");
                None
            }
        }
    }

    /// Stage the alerts for a job that just reached DEAD_LETTER or FAILED.
    fn stage_alerts(
        &self,
        wt: &WriteTransaction,
        job: &AsyncJob,
        admin: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let Some(admin) = admin else {
            tracing::warn!(job_id = %job.id, org = %job.organization_id, "no org admin to notify");
            return Ok(());
        };
        if job.status == JobStatus::DeadLetter {
            outbox::stage(
                wt,
                Notification::new(OutboxType::DeadLetter, admin, &job.organization_id, alert_payload(job)),
                now,
            )?;
        }
        if job.job_type() == JobType::AdvancePlaybookStep {
            outbox::stage(
                wt,
                Notification::new(OutboxType::PlaybookStuck, admin, &job.organization_id, alert_payload(job)),
                now,
            )?;
        }
        Ok(())
    }

    /// Apply the result of executing a claimed job.
    pub fn record_outcome(&self, job_id: Uuid, outcome: Result<Value>) -> Result<AsyncJob> {
        let now = self.clock.now();
        let org = self.get_job(job_id)?.organization_id;
        let admin = if outcome.is_err() { self.admin_for(&org) } else { None };

        let job = self.store.write(|wt| {
            let mut job = load(wt, job_id)?;
            job.updated_at = now;
            match job.status {
                JobStatus::Running => {}
                JobStatus::Cancelled => {
                    match &outcome {
                        Ok(v) => job.result = Some(v.clone()),
                        Err(e) => job.last_error = Some(e.to_string()),
                    }
                    save(wt, &job)?;
                    return Ok(job);
                }
                other => {
                    tracing::warn!(job_id = %job_id, status = %other, "outcome for job not RUNNING ignored");
                    return Ok(job);
                }
            }

            match &outcome {
                Ok(v) => {
                    job.status = JobStatus::Success;
                    job.result = Some(v.clone());
                    job.last_error = None;
                    job.finished_at = Some(now);
                }
                Err(e) if e.is_retryable() && job.attempts < job.max_attempts => {
                    job.status = JobStatus::Queued;
                    job.last_error = Some(e.to_string());
                    job.available_at = now + self.config.backoff_for(job.attempts);
                    push_queue(wt, &job)?;
                }
                Err(e) => {
                    job.status = if e.is_retryable() {
                        JobStatus::DeadLetter
                    } else {
                        JobStatus::Failed
                    };
                    job.last_error = Some(e.to_string());
                    job.finished_at = Some(now);
                    self.stage_alerts(wt, &job, admin.as_deref(), now)?;
                }
            }
            save(wt, &job)?;
            Ok(job)
        })?;

        match job.status {
            JobStatus::Success => tracing::info!(job_id = %job.id, attempts = job.attempts, "job succeeded"),
            JobStatus::Queued => tracing::warn!(
                job_id = %job.id,
                attempt = job.attempts,
                max_attempts = job.max_attempts,
                retry_at = %job.available_at,
                error = job.last_error.as_deref().unwrap_or_default(),
                "job failed; will retry"
            ),
            JobStatus::DeadLetter => tracing::error!(
                job_id = %job.id,
                attempts = job.attempts,
                error = job.last_error.as_deref().unwrap_or_default(),
                "job dead-lettered"
            ),
            JobStatus::Failed => tracing::error!(
                job_id = %job.id,
                error = job.last_error.as_deref().unwrap_or_default(),
                "job failed permanently"
            ),
            _ => {}
        }
        Ok(job)
    }

    /// Requeue RUNNING jobs older than `max_age`, left behind by a crashed
    /// process. Jobs with no attempts left go to DEAD_LETTER instead.
    ///
    /// Returns the number of jobs recovered.
    pub fn startup_recovery(&self, max_age: Duration) -> Result<u32> {
        let now = self.clock.now();
        // An age reaching past the earliest representable time leaves nothing stale.
        let Some(cutoff) = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
        else {
            return Ok(0);
        };

        let stale = self.list_jobs(&JobFilter {
            status: Some(JobStatus::Running),
            ..Default::default()
        })?;
        let mut count = 0u32;
        for candidate in stale.into_iter().filter(|j| j.updated_at < cutoff) {
            let admin = self.admin_for(&candidate.organization_id);
            let recovered = self.store.write(|wt| {
                let mut job = load(wt, candidate.id)?;
                if job.status != JobStatus::Running || job.updated_at >= cutoff {
                    return Ok(false);
                }
                job.updated_at = now;
                job.last_error = Some("recovered after restart".into());
                if job.attempts >= job.max_attempts {
                    job.status = JobStatus::DeadLetter;
                    job.finished_at = Some(now);
                    self.stage_alerts(wt, &job, admin.as_deref(), now)?;
                } else {
                    job.status = JobStatus::Queued;
                    job.available_at = now;
                    push_queue(wt, &job)?;
                }
                save(wt, &job)?;
                Ok(true)
            })?;
            if recovered {
                count += 1;
            }
        }
        if count > 0 {
            tracing::warn!(count, "recovered orphaned RUNNING jobs");
        }
        Ok(count)
    }
}

fn alert_payload(job: &AsyncJob) -> Value {
    json!({
        "job_id": job.id,
        "job_type": job.job_type(),
        "status": job.status,
        "attempts": job.attempts,
        "last_error": job.last_error,
        "job": job.payload,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::OutboxConfig;
    use crate::error::ExternalErrorKind;
    use crate::outbox::{Outbox, OutboxStatus};
    use crate::store::OrgSettings;
    use chrono::Duration as CDur;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        store: Arc<GovernStore>,
        clock: Arc<ManualClock>,
        queue: JobQueue,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(GovernStore::open(&dir.path().join("gov.redb")).unwrap());
        store
            .put_org_settings(&OrgSettings {
                organization_id: "org-1".into(),
                admin_user_id: Some("u-admin".into()),
                ..Default::default()
            })
            .unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let queue = JobQueue::new(store.clone(), store.clone(), clock.clone(), JobsConfig::default());
        Fixture {
            _dir: dir,
            store,
            clock,
            queue,
        }
    }

    fn outbox_of(f: &Fixture) -> Outbox {
        Outbox::new(f.store.clone(), f.clock.clone(), OutboxConfig::default())
    }

    fn server_down() -> GovernError {
        GovernError::external(ExternalErrorKind::Server, "502 bad gateway")
    }

    #[test]
    fn claims_in_enqueue_order() {
        let f = fixture();
        let first = f.queue.enqueue_playbook_step("run-1", "s-1", "org-1").unwrap();
        f.clock.advance(CDur::milliseconds(5));
        let second = f.queue.enqueue_playbook_step("run-1", "s-2", "org-1").unwrap();

        let a = f.queue.claim_next().unwrap().unwrap();
        let b = f.queue.claim_next().unwrap().unwrap();
        assert_eq!((a.id, b.id), (first.id, second.id));
        assert_eq!(a.status, JobStatus::Running);
        assert_eq!(a.attempts, 1);
        assert!(f.queue.claim_next().unwrap().is_none());
    }

    #[test]
    fn retryable_failure_requeues_with_backoff() {
        let f = fixture();
        let job = f.queue.enqueue_playbook_step("run-1", "s-1", "org-1").unwrap();
        f.queue.claim_next().unwrap().unwrap();
        let after = f.queue.record_outcome(job.id, Err(server_down())).unwrap();
        assert_eq!(after.status, JobStatus::Queued);
        assert_eq!(after.attempts, 1);
        assert!(after.last_error.unwrap().contains("502"));

        // Not due until the 30s backoff has passed.
        assert!(f.queue.claim_next().unwrap().is_none());
        f.clock.advance(CDur::seconds(30));
        let again = f.queue.claim_next().unwrap().unwrap();
        assert_eq!(again.attempts, 2);
    }

    #[test]
    fn three_failures_dead_letter_with_one_alert() {
        let f = fixture();
        let job = f
            .queue
            .enqueue(JobPayload::ExecuteDecision { decision_id: Uuid::new_v4() }, "org-1")
            .unwrap();
        let mut attempts_seen = Vec::new();
        for _ in 0..3 {
            f.clock.advance(CDur::minutes(20));
            let claimed = f.queue.claim_next().unwrap().unwrap();
            attempts_seen.push(claimed.attempts);
            f.queue.record_outcome(claimed.id, Err(server_down())).unwrap();
        }
        assert_eq!(attempts_seen, vec![1, 2, 3]);
        let dead = f.queue.get_job(job.id).unwrap();
        assert_eq!(dead.status, JobStatus::DeadLetter);

        let messages = outbox_of(&f)
            .list_messages(Some("org-1"), Some(OutboxStatus::Queued))
            .unwrap();
        let dead_letters: Vec<_> = messages
            .iter()
            .filter(|m| m.message_type == OutboxType::DeadLetter)
            .collect();
        assert_eq!(dead_letters.len(), 1);
        assert_eq!(dead_letters[0].recipient_user_id, "u-admin");

        // Terminal: nothing further is picked up.
        f.clock.advance(CDur::hours(1));
        assert!(f.queue.claim_next().unwrap().is_none());
    }

    #[test]
    fn non_retryable_failure_fails_immediately() {
        let f = fixture();
        let job = f.queue.enqueue_playbook_step("run-1", "s-1", "org-1").unwrap();
        f.queue.claim_next().unwrap();
        let after = f
            .queue
            .record_outcome(
                job.id,
                Err(GovernError::external(ExternalErrorKind::Auth, "401")),
            )
            .unwrap();
        assert_eq!(after.status, JobStatus::Failed);
        assert_eq!(after.attempts, 1);
        let stuck = outbox_of(&f).list_messages(Some("org-1"), None).unwrap();
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].message_type, OutboxType::PlaybookStuck);
    }

    #[test]
    fn cancel_running_job_keeps_cancelled_status() {
        let f = fixture();
        let job = f.queue.enqueue_playbook_step("run-1", "s-1", "org-1").unwrap();
        f.queue.claim_next().unwrap();
        let cancelled = f.queue.cancel_job(job.id).unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);

        let late = f
            .queue
            .record_outcome(job.id, Ok(json!({"advanced": true})))
            .unwrap();
        assert_eq!(late.status, JobStatus::Cancelled);
        assert_eq!(late.result, Some(json!({"advanced": true})));

        assert!(matches!(
            f.queue.cancel_job(job.id),
            Err(GovernError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn cancel_queued_job_removes_it_from_queue() {
        let f = fixture();
        let job = f.queue.enqueue_playbook_step("run-1", "s-1", "org-1").unwrap();
        f.queue.cancel_job(job.id).unwrap();
        assert!(f.queue.claim_next().unwrap().is_none());
    }

    #[test]
    fn success_is_terminal() {
        let f = fixture();
        let job = f.queue.enqueue_playbook_step("run-1", "s-1", "org-1").unwrap();
        f.queue.claim_next().unwrap();
        f.queue.record_outcome(job.id, Ok(json!({}))).unwrap();
        // A stray late failure report changes nothing.
        let after = f.queue.record_outcome(job.id, Err(server_down())).unwrap();
        assert_eq!(after.status, JobStatus::Success);
        assert!(matches!(
            f.queue.retry_job(job.id, None),
            Err(GovernError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn operator_retry_resets_attempts() {
        let f = fixture();
        let job = f.queue.enqueue_playbook_step("run-1", "s-1", "org-1").unwrap();
        f.queue.claim_next().unwrap();
        f.queue
            .record_outcome(job.id, Err(GovernError::external(ExternalErrorKind::Validation, "422")))
            .unwrap();
        let retried = f.queue.retry_job(job.id, Some(5)).unwrap();
        assert_eq!(retried.status, JobStatus::Queued);
        assert_eq!(retried.attempts, 0);
        assert_eq!(retried.max_attempts, 5);
        assert!(f.queue.claim_next().unwrap().is_some());
        assert!(matches!(
            f.queue.retry_job(job.id, Some(0)),
            Err(GovernError::InvalidInput(_))
        ));
    }

    #[test]
    fn startup_recovery_requeues_stale_running_jobs() {
        let f = fixture();
        let stale = f.queue.enqueue_playbook_step("run-1", "s-1", "org-1").unwrap();
        f.queue.claim_next().unwrap();
        f.clock.advance(CDur::minutes(10));
        let fresh = f.queue.enqueue_playbook_step("run-1", "s-2", "org-1").unwrap();
        f.queue.claim_next().unwrap();

        let n = f.queue.startup_recovery(Duration::from_secs(120)).unwrap();
        assert_eq!(n, 1);
        let recovered = f.queue.get_job(stale.id).unwrap();
        assert_eq!(recovered.status, JobStatus::Queued);
        assert!(recovered.last_error.unwrap().contains("recovered"));
        assert_eq!(f.queue.get_job(fresh.id).unwrap().status, JobStatus::Running);
    }

    #[test]
    fn startup_recovery_with_huge_age_recovers_nothing() {
        let f = fixture();
        let job = f.queue.enqueue_playbook_step("run-1", "s-1", "org-1").unwrap();
        f.queue.claim_next().unwrap();
        f.clock.advance(CDur::days(1));

        assert_eq!(f.queue.startup_recovery(Duration::from_secs(u64::MAX)).unwrap(), 0);
        assert_eq!(f.queue.get_job(job.id).unwrap().status, JobStatus::Running);
    }

    #[test]
    fn startup_recovery_on_empty_db_returns_zero() {
        let f = fixture();
        assert_eq!(f.queue.startup_recovery(Duration::from_secs(60)).unwrap(), 0);
    }

    #[test]
    fn enqueue_execute_decision_checks_decision() {
        let f = fixture();
        let err = f
            .queue
            .enqueue_execute_decision(Uuid::new_v4(), "org-1")
            .unwrap_err();
        assert!(matches!(err, GovernError::DecisionNotFound(_)));
    }

    #[test]
    fn counts_by_status() {
        let f = fixture();
        f.queue.enqueue_playbook_step("run-1", "s-1", "org-1").unwrap();
        f.queue.enqueue_playbook_step("run-1", "s-2", "org-1").unwrap();
        f.queue.enqueue_playbook_step("run-9", "s-1", "org-2").unwrap();
        f.queue.claim_next().unwrap();
        let counts = f.queue.job_counts(Some("org-1")).unwrap();
        assert_eq!(counts.values().sum::<u64>(), 2);
        assert_eq!(f.queue.job_counts(None).unwrap().values().sum::<u64>(), 3);
    }
}
