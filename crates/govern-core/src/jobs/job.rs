//! Job data model.
//!
//! Transitions:
//!
//! ```text
//! QUEUED → RUNNING → SUCCESS
//!                  → QUEUED        (retryable failure, attempts < max)
//!                  → DEAD_LETTER   (retryable failure, attempts exhausted)
//!                  → FAILED        (non-retryable failure)
//! QUEUED | RUNNING → CANCELLED     (operator)
//! FAILED | DEAD_LETTER → QUEUED    (operator retry only)
//! ```
//!
//! Attempts are counted when a job is picked up, so `attempts` is the number
//! of executions started.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::GovernError;
use crate::types::ActionType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    ExecuteDecision,
    AdvancePlaybookStep,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::ExecuteDecision => "EXECUTE_DECISION",
            JobType::AdvancePlaybookStep => "ADVANCE_PLAYBOOK_STEP",
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobType {
    type Err = GovernError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "EXECUTE_DECISION" => Ok(JobType::ExecuteDecision),
            "ADVANCE_PLAYBOOK_STEP" => Ok(JobType::AdvancePlaybookStep),
            _ => Err(GovernError::InvalidInput(format!("unknown job type '{s}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Running,
    Success,
    Failed,
    DeadLetter,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Running => "RUNNING",
            JobStatus::Success => "SUCCESS",
            JobStatus::Failed => "FAILED",
            JobStatus::DeadLetter => "DEAD_LETTER",
            JobStatus::Cancelled => "CANCELLED",
        }
    }

    /// No automatic transition leaves these states.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::Failed | JobStatus::DeadLetter | JobStatus::Cancelled
        )
    }

    pub fn is_cancellable(self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Running)
    }

    pub fn is_retryable_by_operator(self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::DeadLetter)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = GovernError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "QUEUED" => Ok(JobStatus::Queued),
            "RUNNING" => Ok(JobStatus::Running),
            "SUCCESS" => Ok(JobStatus::Success),
            "FAILED" => Ok(JobStatus::Failed),
            "DEAD_LETTER" => Ok(JobStatus::DeadLetter),
            "CANCELLED" => Ok(JobStatus::Cancelled),
            _ => Err(GovernError::InvalidInput(format!("unknown job status '{s}'"))),
        }
    }
}

/// What a job does. The variant fixes the job type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobPayload {
    ExecuteDecision { decision_id: Uuid },
    AdvancePlaybookStep { run_id: String, step_id: String },
}

impl JobPayload {
    pub fn job_type(&self) -> JobType {
        match self {
            JobPayload::ExecuteDecision { .. } => JobType::ExecuteDecision,
            JobPayload::AdvancePlaybookStep { .. } => JobType::AdvancePlaybookStep,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsyncJob {
    pub id: Uuid,
    pub payload: JobPayload,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub organization_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Earliest time the job may be picked up; the queue key while QUEUED.
    pub available_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl AsyncJob {
    pub fn job_type(&self) -> JobType {
        self.payload.job_type()
    }
}

/// The side effect an approved decision authorises, as handed to the
/// executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovedAction {
    pub job_id: Uuid,
    pub decision_id: Uuid,
    pub proposal_id: String,
    pub organization_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub action_type: ActionType,
    /// Proposal payload with any reviewer edits applied.
    pub payload: Map<String, Value>,
    pub decided_by_user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybookStep {
    pub job_id: Uuid,
    pub run_id: String,
    pub step_id: String,
    pub organization_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_serializes_with_type_tag() {
        let p = JobPayload::AdvancePlaybookStep {
            run_id: "run-1".into(),
            step_id: "step-2".into(),
        };
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["type"], "ADVANCE_PLAYBOOK_STEP");
        assert_eq!(p.job_type(), JobType::AdvancePlaybookStep);
    }

    #[test]
    fn only_queued_and_running_are_cancellable() {
        for s in [
            JobStatus::Success,
            JobStatus::Failed,
            JobStatus::DeadLetter,
            JobStatus::Cancelled,
        ] {
            assert!(s.is_terminal());
            assert!(!s.is_cancellable());
        }
        assert!(JobStatus::Queued.is_cancellable());
        assert!(JobStatus::Running.is_cancellable());
        assert!(JobStatus::DeadLetter.is_retryable_by_operator());
        assert!(!JobStatus::Cancelled.is_retryable_by_operator());
        assert_eq!("dead_letter".parse::<JobStatus>().unwrap(), JobStatus::DeadLetter);
    }
}
