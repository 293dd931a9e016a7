//! Asynchronous job engine: durable queue plus processor.

pub mod job;
pub mod processor;
pub mod queue;

pub use job::{ApprovedAction, AsyncJob, JobPayload, JobStatus, JobType, PlaybookStep};
pub use processor::{JobProcessor, JobRun, PLAYBOOK_RESOURCE};
pub use queue::{JobFilter, JobQueue};
