pub mod approval;
pub mod config;
pub mod decision;
pub mod init;
pub mod job;
pub mod org;
pub mod outbox;
pub mod policy;
pub mod proposal;
pub mod worker;

use std::path::Path;

use anyhow::Context;
use govern_core::Governance;
use uuid::Uuid;

/// Open the pipeline rooted at `root`.
pub(crate) fn open(root: &Path) -> anyhow::Result<Governance> {
    Governance::open(root).with_context(|| format!("failed to open governance data under {}", root.display()))
}

pub(crate) fn parse_id(kind: &str, raw: &str) -> anyhow::Result<Uuid> {
    Uuid::parse_str(raw.trim()).with_context(|| format!("invalid {kind} id '{raw}'"))
}
