//! Persistent storage for the governance pipeline using redb.
//!
//! # Table design
//!
//! Records are JSON values keyed by their natural id. Two tables carry the
//! uniqueness guarantees the pipeline depends on:
//!
//! - `action_decisions` is keyed by proposal id, so a second decision for the
//!   same proposal collides on insert.
//! - `live_assignments` maps proposal id → the one PENDING/ACKED assignment.
//!
//! The check and the insert happen inside one write transaction. redb admits
//! a single writer at a time, so two racing callers cannot both pass the check.
//!
//! Work queues (`job_queue`, `outbox_queue`) use a 24-byte composite key:
//! ```text
//! [ timestamp_ms: u64 big-endian (8 bytes) | uuid: 16 bytes ]
//! ```
//! Byte order equals timestamp order, so a range scan `..=due_upper_bound(now)`
//! returns every entry due by `now`, oldest first.

use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{Database, ReadTransaction, ReadableTable, Table, TableDefinition, WriteTransaction};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::collab::{OrgDirectory, PolicyDirectory, ProposalStore};
use crate::error::{db_err, Result};
use crate::proposal::ActionProposal;

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

pub(crate) const POLICIES: TableDefinition<&str, &[u8]> = TableDefinition::new("ai_policies");
pub(crate) const DECISIONS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("action_decisions");
pub(crate) const DECISION_IDS: TableDefinition<&str, &str> = TableDefinition::new("decision_ids");
pub(crate) const JOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("async_jobs");
pub(crate) const JOB_QUEUE: TableDefinition<&[u8], &str> = TableDefinition::new("job_queue");
pub(crate) const ASSIGNMENTS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("workqueue_assignments");
pub(crate) const LIVE_ASSIGNMENTS: TableDefinition<&str, &str> =
    TableDefinition::new("live_assignments");
pub(crate) const OUTBOX: TableDefinition<&str, &[u8]> = TableDefinition::new("notification_outbox");
pub(crate) const OUTBOX_QUEUE: TableDefinition<&[u8], &str> = TableDefinition::new("outbox_queue");
pub(crate) const PREFERENCES: TableDefinition<&str, bool> =
    TableDefinition::new("notification_preferences");
const PROPOSALS: TableDefinition<&str, &[u8]> = TableDefinition::new("proposals");
const ORG_SETTINGS: TableDefinition<&str, &[u8]> = TableDefinition::new("org_settings");

// ---------------------------------------------------------------------------
// Key helpers
// ---------------------------------------------------------------------------

pub(crate) fn queue_key(ts: DateTime<Utc>, id: Uuid) -> [u8; 24] {
    let mut key = [0u8; 24];
    let ms = ts.timestamp_millis().max(0) as u64;
    key[..8].copy_from_slice(&ms.to_be_bytes());
    key[8..].copy_from_slice(id.as_bytes());
    key
}

/// Upper bound for a range scan returning all entries due by `now`.
///
/// The UUID suffix is `0xff` × 16, which is greater than any valid UUID,
/// so every entry with `timestamp_ms <= now_ms` is included.
pub(crate) fn due_upper_bound(now: DateTime<Utc>) -> [u8; 24] {
    let mut key = [0u8; 24];
    let ms = now.timestamp_millis().max(0) as u64;
    key[..8].copy_from_slice(&ms.to_be_bytes());
    key[8..].fill(0xff);
    key
}

// ---------------------------------------------------------------------------
// JSON value helpers
// ---------------------------------------------------------------------------

pub(crate) fn get_json<T, R>(table: &R, key: &str) -> Result<Option<T>>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(key).map_err(db_err)? {
        Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
        None => Ok(None),
    }
}

pub(crate) fn put_json<T: Serialize>(
    table: &mut Table<'_, &'static str, &'static [u8]>,
    key: &str,
    value: &T,
) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    table.insert(key, bytes.as_slice()).map_err(db_err)?;
    Ok(())
}

pub(crate) fn scan_json<T, R>(table: &R) -> Result<Vec<T>>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static str, &'static [u8]>,
{
    let mut out = Vec::new();
    for entry in table.iter().map_err(db_err)? {
        let (_, v) = entry.map_err(db_err)?;
        out.push(serde_json::from_slice(v.value())?);
    }
    Ok(out)
}

/// Queue entries due by `now`, oldest first, as `(key, id)` pairs.
pub(crate) fn due_entries<R>(table: &R, now: DateTime<Utc>, limit: usize) -> Result<Vec<(Vec<u8>, String)>>
where
    R: ReadableTable<&'static [u8], &'static str>,
{
    let upper = due_upper_bound(now);
    let mut out = Vec::new();
    for entry in table.range(..=upper.as_slice()).map_err(db_err)? {
        if out.len() >= limit {
            break;
        }
        let (k, v) = entry.map_err(db_err)?;
        out.push((k.value().to_vec(), v.value().to_string()));
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// OrgSettings: local org directory
// ---------------------------------------------------------------------------

/// Organization facts normally owned by the product's org service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrgSettings {
    pub organization_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_user_id: Option<String>,
    #[serde(default)]
    pub regulatory_mode: bool,
    /// Projects placed under regulatory mode individually.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub regulatory_projects: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub active_roles: Vec<String>,
}

// ---------------------------------------------------------------------------
// GovernStore
// ---------------------------------------------------------------------------

/// The single redb database backing every table of the pipeline.
pub struct GovernStore {
    db: Database,
}

impl GovernStore {
    /// Open or create the database at `path`, creating every table.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            crate::io::ensure_dir(parent)?;
        }
        let db = Database::create(path).map_err(db_err)?;
        let wt = db.begin_write().map_err(db_err)?;
        wt.open_table(POLICIES).map_err(db_err)?;
        wt.open_table(DECISIONS).map_err(db_err)?;
        wt.open_table(DECISION_IDS).map_err(db_err)?;
        wt.open_table(JOBS).map_err(db_err)?;
        wt.open_table(JOB_QUEUE).map_err(db_err)?;
        wt.open_table(ASSIGNMENTS).map_err(db_err)?;
        wt.open_table(LIVE_ASSIGNMENTS).map_err(db_err)?;
        wt.open_table(OUTBOX).map_err(db_err)?;
        wt.open_table(OUTBOX_QUEUE).map_err(db_err)?;
        wt.open_table(PREFERENCES).map_err(db_err)?;
        wt.open_table(PROPOSALS).map_err(db_err)?;
        wt.open_table(ORG_SETTINGS).map_err(db_err)?;
        wt.commit().map_err(db_err)?;
        Ok(Self { db })
    }

    /// Open the database under a `.govern/` root directory.
    pub fn open_root(root: &Path) -> Result<Self> {
        Self::open(&crate::paths::db_path(root))
    }

    pub(crate) fn read<T>(&self, f: impl FnOnce(&ReadTransaction) -> Result<T>) -> Result<T> {
        let rt = self.db.begin_read().map_err(db_err)?;
        f(&rt)
    }

    /// Run `f` in a write transaction. Commits on `Ok`, aborts on `Err`.
    pub(crate) fn write<T>(&self, f: impl FnOnce(&WriteTransaction) -> Result<T>) -> Result<T> {
        let wt = self.db.begin_write().map_err(db_err)?;
        match f(&wt) {
            Ok(value) => {
                wt.commit().map_err(db_err)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(abort_err) = wt.abort() {
                    tracing::warn!(error = %abort_err, "failed to abort write transaction");
                }
                Err(e)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Local proposal catalogue
    // -----------------------------------------------------------------------

    pub fn put_proposal(&self, proposal: &ActionProposal) -> Result<()> {
        self.write(|wt| {
            let mut table = wt.open_table(PROPOSALS).map_err(db_err)?;
            put_json(&mut table, &proposal.proposal_id, proposal)
        })
    }

    // -----------------------------------------------------------------------
    // Local org directory
    // -----------------------------------------------------------------------

    pub fn org_settings(&self, organization_id: &str) -> Result<OrgSettings> {
        let found: Option<OrgSettings> = self.read(|rt| {
            let table = rt.open_table(ORG_SETTINGS).map_err(db_err)?;
            get_json(&table, organization_id)
        })?;
        Ok(found.unwrap_or_else(|| OrgSettings {
            organization_id: organization_id.to_string(),
            ..Default::default()
        }))
    }

    pub fn put_org_settings(&self, settings: &OrgSettings) -> Result<()> {
        self.write(|wt| {
            let mut table = wt.open_table(ORG_SETTINGS).map_err(db_err)?;
            put_json(&mut table, &settings.organization_id, settings)
        })
    }
}

impl ProposalStore for GovernStore {
    fn get_proposal(&self, proposal_id: &str) -> Result<Option<ActionProposal>> {
        self.read(|rt| {
            let table = rt.open_table(PROPOSALS).map_err(db_err)?;
            get_json(&table, proposal_id)
        })
    }
}

impl PolicyDirectory for GovernStore {
    fn regulatory_mode(&self, organization_id: &str, project_id: Option<&str>) -> Result<bool> {
        let settings = self.org_settings(organization_id)?;
        let project_flag = project_id
            .map(|p| settings.regulatory_projects.iter().any(|r| r == p))
            .unwrap_or(false);
        Ok(settings.regulatory_mode || project_flag)
    }

    fn active_roles(&self, organization_id: &str, _project_id: Option<&str>) -> Result<Vec<String>> {
        Ok(self.org_settings(organization_id)?.active_roles)
    }
}

impl OrgDirectory for GovernStore {
    fn find_org_admin(&self, organization_id: &str) -> Result<Option<String>> {
        Ok(self.org_settings(organization_id)?.admin_user_id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
