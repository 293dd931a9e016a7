//! Notification outbox: durable, at-least-once delivery of alerts.
//!
//! Producers write a message in the same redb transaction as the state change
//! that caused it ([`stage`]), so an alert exists if and only if its trigger
//! was committed. A delivery sweep later hands messages to the
//! [`NotificationTransport`].
//!
//! Each claim pushes the message's queue key forward by a lease. A sweeper
//! that dies mid-delivery leaves the message QUEUED and it becomes due again
//! once the lease runs out. Consumers must therefore tolerate duplicates.
//! A sweeper that settles after its lease was taken over changes nothing.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use redb::{ReadableTable, WriteTransaction};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::clock::Clock;
use crate::collab::NotificationTransport;
use crate::config::OutboxConfig;
use crate::error::{db_err, GovernError, Result};
use crate::store::{
    due_entries, get_json, put_json, queue_key, scan_json, GovernStore, OUTBOX, OUTBOX_QUEUE,
    PREFERENCES,
};

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxType {
    ApprovalDue,
    PlaybookStuck,
    DeadLetter,
    Escalation,
}

impl OutboxType {
    pub fn as_str(self) -> &'static str {
        match self {
            OutboxType::ApprovalDue => "APPROVAL_DUE",
            OutboxType::PlaybookStuck => "PLAYBOOK_STUCK",
            OutboxType::DeadLetter => "DEAD_LETTER",
            OutboxType::Escalation => "ESCALATION",
        }
    }
}

impl std::fmt::Display for OutboxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OutboxType {
    type Err = GovernError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "APPROVAL_DUE" => Ok(OutboxType::ApprovalDue),
            "PLAYBOOK_STUCK" => Ok(OutboxType::PlaybookStuck),
            "DEAD_LETTER" => Ok(OutboxType::DeadLetter),
            "ESCALATION" => Ok(OutboxType::Escalation),
            _ => Err(GovernError::InvalidInput(format!(
                "unknown notification type '{s}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Queued,
    Sent,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OutboxStatus::Queued => "QUEUED",
            OutboxStatus::Sent => "SENT",
            OutboxStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OutboxStatus {
    type Err = GovernError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "QUEUED" => Ok(OutboxStatus::Queued),
            "SENT" => Ok(OutboxStatus::Sent),
            "FAILED" => Ok(OutboxStatus::Failed),
            _ => Err(GovernError::InvalidInput(format!("unknown outbox status '{s}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub message_type: OutboxType,
    pub recipient_user_id: String,
    pub organization_id: String,
    pub payload: Value,
    pub status: OutboxStatus,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Queue position; meaningful only while QUEUED.
    pub next_attempt_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
}

/// A message a producer wants sent.
#[derive(Debug, Clone)]
pub struct Notification {
    pub message_type: OutboxType,
    pub recipient_user_id: String,
    pub organization_id: String,
    pub payload: Value,
}

impl Notification {
    pub fn new(
        message_type: OutboxType,
        recipient_user_id: impl Into<String>,
        organization_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            message_type,
            recipient_user_id: recipient_user_id.into(),
            organization_id: organization_id.into(),
            payload,
        }
    }
}

fn preference_key(user_id: &str, organization_id: &str, message_type: OutboxType) -> String {
    format!("{organization_id}/{user_id}/{}", message_type.as_str())
}

// ---------------------------------------------------------------------------
// Transactional staging
// ---------------------------------------------------------------------------

fn insert_message(wt: &WriteTransaction, n: Notification, now: DateTime<Utc>) -> Result<OutboxMessage> {
    let msg = OutboxMessage {
        id: Uuid::new_v4(),
        message_type: n.message_type,
        recipient_user_id: n.recipient_user_id,
        organization_id: n.organization_id,
        payload: n.payload,
        status: OutboxStatus::Queued,
        attempts: 0,
        last_error: None,
        created_at: now,
        updated_at: now,
        next_attempt_at: now,
        sent_at: None,
    };
    let mut table = wt.open_table(OUTBOX).map_err(db_err)?;
    put_json(&mut table, &msg.id.to_string(), &msg)?;
    let mut queue = wt.open_table(OUTBOX_QUEUE).map_err(db_err)?;
    let id = msg.id.to_string();
    queue
        .insert(queue_key(now, msg.id).as_slice(), id.as_str())
        .map_err(db_err)?;
    Ok(msg)
}

/// Write `n` inside `wt` unless the recipient opted out of this type.
pub(crate) fn stage(
    wt: &WriteTransaction,
    n: Notification,
    now: DateTime<Utc>,
) -> Result<Option<OutboxMessage>> {
    let key = preference_key(&n.recipient_user_id, &n.organization_id, n.message_type);
    let enabled = {
        let prefs = wt.open_table(PREFERENCES).map_err(db_err)?;
        let value = prefs.get(key.as_str()).map_err(db_err)?.map(|g| g.value());
        value.unwrap_or(true)
    };
    if !enabled {
        tracing::debug!(
            recipient = %n.recipient_user_id,
            kind = %n.message_type,
            "notification suppressed by preference"
        );
        return Ok(None);
    }
    insert_message(wt, n, now).map(Some)
}

// ---------------------------------------------------------------------------
// Outbox
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutboxStats {
    pub total: u64,
    pub by_status: BTreeMap<String, u64>,
    pub by_type: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub sent: u32,
    pub retried: u32,
    pub failed: u32,
}

pub struct Outbox {
    store: Arc<GovernStore>,
    clock: Arc<dyn Clock>,
    config: OutboxConfig,
}

impl Outbox {
    pub fn new(store: Arc<GovernStore>, clock: Arc<dyn Clock>, config: OutboxConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Queue a message regardless of preferences.
    pub fn enqueue(
        &self,
        message_type: OutboxType,
        recipient_user_id: &str,
        organization_id: &str,
        payload: Value,
    ) -> Result<OutboxMessage> {
        let now = self.clock.now();
        let n = Notification::new(message_type, recipient_user_id, organization_id, payload);
        let msg = self.store.write(|wt| insert_message(wt, n, now))?;
        tracing::debug!(id = %msg.id, kind = %msg.message_type, "outbox message queued");
        Ok(msg)
    }

    /// Preference lookup; unset means yes.
    pub fn should_notify(
        &self,
        user_id: &str,
        organization_id: &str,
        message_type: OutboxType,
    ) -> Result<bool> {
        let key = preference_key(user_id, organization_id, message_type);
        self.store.read(|rt| {
            let prefs = rt.open_table(PREFERENCES).map_err(db_err)?;
            let value = prefs.get(key.as_str()).map_err(db_err)?.map(|g| g.value());
            Ok(value.unwrap_or(true))
        })
    }

    /// `should_notify` then `enqueue`, atomically.
    pub fn notify(&self, n: Notification) -> Result<Option<OutboxMessage>> {
        let now = self.clock.now();
        self.store.write(|wt| stage(wt, n, now))
    }

    pub fn set_preference(
        &self,
        user_id: &str,
        organization_id: &str,
        message_type: OutboxType,
        enabled: bool,
    ) -> Result<()> {
        let key = preference_key(user_id, organization_id, message_type);
        self.store.write(|wt| {
            let mut prefs = wt.open_table(PREFERENCES).map_err(db_err)?;
            prefs.insert(key.as_str(), enabled).map_err(db_err)?;
            Ok(())
        })
    }

    pub fn get_message(&self, id: Uuid) -> Result<OutboxMessage> {
        let found: Option<OutboxMessage> = self.store.read(|rt| {
            let table = rt.open_table(OUTBOX).map_err(db_err)?;
            get_json(&table, &id.to_string())
        })?;
        found.ok_or_else(|| GovernError::OutboxMessageNotFound(id.to_string()))
    }

    /// Messages, newest first, optionally filtered.
    pub fn list_messages(
        &self,
        organization_id: Option<&str>,
        status: Option<OutboxStatus>,
    ) -> Result<Vec<OutboxMessage>> {
        let mut all: Vec<OutboxMessage> = self.store.read(|rt| {
            let table = rt.open_table(OUTBOX).map_err(db_err)?;
            scan_json(&table)
        })?;
        all.retain(|m| {
            organization_id.map_or(true, |o| m.organization_id == o)
                && status.map_or(true, |s| m.status == s)
        });
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    pub fn get_outbox_stats(&self, organization_id: Option<&str>) -> Result<OutboxStats> {
        let mut stats = OutboxStats::default();
        for m in self.list_messages(organization_id, None)? {
            stats.total += 1;
            *stats.by_status.entry(m.status.as_str().to_string()).or_default() += 1;
            *stats
                .by_type
                .entry(m.message_type.as_str().to_string())
                .or_default() += 1;
        }
        Ok(stats)
    }

    /// Revive a FAILED message with a fresh attempt budget.
    pub fn requeue(&self, id: Uuid) -> Result<OutboxMessage> {
        let now = self.clock.now();
        let key = id.to_string();
        let msg = self.store.write(|wt| {
            let mut table = wt.open_table(OUTBOX).map_err(db_err)?;
            let mut msg: OutboxMessage = get_json(&table, &key)?
                .ok_or_else(|| GovernError::OutboxMessageNotFound(key.clone()))?;
            if msg.status != OutboxStatus::Failed {
                return Err(GovernError::InvalidTransition {
                    entity: format!("outbox message {key}"),
                    from: msg.status.as_str().into(),
                    to: OutboxStatus::Queued.as_str().into(),
                });
            }
            msg.status = OutboxStatus::Queued;
            msg.attempts = 0;
            msg.updated_at = now;
            msg.next_attempt_at = now;
            put_json(&mut table, &key, &msg)?;
            let mut queue = wt.open_table(OUTBOX_QUEUE).map_err(db_err)?;
            queue
                .insert(queue_key(now, id).as_slice(), key.as_str())
                .map_err(db_err)?;
            Ok(msg)
        })?;
        tracing::info!(id = %id, "outbox message requeued");
        Ok(msg)
    }

    /// Take a due message for delivery. Returns None if another sweeper
    /// already took it.
    fn claim(&self, queue_bytes: &[u8], key: &str) -> Result<Option<OutboxMessage>> {
        let now = self.clock.now();
        let lease_until = now + self.config.lease();
        self.store.write(|wt| {
            let mut queue = wt.open_table(OUTBOX_QUEUE).map_err(db_err)?;
            if queue.remove(queue_bytes).map_err(db_err)?.is_none() {
                return Ok(None);
            }
            let mut table = wt.open_table(OUTBOX).map_err(db_err)?;
            let Some(mut msg) = get_json::<OutboxMessage, _>(&table, key)? else {
                return Ok(None);
            };
            if msg.status != OutboxStatus::Queued {
                return Ok(None);
            }
            msg.attempts += 1;
            msg.updated_at = now;
            msg.next_attempt_at = lease_until;
            put_json(&mut table, key, &msg)?;
            queue
                .insert(queue_key(lease_until, msg.id).as_slice(), key)
                .map_err(db_err)?;
            Ok(Some(msg))
        })
    }

    /// Record the delivery outcome for a claimed message. Returns None when
    /// the claim's lease was lost to another sweeper, leaving the row alone.
    fn settle(
        &self,
        claimed: &OutboxMessage,
        outcome: std::result::Result<(), String>,
    ) -> Result<Option<OutboxStatus>> {
        let now = self.clock.now();
        let key = claimed.id.to_string();
        let max_attempts = self.config.max_attempts;
        self.store.write(|wt| {
            let mut table = wt.open_table(OUTBOX).map_err(db_err)?;
            let mut msg: OutboxMessage = get_json(&table, &key)?
                .ok_or_else(|| GovernError::OutboxMessageNotFound(key.clone()))?;
            let still_leased = msg.status == OutboxStatus::Queued
                && msg.attempts == claimed.attempts
                && msg.next_attempt_at == claimed.next_attempt_at;
            if !still_leased {
                return Ok(None);
            }
            let mut queue = wt.open_table(OUTBOX_QUEUE).map_err(db_err)?;
            queue
                .remove(queue_key(claimed.next_attempt_at, claimed.id).as_slice())
                .map_err(db_err)?;
            msg.updated_at = now;
            match outcome {
                Ok(()) => {
                    msg.status = OutboxStatus::Sent;
                    msg.sent_at = Some(now);
                    msg.last_error = None;
                }
                Err(e) if msg.attempts >= max_attempts => {
                    msg.status = OutboxStatus::Failed;
                    msg.last_error = Some(e);
                }
                Err(e) => {
                    let retry_at = now + self.config.backoff_for(msg.attempts);
                    msg.last_error = Some(e);
                    msg.next_attempt_at = retry_at;
                    queue
                        .insert(queue_key(retry_at, msg.id).as_slice(), key.as_str())
                        .map_err(db_err)?;
                }
            }
            put_json(&mut table, &key, &msg)?;
            Ok(Some(msg.status))
        })
    }

    /// Deliver up to `batch_size` due messages, oldest first.
    pub async fn process_queue(&self, transport: &dyn NotificationTransport) -> Result<DeliveryReport> {
        let now = self.clock.now();
        let batch_size = self.config.batch_size;
        let due = self.store.read(|rt| {
            let queue = rt.open_table(OUTBOX_QUEUE).map_err(db_err)?;
            due_entries(&queue, now, batch_size)
        })?;

        let mut report = DeliveryReport::default();
        for (queue_bytes, key) in due {
            let Some(msg) = self.claim(&queue_bytes, &key)? else {
                continue;
            };
            let outcome = transport.deliver(&msg).await.map_err(|e| e.to_string());
            if let Err(e) = &outcome {
                tracing::warn!(id = %msg.id, attempt = msg.attempts, error = %e, "notification delivery failed");
            }
            match self.settle(&msg, outcome)? {
                None => {
                    tracing::warn!(id = %msg.id, attempt = msg.attempts, "delivery lease expired; outcome discarded");
                }
                Some(OutboxStatus::Sent) => report.sent += 1,
                Some(OutboxStatus::Queued) => report.retried += 1,
                Some(OutboxStatus::Failed) => {
                    tracing::error!(
                        id = %msg.id,
                        kind = %msg.message_type,
                        recipient = %msg.recipient_user_id,
                        "notification permanently failed"
                    );
                    report.failed += 1
                }
            }
        }
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// OutboxWorker
// ---------------------------------------------------------------------------

/// Periodic delivery sweep.
pub struct OutboxWorker {
    outbox: Arc<Outbox>,
    transport: Arc<dyn NotificationTransport>,
    interval: Duration,
}

impl OutboxWorker {
    pub fn new(outbox: Arc<Outbox>, transport: Arc<dyn NotificationTransport>) -> Self {
        let interval = Duration::from_secs(outbox.config.delivery_interval_secs.max(1));
        Self {
            outbox,
            transport,
            interval,
        }
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(interval_secs = self.interval.as_secs(), "outbox worker started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match self.outbox.process_queue(self.transport.as_ref()).await {
                        Ok(r) if r.sent + r.retried + r.failed > 0 => {
                            tracing::info!(sent = r.sent, retried = r.retried, failed = r.failed, "outbox sweep");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "outbox sweep failed"),
                    }
                }
            }
        }
        tracing::info!("outbox worker stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
