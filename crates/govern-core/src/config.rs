use crate::error::{GovernError, Result};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Longest delay any timer, lease or backoff may be configured with.
pub const MAX_DELAY_SECS: u64 = 30 * 24 * 60 * 60;

/// Longest SLA a reviewer assignment may carry (one year).
pub const MAX_SLA_HOURS: u32 = 8_760;

/// `secs` as a chrono duration, capped at [`MAX_DELAY_SECS`].
pub fn bounded_secs(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(i64::try_from(secs.min(MAX_DELAY_SECS)).unwrap_or(i64::MAX))
}

/// `ms` as a chrono duration, capped at [`MAX_DELAY_SECS`].
pub fn bounded_millis(ms: u64) -> chrono::Duration {
    let cap = MAX_DELAY_SECS * 1_000;
    chrono::Duration::milliseconds(i64::try_from(ms.min(cap)).unwrap_or(i64::MAX))
}

/// `min(base · 2^(attempts−1), max)`.
fn exponential_backoff(base_secs: u64, max_secs: u64, attempts: u32) -> chrono::Duration {
    let exp = attempts.saturating_sub(1).min(20);
    bounded_secs(base_secs.saturating_mul(1u64 << exp).min(max_secs))
}

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// BreakerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout_ms() -> u64 {
    30_000
}

fn default_success_threshold() -> u32 {
    2
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
            success_threshold: default_success_threshold(),
        }
    }
}

/// Per-resource override; unset fields fall back to the defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BreakerOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_threshold: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_threshold: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    #[serde(flatten)]
    pub defaults: BreakerSettings,
    /// Timeout applied to each protected call.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub overrides: HashMap<String, BreakerOverride>,
}

fn default_call_timeout_ms() -> u64 {
    10_000
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            defaults: BreakerSettings::default(),
            call_timeout_ms: default_call_timeout_ms(),
            overrides: HashMap::new(),
        }
    }
}

impl BreakerConfig {
    pub fn settings_for(&self, resource: &str) -> BreakerSettings {
        let base = &self.defaults;
        match self.overrides.get(resource) {
            Some(o) => BreakerSettings {
                failure_threshold: o.failure_threshold.unwrap_or(base.failure_threshold),
                reset_timeout_ms: o.reset_timeout_ms.unwrap_or(base.reset_timeout_ms),
                success_threshold: o.success_threshold.unwrap_or(base.success_threshold),
            },
            None => base.clone(),
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// JobsConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// RUNNING jobs older than this at startup are considered orphaned.
    #[serde(default = "default_stale_running")]
    pub stale_running_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base() -> u64 {
    30
}

fn default_backoff_max() -> u64 {
    900
}

fn default_poll_interval() -> u64 {
    1_000
}

fn default_stale_running() -> u64 {
    600
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_secs: default_backoff_base(),
            backoff_max_secs: default_backoff_max(),
            poll_interval_ms: default_poll_interval(),
            stale_running_secs: default_stale_running(),
        }
    }
}

impl JobsConfig {
    /// Delay before the next attempt after `attempts` failures:
    /// `base · 2^(attempts−1)`, capped at `backoff_max_secs`.
    pub fn backoff_for(&self, attempts: u32) -> chrono::Duration {
        exponential_backoff(self.backoff_base_secs, self.backoff_max_secs, attempts)
    }
}

// ---------------------------------------------------------------------------
// WorkqueueConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkqueueConfig {
    #[serde(default = "default_sla_hours")]
    pub default_sla_hours: u32,
    #[serde(default = "default_sla_check_interval")]
    pub sla_check_interval_secs: u64,
}

fn default_sla_hours() -> u32 {
    48
}

fn default_sla_check_interval() -> u64 {
    600
}

impl Default for WorkqueueConfig {
    fn default() -> Self {
        Self {
            default_sla_hours: default_sla_hours(),
            sla_check_interval_secs: default_sla_check_interval(),
        }
    }
}

// ---------------------------------------------------------------------------
// OutboxConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxConfig {
    #[serde(default = "default_outbox_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_delivery_interval")]
    pub delivery_interval_secs: u64,
    #[serde(default = "default_outbox_backoff_base")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_outbox_backoff_max")]
    pub backoff_max_secs: u64,
}

fn default_outbox_attempts() -> u32 {
    3
}

fn default_batch_size() -> usize {
    50
}

fn default_delivery_interval() -> u64 {
    30
}

fn default_outbox_backoff_base() -> u64 {
    60
}

fn default_outbox_backoff_max() -> u64 {
    1_800
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_outbox_attempts(),
            batch_size: default_batch_size(),
            delivery_interval_secs: default_delivery_interval(),
            backoff_base_secs: default_outbox_backoff_base(),
            backoff_max_secs: default_outbox_backoff_max(),
        }
    }
}

impl OutboxConfig {
    /// Delay before redelivering a message that has failed `attempts` times.
    pub fn backoff_for(&self, attempts: u32) -> chrono::Duration {
        exponential_backoff(self.backoff_base_secs, self.backoff_max_secs, attempts)
    }

    /// How long a claimed message stays out of the due range while it is
    /// being delivered.
    pub fn lease(&self) -> chrono::Duration {
        bounded_secs(self.delivery_interval_secs.max(1).saturating_mul(10))
    }
}

// ---------------------------------------------------------------------------
// Connector / notification endpoints (used by the CLI worker)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectorConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

// ---------------------------------------------------------------------------
// GovernConfig (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub workqueue: WorkqueueConfig,
    #[serde(default)]
    pub outbox: OutboxConfig,
    #[serde(default)]
    pub connector: ConnectorConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

fn default_version() -> u32 {
    1
}

impl Default for GovernConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            breaker: BreakerConfig::default(),
            jobs: JobsConfig::default(),
            workqueue: WorkqueueConfig::default(),
            outbox: OutboxConfig::default(),
            connector: ConnectorConfig::default(),
            notifications: NotificationsConfig::default(),
        }
    }
}

impl GovernConfig {
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(GovernError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: GovernConfig = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut error = |message: String| {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message,
            })
        };

        let mut breakers = vec![("breaker".to_string(), self.breaker.defaults.clone())];
        for name in self.breaker.overrides.keys() {
            breakers.push((
                format!("breaker.overrides.{name}"),
                self.breaker.settings_for(name),
            ));
        }
        for (label, s) in &breakers {
            if s.failure_threshold == 0 {
                error(format!("{label}.failure_threshold must be at least 1"));
            }
            if s.success_threshold == 0 {
                error(format!("{label}.success_threshold must be at least 1"));
            }
            if s.reset_timeout_ms > MAX_DELAY_SECS * 1_000 {
                error(format!(
                    "{label}.reset_timeout_ms must be at most {}",
                    MAX_DELAY_SECS * 1_000
                ));
            }
        }
        let delays = [
            ("breaker.call_timeout_ms", self.breaker.call_timeout_ms / 1_000),
            ("jobs.backoff_base_secs", self.jobs.backoff_base_secs),
            ("jobs.backoff_max_secs", self.jobs.backoff_max_secs),
            ("jobs.poll_interval_ms", self.jobs.poll_interval_ms / 1_000),
            ("jobs.stale_running_secs", self.jobs.stale_running_secs),
            ("workqueue.sla_check_interval_secs", self.workqueue.sla_check_interval_secs),
            ("outbox.delivery_interval_secs", self.outbox.delivery_interval_secs),
            ("outbox.backoff_base_secs", self.outbox.backoff_base_secs),
            ("outbox.backoff_max_secs", self.outbox.backoff_max_secs),
        ];
        for (label, secs) in delays {
            if secs > MAX_DELAY_SECS {
                error(format!("{label} exceeds the {MAX_DELAY_SECS}s limit"));
            }
        }
        if self.breaker.call_timeout_ms == 0 {
            error("breaker.call_timeout_ms must be greater than 0".to_string());
        }
        if self.jobs.max_attempts == 0 {
            error("jobs.max_attempts must be at least 1".to_string());
        }
        if self.workqueue.default_sla_hours == 0 {
            error("workqueue.default_sla_hours must be at least 1".to_string());
        }
        if self.workqueue.default_sla_hours > MAX_SLA_HOURS {
            error(format!("workqueue.default_sla_hours must be at most {MAX_SLA_HOURS}"));
        }
        if self.outbox.max_attempts == 0 {
            error("outbox.max_attempts must be at least 1".to_string());
        }
        if self.outbox.batch_size == 0 {
            error("outbox.batch_size must be at least 1".to_string());
        }

        if self.jobs.max_attempts > 10 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "jobs.max_attempts={} (>10 is unusual)",
                    self.jobs.max_attempts
                ),
            });
        }
        if self.jobs.backoff_base_secs > self.jobs.backoff_max_secs {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "jobs.backoff_base_secs ({}) exceeds backoff_max_secs ({}); every retry waits the maximum",
                    self.jobs.backoff_base_secs, self.jobs.backoff_max_secs
                ),
            });
        }
        if self.outbox.max_attempts != 3 && self.outbox.max_attempts != 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "outbox.max_attempts={} differs from the standard cap of 3",
                    self.outbox.max_attempts
                ),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
