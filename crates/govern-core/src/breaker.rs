//! Circuit breakers around calls to unreliable external providers.
//!
//! State machine per resource name:
//!
//! - **CLOSED**: calls pass through. System failures are counted; reaching
//!   `failure_threshold` opens the breaker. Any success resets the count.
//! - **OPEN**: calls are rejected with [`GovernError::CircuitOpen`] without
//!   running the operation, until `next_attempt_at` has passed.
//! - **HALF_OPEN**: one probe call at a time is let through. Successes count
//!   toward `success_threshold`, which closes the breaker; a single failure
//!   reopens it.
//!
//! Only failures the [`FailureClassifier`] accepts are counted. Auth, quota
//! and validation errors are returned to the caller untouched.
//!
//! State lives in process memory. A multi-node deployment needs a shared
//! registry behind the same interface.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::config::{bounded_millis, BreakerConfig, BreakerSettings};
use crate::error::{ExternalErrorKind, GovernError, Result};

// ---------------------------------------------------------------------------
// BreakerState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            BreakerState::Closed => "CLOSED",
            BreakerState::Open => "OPEN",
            BreakerState::HalfOpen => "HALF_OPEN",
        })
    }
}

// ---------------------------------------------------------------------------
// FailureClassifier
// ---------------------------------------------------------------------------

/// Decides whether an error means the resource itself is unhealthy.
pub trait FailureClassifier: Send + Sync {
    fn counts_as_failure(&self, err: &GovernError) -> bool;
}

impl<F> FailureClassifier for F
where
    F: Fn(&GovernError) -> bool + Send + Sync,
{
    fn counts_as_failure(&self, err: &GovernError) -> bool {
        self(err)
    }
}

/// Counts timeouts, transport errors, 5xx and rate limiting.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemFailureClassifier;

impl FailureClassifier for SystemFailureClassifier {
    fn counts_as_failure(&self, err: &GovernError) -> bool {
        matches!(err, GovernError::External { kind, .. } if kind.is_system())
    }
}

// ---------------------------------------------------------------------------
// CircuitBreaker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct CircuitBreaker {
    settings: BreakerSettings,
    state: BreakerState,
    failure_count: u32,
    success_count: u32,
    next_attempt_at: Option<DateTime<Utc>>,
    probe_in_flight: bool,
}

/// Admission result: `probe` is true when the call is the HALF_OPEN probe.
struct Admitted {
    probe: bool,
}

impl CircuitBreaker {
    fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            state: BreakerState::Closed,
            failure_count: 0,
            success_count: 0,
            next_attempt_at: None,
            probe_in_flight: false,
        }
    }

    fn open(&mut self, now: DateTime<Utc>) {
        self.state = BreakerState::Open;
        self.success_count = 0;
        self.probe_in_flight = false;
        self.next_attempt_at = Some(now + bounded_millis(self.settings.reset_timeout_ms));
    }

    fn close(&mut self) {
        self.state = BreakerState::Closed;
        self.failure_count = 0;
        self.success_count = 0;
        self.next_attempt_at = None;
        self.probe_in_flight = false;
    }

    /// Err carries the milliseconds the caller should wait.
    fn admit(&mut self, now: DateTime<Utc>) -> std::result::Result<Admitted, u64> {
        match self.state {
            BreakerState::Closed => Ok(Admitted { probe: false }),
            BreakerState::Open => {
                let next = self.next_attempt_at.unwrap_or(now);
                if now > next {
                    self.state = BreakerState::HalfOpen;
                    self.success_count = 0;
                    self.probe_in_flight = true;
                    Ok(Admitted { probe: true })
                } else {
                    let remaining = u64::try_from((next - now).num_milliseconds()).unwrap_or(0).max(1);
                    Err(remaining)
                }
            }
            BreakerState::HalfOpen if self.probe_in_flight => {
                Err(self.settings.reset_timeout_ms.min(1_000))
            }
            BreakerState::HalfOpen => {
                self.probe_in_flight = true;
                Ok(Admitted { probe: true })
            }
        }
    }

    fn on_success(&mut self) {
        match self.state {
            BreakerState::Closed => self.failure_count = 0,
            BreakerState::HalfOpen => {
                self.probe_in_flight = false;
                self.success_count += 1;
                if self.success_count >= self.settings.success_threshold {
                    self.close();
                }
            }
            // A call admitted before the breaker opened; its outcome is stale.
            BreakerState::Open => {}
        }
    }

    fn on_failure(&mut self, now: DateTime<Utc>) {
        match self.state {
            BreakerState::Closed => {
                self.failure_count += 1;
                if self.failure_count >= self.settings.failure_threshold {
                    self.open(now);
                }
            }
            BreakerState::HalfOpen => {
                self.failure_count += 1;
                self.open(now);
            }
            BreakerState::Open => {}
        }
    }

    fn release_probe(&mut self) {
        self.probe_in_flight = false;
    }
}

// ---------------------------------------------------------------------------
// BreakerSnapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: BreakerState,
    pub failure_count: u32,
    pub success_count: u32,
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
    pub success_threshold: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl BreakerSnapshot {
    fn of(name: &str, b: &CircuitBreaker) -> Self {
        Self {
            name: name.to_string(),
            state: b.state,
            failure_count: b.failure_count,
            success_count: b.success_count,
            failure_threshold: b.settings.failure_threshold,
            reset_timeout_ms: b.settings.reset_timeout_ms,
            success_threshold: b.settings.success_threshold,
            next_attempt_at: b.next_attempt_at,
        }
    }
}

// ---------------------------------------------------------------------------
// BreakerRegistry
// ---------------------------------------------------------------------------

/// Owns one breaker per resource name, created lazily on first use.
pub struct BreakerRegistry {
    breakers: DashMap<String, CircuitBreaker>,
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    classifier: Arc<dyn FailureClassifier>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_classifier(config, clock, Arc::new(SystemFailureClassifier))
    }

    pub fn with_classifier(
        config: BreakerConfig,
        clock: Arc<dyn Clock>,
        classifier: Arc<dyn FailureClassifier>,
    ) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
            clock,
            classifier,
        }
    }

    /// Timeout from config, for callers without their own.
    pub fn default_timeout(&self) -> Duration {
        self.config.call_timeout()
    }

    fn admit(&self, name: &str) -> Result<Admitted> {
        let now = self.clock.now();
        let mut entry = self
            .breakers
            .entry(name.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.config.settings_for(name)));
        let before = entry.state;
        match entry.admit(now) {
            Ok(admitted) => {
                if before != entry.state {
                    tracing::info!(resource = name, "circuit breaker: OPEN → HALF_OPEN (probe allowed)");
                }
                Ok(admitted)
            }
            Err(retry_after_ms) => Err(GovernError::CircuitOpen {
                resource: name.to_string(),
                retry_after_ms,
            }),
        }
    }

    fn record(&self, name: &str, outcome: Outcome) {
        let now = self.clock.now();
        let Some(mut entry) = self.breakers.get_mut(name) else {
            return;
        };
        let before = entry.state;
        match outcome {
            Outcome::Success => entry.on_success(),
            Outcome::Failure => entry.on_failure(now),
            Outcome::Ignored => entry.release_probe(),
        }
        let after = entry.state;
        if before != after {
            match after {
                BreakerState::Open => tracing::warn!(
                    resource = name,
                    failures = entry.failure_count,
                    from = %before,
                    "circuit breaker opened"
                ),
                _ => tracing::info!(resource = name, from = %before, to = %after, "circuit breaker state change"),
            }
        }
    }

    /// Run `op` under the breaker for `name`, bounded by `timeout`.
    ///
    /// A timeout counts as a system failure. `op` is never polled while the
    /// breaker rejects calls.
    pub async fn execute<T, F>(&self, name: &str, timeout: Duration, op: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let admitted = self.admit(name)?;
        let mut guard = ProbeGuard {
            registry: self,
            name,
            armed: admitted.probe,
        };

        let result = match tokio::time::timeout(timeout, op).await {
            Ok(r) => r,
            Err(_) => Err(GovernError::external(
                ExternalErrorKind::Timeout,
                format!("{name} did not respond within {}ms", timeout.as_millis()),
            )),
        };
        guard.armed = false;

        match &result {
            Ok(_) => self.record(name, Outcome::Success),
            Err(e) if self.classifier.counts_as_failure(e) => {
                tracing::debug!(resource = name, error = %e, "breaker failure recorded");
                self.record(name, Outcome::Failure)
            }
            Err(_) => self.record(name, Outcome::Ignored),
        }
        result
    }

    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let mut out: Vec<BreakerSnapshot> = self
            .breakers
            .iter()
            .map(|e| BreakerSnapshot::of(e.key(), e.value()))
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn state_of(&self, name: &str) -> Option<BreakerSnapshot> {
        self.breakers.get(name).map(|b| BreakerSnapshot::of(name, &b))
    }

    /// Close a breaker by hand. Returns false if it was never used.
    pub fn reset(&self, name: &str) -> bool {
        match self.breakers.get_mut(name) {
            Some(mut b) => {
                b.close();
                tracing::info!(resource = name, "circuit breaker reset manually");
                true
            }
            None => false,
        }
    }
}

enum Outcome {
    Success,
    Failure,
    Ignored,
}

/// Frees the HALF_OPEN probe slot if the calling future is dropped mid-call.
struct ProbeGuard<'a> {
    registry: &'a BreakerRegistry,
    name: &'a str,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Some(mut b) = self.registry.breakers.get_mut(self.name) {
                b.release_probe();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn registry(clock: Arc<ManualClock>) -> BreakerRegistry {
        BreakerRegistry::new(BreakerConfig::default(), clock)
    }

    fn server_error() -> GovernError {
        GovernError::external(ExternalErrorKind::Server, "503")
    }

    async fn fail(reg: &BreakerRegistry, calls: &AtomicU32) -> Result<()> {
        reg.execute("llm", Duration::from_secs(1), async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(server_error())
        })
        .await
    }

    async fn succeed(reg: &BreakerRegistry, calls: &AtomicU32) -> Result<()> {
        reg.execute("llm", Duration::from_secs(1), async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
    }

    #[tokio::test]
    async fn opens_after_threshold_and_probes_after_reset_timeout() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let reg = registry(clock.clone());
        let calls = AtomicU32::new(0);

        for _ in 0..5 {
            assert!(fail(&reg, &calls).await.is_err());
        }
        assert_eq!(reg.state_of("llm").unwrap().state, BreakerState::Open);

        // 6th call is rejected without running the operation.
        let err = fail(&reg, &calls).await.unwrap_err();
        assert!(matches!(err, GovernError::CircuitOpen { retry_after_ms, .. } if retry_after_ms > 0));
        assert_eq!(calls.load(Ordering::SeqCst), 5);

        clock.advance(chrono::Duration::milliseconds(30_001));
        assert!(fail(&reg, &calls).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert_eq!(reg.state_of("llm").unwrap().state, BreakerState::Open);
    }

    #[tokio::test]
    async fn oversized_reset_timeout_is_capped() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let mut config = BreakerConfig::default();
        config.defaults.reset_timeout_ms = u64::MAX;
        let reg = BreakerRegistry::new(config, clock.clone());
        let calls = AtomicU32::new(0);
        for _ in 0..5 {
            let _ = fail(&reg, &calls).await;
        }
        let snap = reg.state_of("llm").unwrap();
        assert_eq!(snap.state, BreakerState::Open);

        let err = fail(&reg, &calls).await.unwrap_err();
        let cap_ms = crate::config::MAX_DELAY_SECS * 1_000;
        assert!(matches!(err, GovernError::CircuitOpen { retry_after_ms, .. } if retry_after_ms <= cap_ms));

        clock.advance(chrono::Duration::seconds(crate::config::MAX_DELAY_SECS as i64 + 1));
        succeed(&reg, &calls).await.unwrap();
        assert_eq!(reg.state_of("llm").unwrap().state, BreakerState::HalfOpen);
    }

    #[tokio::test]
    async fn half_open_closes_after_success_threshold() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let reg = registry(clock.clone());
        let calls = AtomicU32::new(0);
        for _ in 0..5 {
            let _ = fail(&reg, &calls).await;
        }
        clock.advance(chrono::Duration::seconds(31));

        succeed(&reg, &calls).await.unwrap();
        assert_eq!(reg.state_of("llm").unwrap().state, BreakerState::HalfOpen);
        succeed(&reg, &calls).await.unwrap();
        let snap = reg.state_of("llm").unwrap();
        assert_eq!(snap.state, BreakerState::Closed);
        assert_eq!(snap.failure_count, 0);
    }

    #[tokio::test]
    async fn success_in_closed_resets_failure_count() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let reg = registry(clock);
        let calls = AtomicU32::new(0);
        for _ in 0..4 {
            let _ = fail(&reg, &calls).await;
        }
        succeed(&reg, &calls).await.unwrap();
        assert_eq!(reg.state_of("llm").unwrap().failure_count, 0);
        for _ in 0..4 {
            let _ = fail(&reg, &calls).await;
        }
        assert_eq!(reg.state_of("llm").unwrap().state, BreakerState::Closed);
    }

    #[tokio::test]
    async fn caller_errors_do_not_trip() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let reg = registry(clock);
        for kind in [
            ExternalErrorKind::Auth,
            ExternalErrorKind::Quota,
            ExternalErrorKind::Validation,
        ] {
            for _ in 0..10 {
                let err = reg
                    .execute("connector", Duration::from_secs(1), async {
                        Err::<(), _>(GovernError::external(kind, "refused"))
                    })
                    .await
                    .unwrap_err();
                assert!(matches!(err, GovernError::External { .. }));
            }
        }
        let snap = reg.state_of("connector").unwrap();
        assert_eq!(snap.state, BreakerState::Closed);
        assert_eq!(snap.failure_count, 0);
    }

    #[tokio::test]
    async fn timeout_counts_as_failure() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let reg = registry(clock);
        let err = reg
            .execute("slow", Duration::from_millis(10), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GovernError::External {
                kind: ExternalErrorKind::Timeout,
                ..
            }
        ));
        assert_eq!(reg.state_of("slow").unwrap().failure_count, 1);
    }

    #[tokio::test]
    async fn custom_classifier_is_used() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let mut config = BreakerConfig::default();
        config.defaults.failure_threshold = 1;
        let reg = BreakerRegistry::with_classifier(
            config,
            clock,
            Arc::new(|e: &GovernError| matches!(e, GovernError::InvalidInput(_))),
        );
        let _ = reg
            .execute("x", Duration::from_secs(1), async {
                Err::<(), _>(GovernError::InvalidInput("bad".into()))
            })
            .await;
        assert_eq!(reg.state_of("x").unwrap().state, BreakerState::Open);
    }

    #[tokio::test]
    async fn only_one_probe_in_flight() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let reg = registry(clock.clone());
        let calls = AtomicU32::new(0);
        for _ in 0..5 {
            let _ = fail(&reg, &calls).await;
        }
        clock.advance(chrono::Duration::seconds(31));

        let first = reg.admit("llm").unwrap();
        assert!(first.probe);
        assert!(matches!(
            reg.admit("llm"),
            Err(GovernError::CircuitOpen { .. })
        ));
        reg.record("llm", Outcome::Ignored);
        assert!(reg.admit("llm").is_ok());
    }

    #[tokio::test]
    async fn reset_and_overrides() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let mut config = BreakerConfig::default();
        config.overrides.insert(
            "flaky".into(),
            crate::config::BreakerOverride {
                failure_threshold: Some(2),
                ..Default::default()
            },
        );
        let reg = BreakerRegistry::new(config, clock);
        for _ in 0..2 {
            let _ = reg
                .execute("flaky", Duration::from_secs(1), async {
                    Err::<(), _>(server_error())
                })
                .await;
        }
        assert_eq!(reg.state_of("flaky").unwrap().state, BreakerState::Open);
        assert!(reg.reset("flaky"));
        assert_eq!(reg.state_of("flaky").unwrap().state, BreakerState::Closed);
        assert!(!reg.reset("never-used"));
        assert_eq!(reg.snapshot().len(), 1);
    }
}
