//! Per-service three-state circuit breakers: Closed → Open → Half-Open.
//!
//! State transitions:
//! - `Closed` → `Open`:      failure count reaches `failure_threshold`
//! - `Open` → `Half-Open`:   `cooldown_ms` has elapsed; exactly one probe is let through
//! - `Half-Open` → `Closed`: probe succeeds
//! - `Half-Open` → `Open`:   probe fails (cooldown restarts)
//!
//! The manager never calls upstreams itself. Callers ask
//! [`CircuitBreakerManager::try_acquire`] before every call and settle the
//! returned [`CallPermit`] with the outcome afterwards. A permit dropped
//! unsettled (its caller was cancelled mid-call) hands a half-open probe
//! slot back, so an abandoned probe never wedges the breaker.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::now_millis;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// All calls rejected until the cooldown elapses.
    Open,
    /// One probe call allowed to test the service.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Configuration shared by every breaker a manager creates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening.
    pub failure_threshold: u32,
    /// How long to stay open before letting a probe through.
    pub cooldown_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_ms: 30_000,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Point-in-time view of one service's breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerState {
    pub service: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_millis: Option<i64>,
    pub next_attempt_millis: Option<i64>,
}

struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure_millis: Option<i64>,
    /// Monotonic deadline that gates the open → half-open transition.
    next_attempt_at: Option<Instant>,
    next_attempt_millis: Option<i64>,
    probe_in_flight: bool,
    /// Bumped each time a probe is handed out; stale permits compare against it.
    probe_epoch: u64,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_millis: None,
            next_attempt_at: None,
            next_attempt_millis: None,
            probe_in_flight: false,
            probe_epoch: 0,
        }
    }

    fn grant_probe(&mut self) -> u64 {
        self.probe_in_flight = true;
        self.probe_epoch = self.probe_epoch.wrapping_add(1);
        self.probe_epoch
    }

    fn open(&mut self, cooldown: Duration) {
        self.state = CircuitState::Open;
        self.next_attempt_at = Some(Instant::now() + cooldown);
        self.next_attempt_millis = Some(now_millis() + cooldown.as_millis() as i64);
        self.probe_in_flight = false;
    }

    fn snapshot(&self, service: &str) -> CircuitBreakerState {
        CircuitBreakerState {
            service: service.to_string(),
            state: self.state,
            failure_count: self.failure_count,
            last_failure_millis: self.last_failure_millis,
            next_attempt_millis: self.next_attempt_millis,
        }
    }
}

/// Owns one breaker per named service.
///
/// All transitions for a service happen under a single lock, so concurrent
/// failures are all counted and a half-open breaker hands out one probe.
/// Instances are independent: create one per application (or per test).
pub struct CircuitBreakerManager {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, BreakerInner>>,
}

impl CircuitBreakerManager {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Ask permission to call `service`.
    ///
    /// Returns `None` while the breaker is open, and while a half-open
    /// probe is already outstanding. Once the cooldown has elapsed the
    /// first caller gets the probe.
    pub fn try_acquire(&self, service: &str) -> Option<CallPermit<'_>> {
        let mut breakers = self.breakers.lock();
        let inner = breakers
            .entry(service.to_string())
            .or_insert_with(BreakerInner::new);

        let probe = match inner.state {
            CircuitState::Closed => None,
            CircuitState::Open => {
                let due = inner
                    .next_attempt_at
                    .map_or(true, |at| Instant::now() >= at);
                if !due {
                    return None;
                }
                inner.state = CircuitState::HalfOpen;
                tracing::info!(service, "Circuit breaker → half-open");
                Some(inner.grant_probe())
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    return None;
                }
                Some(inner.grant_probe())
            }
        };

        Some(CallPermit {
            manager: self,
            service: service.to_string(),
            probe,
            settled: false,
        })
    }

    /// Record a successful call. Closes the breaker from any state.
    pub fn record_success(&self, service: &str) {
        let mut breakers = self.breakers.lock();
        let inner = breakers
            .entry(service.to_string())
            .or_insert_with(BreakerInner::new);

        if inner.state != CircuitState::Closed {
            tracing::info!(service, "Circuit breaker → closed");
        }
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.next_attempt_at = None;
        inner.next_attempt_millis = None;
        inner.probe_in_flight = false;
    }

    /// Record a failed call.
    pub fn record_failure(&self, service: &str) {
        let mut breakers = self.breakers.lock();
        let inner = breakers
            .entry(service.to_string())
            .or_insert_with(BreakerInner::new);

        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure_millis = Some(now_millis());

        match inner.state {
            CircuitState::Closed => {
                if inner.failure_count >= self.config.failure_threshold {
                    inner.open(self.config.cooldown());
                    tracing::warn!(
                        service,
                        failures = inner.failure_count,
                        "Circuit breaker → open"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.open(self.config.cooldown());
                tracing::warn!(service, "Circuit breaker probe failed → open");
            }
            // A call admitted before the breaker opened finished late.
            CircuitState::Open => {}
        }
    }

    /// Free the half-open probe slot handed out as `epoch`, if it is still
    /// the outstanding one. Counters and state are left alone.
    fn release_probe(&self, service: &str, epoch: u64) {
        if let Some(inner) = self.breakers.lock().get_mut(service) {
            if inner.probe_in_flight && inner.probe_epoch == epoch {
                inner.probe_in_flight = false;
                tracing::debug!(service, "Circuit breaker probe released");
            }
        }
    }

    /// Current state of `service`'s breaker (closed if never used).
    pub fn state(&self, service: &str) -> CircuitState {
        self.breakers
            .lock()
            .get(service)
            .map_or(CircuitState::Closed, |b| b.state)
    }

    pub fn snapshot(&self, service: &str) -> CircuitBreakerState {
        self.breakers
            .lock()
            .get(service)
            .map_or_else(|| BreakerInner::new().snapshot(service), |b| b.snapshot(service))
    }

    /// Snapshots of every breaker seen so far, sorted by service name.
    pub fn snapshot_all(&self) -> Vec<CircuitBreakerState> {
        let mut all: Vec<_> = self
            .breakers
            .lock()
            .iter()
            .map(|(name, b)| b.snapshot(name))
            .collect();
        all.sort_by(|a, b| a.service.cmp(&b.service));
        all
    }
}

/// Permission for one upstream call, handed out by
/// [`CircuitBreakerManager::try_acquire`].
///
/// Settle it with [`succeed`](Self::succeed), [`fail`](Self::fail) or
/// [`release`](Self::release). Dropping it unsettled behaves like `release`.
#[must_use = "settle the permit with the call's outcome"]
pub struct CallPermit<'a> {
    manager: &'a CircuitBreakerManager,
    service: String,
    /// Epoch of the half-open probe this permit carries, if any.
    probe: Option<u64>,
    settled: bool,
}

impl CallPermit<'_> {
    /// The call succeeded. Closes the breaker.
    pub fn succeed(mut self) {
        self.settled = true;
        self.manager.record_success(&self.service);
    }

    /// The call failed in a way that counts against the service.
    pub fn fail(mut self) {
        self.settled = true;
        self.manager.record_failure(&self.service);
    }

    /// The call ended without saying anything about the service's health
    /// (e.g. an unsupported method). Frees a half-open probe slot.
    pub fn release(self) {}
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some(epoch) = self.probe {
            self.manager.release_probe(&self.service, epoch);
        }
    }
}

impl std::fmt::Debug for CallPermit<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallPermit")
            .field("service", &self.service)
            .field("probe", &self.probe.is_some())
            .finish()
    }
}

impl Default for CircuitBreakerManager {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl std::fmt::Debug for CircuitBreakerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerManager")
            .field("config", &self.config)
            .field("breakers", &self.snapshot_all())
            .finish()
    }
}
