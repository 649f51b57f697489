//! `HealthMonitor` — periodic liveness probes for every upstream source.
//!
//! Probes run on their own timer, independent of the readiness path and
//! of the circuit breakers. The resulting table is best-effort: the
//! aggregator only reads it to explain an unavailable response.

use std::collections::BTreeMap;
use std::sync::Arc;

use chainpulse_core::{now_millis, ChainSource, HealthState, ServiceHealth, SourceError};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::HealthMonitorConfig;

/// Last probe result per service. Written only by [`HealthMonitor`].
#[derive(Debug, Default)]
pub struct HealthTable {
    entries: RwLock<BTreeMap<String, ServiceHealth>>,
}

impl HealthTable {
    pub fn get(&self, service: &str) -> Option<ServiceHealth> {
        self.entries.read().get(service).cloned()
    }

    /// Every entry, sorted by service name.
    pub fn snapshot(&self) -> Vec<ServiceHealth> {
        self.entries.read().values().cloned().collect()
    }

    fn record(&self, health: ServiceHealth) {
        self.entries.write().insert(health.service.clone(), health);
    }
}

struct Running {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct HealthMonitor {
    config: HealthMonitorConfig,
    sources: Vec<Arc<dyn ChainSource>>,
    table: Arc<HealthTable>,
    running: Mutex<Option<Running>>,
}

impl HealthMonitor {
    pub fn new(config: HealthMonitorConfig, sources: Vec<Arc<dyn ChainSource>>) -> Self {
        Self {
            config,
            sources,
            table: Arc::new(HealthTable::default()),
            running: Mutex::new(None),
        }
    }

    pub fn table(&self) -> Arc<HealthTable> {
        Arc::clone(&self.table)
    }

    /// Probe every source concurrently and update the table.
    pub async fn probe_all(&self) {
        let probes = self
            .sources
            .iter()
            .map(|source| probe(source.as_ref(), &self.config));
        for health in join_all(probes).await {
            if health.status != HealthState::Healthy {
                tracing::debug!(
                    service = %health.service,
                    status = %health.status,
                    response_time_ms = health.response_time_ms,
                    "health probe"
                );
            }
            self.table.record(health);
        }
    }

    /// Start the probe timer (first probe fires immediately). Returns
    /// `false` if already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut running = self.running.lock();
        if running.is_some() {
            return false;
        }

        let token = CancellationToken::new();
        let monitor = Arc::clone(self);
        let child = token.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(monitor.config.interval());
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = child.cancelled() => break,
                    _ = interval.tick() => monitor.probe_all().await,
                }
            }
        });

        tracing::info!(
            services = self.sources.len(),
            interval_ms = self.config.interval_ms,
            "health monitor started"
        );
        *running = Some(Running { token, handle });
        true
    }

    /// Stop the probe timer. Safe to call repeatedly. The timer task holds
    /// a clone of the monitor, so call this before dropping it.
    pub fn stop(&self) -> bool {
        match self.running.lock().take() {
            Some(Running { token, handle }) => {
                token.cancel();
                drop(handle);
                tracing::info!("health monitor stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("sources", &self.sources.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("running", &self.is_running())
            .finish()
    }
}

async fn probe(source: &dyn ChainSource, config: &HealthMonitorConfig) -> ServiceHealth {
    let started = Instant::now();
    let timeout = config.probe_timeout();
    let result = match tokio::time::timeout(timeout, source.tip_height()).await {
        Ok(result) => result,
        Err(_) => Err(SourceError::Timeout {
            ms: timeout.as_millis() as u64,
        }),
    };
    let response_time_ms = started.elapsed().as_millis() as u64;

    let (status, error) = match result {
        Ok(_) if response_time_ms > config.degraded_threshold_ms => (HealthState::Degraded, None),
        Ok(_) => (HealthState::Healthy, None),
        Err(e) => (HealthState::Unavailable, Some(e.to_string())),
    };

    ServiceHealth {
        service: source.name().to_string(),
        status,
        response_time_ms,
        last_check_millis: now_millis(),
        error,
    }
}
