//! `BootstrapService` — on-demand readiness aggregation over two sources.
//!
//! ```text
//! readiness()
//!   ├── cache hit  → cached BootstrapSnapshot (unchanged)
//!   └── cache miss → join!(primary, secondary)
//!                      each: breaker gate → timeout(height) ‖ timeout(mempool) → settle permit on height
//!                    → compose → cache (only if at least one source reported)
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chainpulse_core::cache::keys;
use chainpulse_core::{ChainSource, CircuitBreakerManager, SharedCache, SourceError};

use crate::config::BootstrapConfig;
use crate::error::BootstrapError;
use crate::health::HealthTable;
use crate::snapshot::{BootstrapSnapshot, ReadinessResponse, SourceReport};

pub struct BootstrapService {
    config: BootstrapConfig,
    primary: Arc<dyn ChainSource>,
    secondary: Arc<dyn ChainSource>,
    cache: SharedCache,
    breakers: Arc<CircuitBreakerManager>,
    health: Arc<HealthTable>,
}

impl BootstrapService {
    pub fn new(
        config: BootstrapConfig,
        primary: Arc<dyn ChainSource>,
        secondary: Arc<dyn ChainSource>,
        cache: SharedCache,
        breakers: Arc<CircuitBreakerManager>,
        health: Arc<HealthTable>,
    ) -> Self {
        Self {
            config,
            primary,
            secondary,
            cache,
            breakers,
            health,
        }
    }

    /// Current readiness snapshot, from cache when fresh.
    ///
    /// Fails with [`BootstrapError::Unavailable`] when neither source has
    /// usable data; that outcome is never cached.
    pub async fn readiness(&self) -> Result<BootstrapSnapshot, BootstrapError> {
        if let Some(snapshot) = self.cache.get::<BootstrapSnapshot>(keys::BOOTSTRAP_SNAPSHOT).await {
            tracing::trace!("readiness served from cache");
            return Ok(snapshot);
        }

        let (primary, secondary) = tokio::join!(
            self.collect(self.primary.as_ref()),
            self.collect(self.secondary.as_ref()),
        );

        let Some(snapshot) = BootstrapSnapshot::compose(primary, secondary) else {
            tracing::warn!(
                primary = self.primary.name(),
                secondary = self.secondary.name(),
                "no upstream source available"
            );
            return Err(BootstrapError::Unavailable {
                health: self.health.snapshot(),
            });
        };

        if let Err(e) = self
            .cache
            .set(keys::BOOTSTRAP_SNAPSHOT, &snapshot, self.config.snapshot_ttl())
            .await
        {
            tracing::warn!(error = %e, "failed to cache readiness snapshot");
        }
        tracing::debug!(
            readiness = %snapshot.readiness,
            height = ?snapshot.height(),
            "readiness computed"
        );
        Ok(snapshot)
    }

    /// [`readiness`](Self::readiness) wrapped in the response envelope.
    pub async fn respond(&self) -> ReadinessResponse {
        match self.readiness().await {
            Ok(snapshot) => ReadinessResponse::ready(snapshot, self.health.snapshot()),
            Err(e) => ReadinessResponse::unavailable(e.to_string(), e.health().to_vec()),
        }
    }

    /// Fetch one source's contribution, or `None` if it has nothing usable.
    ///
    /// Height and mempool are bounded separately: only the height decides
    /// whether the source counts, and only the height outcome is recorded
    /// against the breaker. If this future is dropped mid-call the permit
    /// hands its probe slot back.
    async fn collect(&self, source: &dyn ChainSource) -> Option<SourceReport> {
        let service = source.name();
        let Some(permit) = self.breakers.try_acquire(service) else {
            tracing::debug!(service, "circuit open, source treated as unavailable");
            return None;
        };

        let timeout = self.config.data_timeout();
        let (height, mempool) = tokio::join!(
            bounded(timeout, source.tip_height()),
            bounded(timeout, source.mempool_summary()),
        );

        match height {
            Ok(height) => {
                permit.succeed();
                let mempool = match mempool {
                    Ok(m) => Some(m),
                    Err(e) => {
                        tracing::debug!(service, error = %e, "mempool unavailable");
                        None
                    }
                };
                Some(SourceReport { height, mempool })
            }
            Err(e) => {
                if e.is_transient() {
                    permit.fail();
                } else {
                    permit.release();
                }
                tracing::debug!(service, error = %e, "source fetch failed");
                None
            }
        }
    }
}

async fn bounded<T, F>(timeout: Duration, fut: F) -> Result<T, SourceError>
where
    F: Future<Output = Result<T, SourceError>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .unwrap_or_else(|_| {
            Err(SourceError::Timeout {
                ms: timeout.as_millis() as u64,
            })
        })
}

impl std::fmt::Debug for BootstrapService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapService")
            .field("primary", &self.primary.name())
            .field("secondary", &self.secondary.name())
            .field("config", &self.config)
            .finish()
    }
}
