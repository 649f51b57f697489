//! `PollingEngine` — periodic upstream polling with change detection.
//!
//! One independent Tokio task per [`PollTask`]. Each tick:
//!   - asks the circuit breaker for permission and calls the source under a timeout
//!   - diffs the result against the last broadcast value
//!   - refreshes / invalidates the shared cache
//!   - broadcasts an event only when something changed
//!
//! Failures are recorded against the source's breaker, logged through a
//! [`LogThrottle`], and never stop later ticks.
//!
//! # Lifecycle
//! `stopped → running` on [`start`](PollingEngine::start) (first tick of every
//! task fires immediately), `running → stopped` on [`stop`](PollingEngine::stop).
//! Stopping cancels every timer; a call already in flight may finish but its
//! result is discarded. The token is checked once more after the cache
//! write, so nothing is committed or broadcast after `stop` returns.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chainpulse_core::cache::keys;
use chainpulse_core::{
    ttl_for, ChainSource, ChainTip, CircuitBreakerManager, EntityKind, FeeEstimate, FxSnapshot,
    HubEvent, LogThrottle, MempoolSummary, NodeInfoKind, NodeInfoSource, PriceSnapshot, SharedCache,
    SourceError,
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::change::ChangeDetector;
use crate::config::PollingConfig;
use crate::hub::DistributionHub;
use crate::reorg::{ReorgDetector, TipChange};

/// The independent units of periodic work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollTask {
    Tip,
    Fees,
    Mempool,
    Price,
    Fx,
    NodeInfo(NodeInfoKind),
}

impl PollTask {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Tip => "tip",
            Self::Fees => "fees",
            Self::Mempool => "mempool",
            Self::Price => "price",
            Self::Fx => "fx",
            Self::NodeInfo(NodeInfoKind::Blockchain) => "blockchain-info",
            Self::NodeInfo(NodeInfoKind::Network) => "network-info",
            Self::NodeInfo(NodeInfoKind::Mining) => "mining-info",
        }
    }

    pub fn interval(&self, config: &PollingConfig) -> Duration {
        let ms = match self {
            Self::Tip => config.tip_interval_ms,
            Self::Fees => config.fees_interval_ms,
            Self::Mempool => config.mempool_interval_ms,
            Self::Price => config.price_interval_ms,
            Self::Fx => config.fx_interval_ms,
            Self::NodeInfo(NodeInfoKind::Blockchain) => config.blockchain_info_interval_ms,
            Self::NodeInfo(NodeInfoKind::Network) => config.network_info_interval_ms,
            Self::NodeInfo(NodeInfoKind::Mining) => config.mining_info_interval_ms,
        };
        Duration::from_millis(ms.max(1))
    }
}

impl std::fmt::Display for PollTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Last broadcast values. The engine is their only writer.
struct LastKnown {
    tip: Mutex<ReorgDetector>,
    fees: Mutex<ChangeDetector<FeeEstimate>>,
    mempool: Mutex<ChangeDetector<MempoolSummary>>,
    price: Mutex<ChangeDetector<PriceSnapshot>>,
    fx: Mutex<ChangeDetector<FxSnapshot>>,
    blockchain_info: Mutex<ChangeDetector<Value>>,
    network_info: Mutex<ChangeDetector<Value>>,
    mining_info: Mutex<ChangeDetector<Value>>,
}

impl LastKnown {
    fn new() -> Self {
        Self {
            tip: Mutex::default(),
            fees: Mutex::default(),
            mempool: Mutex::default(),
            price: Mutex::default(),
            fx: Mutex::default(),
            blockchain_info: Mutex::default(),
            network_info: Mutex::default(),
            mining_info: Mutex::default(),
        }
    }

    fn node_info(&self, kind: NodeInfoKind) -> &Mutex<ChangeDetector<Value>> {
        match kind {
            NodeInfoKind::Blockchain => &self.blockchain_info,
            NodeInfoKind::Network => &self.network_info,
            NodeInfoKind::Mining => &self.mining_info,
        }
    }
}

struct EngineShared {
    config: PollingConfig,
    source: Arc<dyn ChainSource>,
    node_info: Option<Arc<dyn NodeInfoSource>>,
    hub: Arc<DistributionHub>,
    cache: SharedCache,
    breakers: Arc<CircuitBreakerManager>,
    throttle: LogThrottle,
    last: LastKnown,
}

enum Lifecycle {
    Stopped,
    Running {
        token: CancellationToken,
        handles: Vec<JoinHandle<()>>,
    },
}

/// Polls upstream sources on fixed timers and feeds the hub.
pub struct PollingEngine {
    shared: Arc<EngineShared>,
    lifecycle: Mutex<Lifecycle>,
}

impl PollingEngine {
    /// `node_info` enables the three node-info timers when present.
    pub fn new(
        config: PollingConfig,
        source: Arc<dyn ChainSource>,
        node_info: Option<Arc<dyn NodeInfoSource>>,
        hub: Arc<DistributionHub>,
        cache: SharedCache,
        breakers: Arc<CircuitBreakerManager>,
    ) -> Self {
        let throttle = LogThrottle::new(config.failure_log_interval());
        let last = LastKnown::new();
        Self {
            shared: Arc::new(EngineShared {
                config,
                source,
                node_info,
                hub,
                cache,
                breakers,
                throttle,
                last,
            }),
            lifecycle: Mutex::new(Lifecycle::Stopped),
        }
    }

    /// Tasks this engine runs, in start order.
    pub fn tasks(&self) -> Vec<PollTask> {
        let mut tasks = vec![
            PollTask::Tip,
            PollTask::Fees,
            PollTask::Mempool,
            PollTask::Price,
            PollTask::Fx,
        ];
        if self.shared.node_info.is_some() {
            tasks.extend(NodeInfoKind::ALL.map(PollTask::NodeInfo));
        }
        tasks
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.lifecycle.lock(), Lifecycle::Running { .. })
    }

    /// Spawn one timer per task. Returns `false` if already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        if matches!(*lifecycle, Lifecycle::Running { .. }) {
            return false;
        }

        let token = CancellationToken::new();
        let handles = self
            .tasks()
            .into_iter()
            .map(|task| {
                let shared = Arc::clone(&self.shared);
                let token = token.clone();
                tokio::spawn(async move { run_timer(shared, task, token).await })
            })
            .collect::<Vec<_>>();

        tracing::info!(
            tasks = handles.len(),
            source = self.shared.source.name(),
            "polling engine started"
        );
        *lifecycle = Lifecycle::Running { token, handles };
        true
    }

    /// Cancel every timer. Safe to call in any state, any number of times.
    /// Returns `false` if the engine was not running.
    pub fn stop(&self) -> bool {
        let previous = std::mem::replace(&mut *self.lifecycle.lock(), Lifecycle::Stopped);
        match previous {
            Lifecycle::Running { token, handles } => {
                token.cancel();
                // In-flight ticks finish on their own and see the cancelled token.
                drop(handles);
                tracing::info!("polling engine stopped");
                true
            }
            Lifecycle::Stopped => false,
        }
    }

    /// Run one tick of `task` immediately, outside the timers.
    pub async fn tick(&self, task: PollTask) {
        self.shared.run(task, &CancellationToken::new()).await;
    }

    /// Last tip the engine has observed.
    pub fn last_tip(&self) -> Option<ChainTip> {
        self.shared.last.tip.lock().head().cloned()
    }
}

impl Drop for PollingEngine {
    fn drop(&mut self) {
        if let Lifecycle::Running { token, .. } = &*self.lifecycle.lock() {
            token.cancel();
        }
    }
}

impl std::fmt::Debug for PollingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingEngine")
            .field("source", &self.shared.source.name())
            .field("running", &self.is_running())
            .finish()
    }
}

async fn run_timer(shared: Arc<EngineShared>, task: PollTask, token: CancellationToken) {
    let mut interval = tokio::time::interval(task.interval(&shared.config));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = interval.tick() => shared.run(task, &token).await,
        }
    }
    tracing::debug!(task = %task, "poll timer exited");
}

impl EngineShared {
    async fn run(&self, task: PollTask, token: &CancellationToken) {
        match task {
            PollTask::Tip => self.poll_tip(token).await,
            PollTask::Fees => self.poll_fees(token).await,
            PollTask::Mempool => self.poll_mempool(token).await,
            PollTask::Price => self.poll_price(token).await,
            PollTask::Fx => self.poll_fx(token).await,
            PollTask::NodeInfo(kind) => self.poll_node_info(kind, token).await,
        }
    }

    /// Gate, time-box and account for one upstream call.
    async fn call<T, F>(&self, task: PollTask, service: &str, fut: F) -> Option<T>
    where
        F: Future<Output = Result<T, SourceError>>,
    {
        let Some(permit) = self.breakers.try_acquire(service) else {
            tracing::debug!(task = %task, service, "circuit open, skipping tick");
            return None;
        };

        let timeout = self.config.call_timeout();
        let result = match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout {
                ms: timeout.as_millis() as u64,
            }),
        };

        match result {
            Ok(value) => {
                permit.succeed();
                self.throttle.reset(task.label());
                Some(value)
            }
            Err(e) => {
                if e.is_transient() {
                    permit.fail();
                } else {
                    permit.release();
                }
                match self.throttle.check(task.label(), e.class()) {
                    Some(suppressed) => tracing::warn!(
                        task = %task,
                        service,
                        class = e.class(),
                        error = %e,
                        suppressed,
                        "poll failed"
                    ),
                    None => tracing::debug!(task = %task, service, error = %e, "poll failed"),
                }
                None
            }
        }
    }

    async fn poll_tip(&self, token: &CancellationToken) {
        let source = self.source.name();
        let Some(header) = self.call(PollTask::Tip, source, self.source.tip_header()).await else {
            return;
        };
        if token.is_cancelled() {
            return;
        }

        let tip = ChainTip::from_header(&header, self.config.fingerprint_len);
        let change = self.last.tip.lock().classify(&tip);
        match &change {
            TipChange::Initial(tip) | TipChange::Advanced(tip) => {
                self.cache_set(keys::TIP_HEIGHT, &tip.height, ttl_for(EntityKind::Block, 0))
                    .await;
            }
            TipChange::Reorg(_) => self.cache.delete(keys::TIP_HEIGHT).await,
            TipChange::Unchanged => return,
        }
        if token.is_cancelled() {
            return;
        }

        let change = self.last.tip.lock().observe(tip);
        match change {
            TipChange::Initial(tip) | TipChange::Advanced(tip) => {
                tracing::debug!(height = tip.height, "new tip");
                self.hub.broadcast(&HubEvent::TipHeight(tip));
            }
            TipChange::Unchanged => {}
            TipChange::Reorg(event) => {
                self.hub.remember(HubEvent::TipHeight(event.new_tip.clone()));
                self.hub.broadcast(&HubEvent::Reorg(event));
            }
        }
    }

    async fn poll_fees(&self, token: &CancellationToken) {
        let source = self.source.name();
        let Some(fees) = self.call(PollTask::Fees, source, self.source.fee_estimates()).await else {
            return;
        };
        if token.is_cancelled() {
            return;
        }

        self.cache_set(keys::FEE_ESTIMATES, &fees, ttl_for(EntityKind::FeeEstimates, 0))
            .await;
        if token.is_cancelled() {
            return;
        }
        let changed = self.last.fees.lock().update(fees);
        if changed {
            self.hub.broadcast(&HubEvent::Fees(fees));
        }
    }

    async fn poll_mempool(&self, token: &CancellationToken) {
        let source = self.source.name();
        let Some(mempool) = self
            .call(PollTask::Mempool, source, self.source.mempool_summary())
            .await
        else {
            return;
        };
        if token.is_cancelled() {
            return;
        }

        self.cache_set(keys::MEMPOOL_SUMMARY, &mempool, ttl_for(EntityKind::MempoolSummary, 0))
            .await;
        if token.is_cancelled() {
            return;
        }
        let changed = self.last.mempool.lock().update(mempool);
        if changed {
            self.hub.broadcast(&HubEvent::Mempool(mempool));
        }
    }

    async fn poll_price(&self, token: &CancellationToken) {
        let Some(price) = self.cache.get::<PriceSnapshot>(keys::PRICE_CURRENT).await else {
            tracing::trace!("no price in cache");
            return;
        };
        if token.is_cancelled() {
            return;
        }
        let changed = self.last.price.lock().update(price.clone());
        if changed {
            self.hub.broadcast(&HubEvent::Price(price));
        }
    }

    async fn poll_fx(&self, token: &CancellationToken) {
        let Some(fx) = self.cache.get::<FxSnapshot>(keys::FX_RATES).await else {
            tracing::trace!("no fx rates in cache");
            return;
        };
        if token.is_cancelled() {
            return;
        }
        let changed = self.last.fx.lock().update(fx.clone());
        if changed {
            self.hub.broadcast(&HubEvent::Fx(fx));
        }
    }

    async fn poll_node_info(&self, kind: NodeInfoKind, token: &CancellationToken) {
        let Some(node) = self.node_info.as_ref() else {
            return;
        };
        let task = PollTask::NodeInfo(kind);
        let Some(record) = self.call(task, node.name(), kind.fetch(node.as_ref())).await else {
            return;
        };
        if token.is_cancelled() {
            return;
        }
        let changed = self.last.node_info(kind).lock().update(record.clone());
        if changed {
            self.hub.broadcast(&kind.into_event(record));
        }
    }

    async fn cache_set<T: serde::Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        if let Err(e) = self.cache.set(key, value, ttl).await {
            tracing::warn!(key, error = %e, "failed to cache value");
        }
    }
}
