//! `DistributionHub` — fans events out to live subscribers.
//!
//! ```text
//! PollingEngine ──broadcast(event)──▶ DistributionHub
//!                                        ├── latest[topic]    (replayed on join)
//!                                        └── subscribers[id] → (handle, topic filter)
//!                                               │
//!                                               ▼
//!                                        Subscriber::deliver(json)
//! ```
//!
//! Subscribers are plain transport handles. The hub owns the id → filter
//! map; an empty filter means "every topic".

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chainpulse_core::{now_millis, Envelope, HubEvent, Topic};
use parking_lot::RwLock;
use thiserror::Error;

/// Hub-assigned subscriber handle.
pub type SubscriberId = u64;

/// Why a message could not be handed to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The subscriber's buffer is full.
    #[error("subscriber buffer full")]
    Full,
    /// The subscriber's transport is gone.
    #[error("subscriber closed")]
    Closed,
    #[error("{0}")]
    Other(String),
}

/// A transport-side handle that accepts serialized envelopes.
///
/// `deliver` is called inline during fan-out and must not block; queue the
/// message or fail fast.
pub trait Subscriber: Send + Sync {
    fn deliver(&self, message: &Arc<str>) -> Result<(), DeliveryError>;
}

/// Result of one fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Subscribers whose delivery failed. The hub keeps them; removal is up
    /// to the owning transport.
    pub failed: Vec<SubscriberId>,
}

#[derive(Debug, Clone)]
struct Stamped {
    event: HubEvent,
    timestamp: i64,
}

struct SubscriberEntry {
    handle: Arc<dyn Subscriber>,
    topics: HashSet<Topic>,
}

impl SubscriberEntry {
    fn accepts(&self, topic: Topic) -> bool {
        self.topics.is_empty() || self.topics.contains(&topic)
    }
}

/// The live subscriber set plus the last value of every replayable topic.
pub struct DistributionHub {
    next_id: AtomicU64,
    subscribers: RwLock<HashMap<SubscriberId, SubscriberEntry>>,
    // Lock order: `latest` before `subscribers`.
    latest: RwLock<BTreeMap<Topic, Stamped>>,
}

impl DistributionHub {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            subscribers: RwLock::new(HashMap::new()),
            latest: RwLock::new(BTreeMap::new()),
        }
    }

    /// Add a subscriber that receives every topic, and replay the latest
    /// known value of each tracked topic to it.
    pub fn join(&self, handle: Arc<dyn Subscriber>) -> SubscriberId {
        self.join_with_topics(handle, HashSet::new())
    }

    /// Add a subscriber with an explicit topic allow-list (empty = all).
    /// Only matching topics are replayed.
    pub fn join_with_topics(&self, handle: Arc<dyn Subscriber>, topics: HashSet<Topic>) -> SubscriberId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = SubscriberEntry { handle, topics };

        // Holding `latest` across insert + replay orders the replay before
        // any broadcast that could reach the new subscriber.
        let latest = self.latest.read();
        let mut replayed = 0usize;
        for (topic, stamped) in latest.iter() {
            if !entry.accepts(*topic) {
                continue;
            }
            match Envelope::new(&stamped.event, stamped.timestamp).to_json() {
                Ok(json) => {
                    let message: Arc<str> = Arc::from(json);
                    match entry.handle.deliver(&message) {
                        Ok(()) => replayed += 1,
                        Err(e) => {
                            tracing::debug!(subscriber = id, topic = %topic, error = %e, "replay delivery failed");
                        }
                    }
                }
                Err(e) => tracing::error!(topic = %topic, error = %e, "failed to serialize replay"),
            }
        }
        self.subscribers.write().insert(id, entry);
        drop(latest);

        tracing::debug!(subscriber = id, replayed, "subscriber joined");
        id
    }

    /// Replace a subscriber's topic filter. Returns `false` for unknown ids.
    pub fn set_topics(&self, id: SubscriberId, topics: HashSet<Topic>) -> bool {
        match self.subscribers.write().get_mut(&id) {
            Some(entry) => {
                entry.topics = topics;
                true
            }
            None => false,
        }
    }

    /// Remove a subscriber. Removing an unknown id is a no-op.
    pub fn leave(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.write().remove(&id).is_some();
        if removed {
            tracing::debug!(subscriber = id, "subscriber left");
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Latest value recorded for `topic`.
    pub fn latest(&self, topic: Topic) -> Option<HubEvent> {
        self.latest.read().get(&topic).map(|s| s.event.clone())
    }

    /// Record `event` as the latest value of its topic without delivering it.
    pub fn remember(&self, event: HubEvent) {
        let topic = event.topic();
        if topic.is_replayable() {
            self.latest.write().insert(
                topic,
                Stamped {
                    event,
                    timestamp: now_millis(),
                },
            );
        }
    }

    /// Deliver `event` to every subscriber whose filter accepts its topic.
    ///
    /// The envelope is serialized once. With no subscribers nothing is
    /// serialized or logged; the value is still kept for replay.
    pub fn broadcast(&self, event: &HubEvent) -> BroadcastReport {
        let topic = event.topic();
        let timestamp = now_millis();

        let targets: Vec<(SubscriberId, Arc<dyn Subscriber>)> = {
            let mut latest = self.latest.write();
            if topic.is_replayable() {
                latest.insert(
                    topic,
                    Stamped {
                        event: event.clone(),
                        timestamp,
                    },
                );
            }
            let subscribers = self.subscribers.read();
            if subscribers.is_empty() {
                return BroadcastReport::default();
            }
            subscribers
                .iter()
                .filter(|(_, entry)| entry.accepts(topic))
                .map(|(id, entry)| (*id, Arc::clone(&entry.handle)))
                .collect()
        };

        if targets.is_empty() {
            return BroadcastReport::default();
        }

        let message: Arc<str> = match Envelope::new(event, timestamp).to_json() {
            Ok(json) => Arc::from(json),
            Err(e) => {
                tracing::error!(topic = %topic, error = %e, "failed to serialize event");
                return BroadcastReport::default();
            }
        };

        let mut report = BroadcastReport::default();
        for (id, handle) in targets {
            match handle.deliver(&message) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::debug!(subscriber = id, topic = %topic, error = %e, "delivery failed");
                    report.failed.push(id);
                }
            }
        }

        tracing::trace!(topic = %topic, delivered = report.delivered, failed = report.failed.len(), "broadcast");
        report
    }
}

impl Default for DistributionHub {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DistributionHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributionHub")
            .field("subscribers", &self.subscriber_count())
            .field("tracked_topics", &self.latest.read().len())
            .finish()
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chainpulse_core::{ChainTip, FeeEstimate, MempoolSummary, ReorgEvent};
    use parking_lot::Mutex;
    use serde_json::Value;

    #[derive(Default)]
    struct Recorder {
        messages: Mutex<Vec<String>>,
        fail: bool,
    }

    impl Recorder {
        fn failing() -> Self {
            Self { fail: true, ..Default::default() }
        }

        fn types(&self) -> Vec<String> {
            self.messages
                .lock()
                .iter()
                .map(|m| {
                    let v: Value = serde_json::from_str(m).unwrap();
                    v["type"].as_str().unwrap().to_string()
                })
                .collect()
        }
    }

    impl Subscriber for Recorder {
        fn deliver(&self, message: &Arc<str>) -> Result<(), DeliveryError> {
            if self.fail {
                return Err(DeliveryError::Closed);
            }
            self.messages.lock().push(message.to_string());
            Ok(())
        }
    }

    fn tip_event(h: u64) -> HubEvent {
        HubEvent::TipHeight(ChainTip::new(h, "ff"))
    }

    fn fees_event() -> HubEvent {
        HubEvent::Fees(FeeEstimate { fast: 20.0, normal: 10.0, slow: 1.0 })
    }

    #[test]
    fn broadcast_without_subscribers_is_a_no_op() {
        let hub = DistributionHub::new();
        let report = hub.broadcast(&tip_event(100));
        assert_eq!(report, BroadcastReport::default());
        // Still remembered for later joiners.
        assert_eq!(hub.latest(Topic::TipHeight), Some(tip_event(100)));
    }

    #[test]
    fn join_replays_latest_of_each_topic() {
        let hub = DistributionHub::new();
        hub.broadcast(&tip_event(100));
        hub.broadcast(&tip_event(101));
        hub.broadcast(&fees_event());

        let rec = Arc::new(Recorder::default());
        hub.join(rec.clone());

        let types = rec.types();
        assert_eq!(types.len(), 2);
        assert!(types.contains(&"tip.height".to_string()));
        assert!(types.contains(&"network.fees".to_string()));

        let first: Value = serde_json::from_str(&rec.messages.lock()[0]).unwrap();
        assert!(first["timestamp"].as_i64().unwrap() > 0);
    }

    #[test]
    fn reorgs_are_not_replayed() {
        let hub = DistributionHub::new();
        hub.broadcast(&HubEvent::Reorg(ReorgEvent::between(
            ChainTip::new(101, "b"),
            ChainTip::new(99, "x"),
        )));
        let rec = Arc::new(Recorder::default());
        hub.join(rec.clone());
        assert!(rec.types().is_empty());
    }

    #[test]
    fn filters_limit_delivery_and_replay() {
        let hub = DistributionHub::new();
        hub.broadcast(&tip_event(100));
        hub.broadcast(&fees_event());

        let all = Arc::new(Recorder::default());
        let fees_only = Arc::new(Recorder::default());
        hub.join(all.clone());
        hub.join_with_topics(fees_only.clone(), HashSet::from([Topic::NetworkFees]));
        assert_eq!(fees_only.types(), vec!["network.fees"]);

        let report = hub.broadcast(&tip_event(101));
        assert_eq!(report.delivered, 1);
        assert_eq!(fees_only.types(), vec!["network.fees"]);
        assert_eq!(all.types().len(), 3);
    }

    #[test]
    fn set_topics_replaces_filter() {
        let hub = DistributionHub::new();
        let rec = Arc::new(Recorder::default());
        let id = hub.join(rec.clone());
        assert!(hub.set_topics(id, HashSet::from([Topic::NetworkMempool])));

        hub.broadcast(&tip_event(100));
        hub.broadcast(&HubEvent::Mempool(MempoolSummary { pending_count: 3, vsize_bytes: None }));
        assert_eq!(rec.types(), vec!["network.mempool"]);

        // Clearing the filter restores everything.
        assert!(hub.set_topics(id, HashSet::new()));
        hub.broadcast(&tip_event(101));
        assert_eq!(rec.types().len(), 2);

        assert!(!hub.set_topics(999, HashSet::new()));
    }

    #[test]
    fn failing_subscriber_does_not_block_others() {
        let hub = DistributionHub::new();
        let bad = Arc::new(Recorder::failing());
        let good = Arc::new(Recorder::default());
        let bad_id = hub.join(bad);
        hub.join(good.clone());

        let report = hub.broadcast(&tip_event(100));
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, vec![bad_id]);
        assert_eq!(good.types(), vec!["tip.height"]);
        // The hub does not evict on failure.
        assert_eq!(hub.subscriber_count(), 2);
    }

    #[test]
    fn leave_is_idempotent() {
        let hub = DistributionHub::new();
        let rec = Arc::new(Recorder::default());
        let id = hub.join(rec.clone());
        assert!(hub.leave(id));
        assert!(!hub.leave(id));
        assert_eq!(hub.subscriber_count(), 0);

        hub.broadcast(&tip_event(100));
        assert!(rec.types().is_empty());
    }

    #[test]
    fn remember_updates_replay_without_delivery() {
        let hub = DistributionHub::new();
        let rec = Arc::new(Recorder::default());
        hub.join(rec.clone());
        hub.remember(tip_event(99));
        assert!(rec.types().is_empty());
        assert_eq!(hub.latest(Topic::TipHeight), Some(tip_event(99)));
    }
}
