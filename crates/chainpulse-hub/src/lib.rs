//! chainpulse-hub — change-detecting poller and subscriber fan-out.
//!
//! # Architecture
//!
//! ```text
//! PollingEngine (one timer per task)
//!      ├── CircuitBreakerManager  (gate every upstream call)
//!      ├── ReorgDetector          (last tip, reorg depth)
//!      ├── ChangeDetector<T>      (fees, mempool, price, fx, node info)
//!      ├── SharedCache            (refresh / invalidate)
//!      └── DistributionHub        (latest value per topic, topic filters)
//!               └── Subscriber::deliver(json)
//! ```

pub mod change;
pub mod config;
pub mod engine;
pub mod hub;
pub mod reorg;
pub mod subscriber;

pub use change::ChangeDetector;
pub use config::{HubConfig, PollingConfig};
pub use engine::{PollTask, PollingEngine};
pub use hub::{BroadcastReport, DeliveryError, DistributionHub, Subscriber, SubscriberId};
pub use reorg::{ReorgDetector, TipChange};
pub use subscriber::ChannelSubscriber;
