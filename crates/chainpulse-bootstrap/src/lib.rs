//! chainpulse-bootstrap — readiness aggregation with graceful degradation.
//!
//! # Architecture
//!
//! ```text
//! BootstrapService::readiness()
//!      ├── SharedCache          (short-lived snapshot)
//!      ├── CircuitBreakerManager (per-source gate, shared with the poller)
//!      └── HealthTable          (read-only; explains unavailable responses)
//!
//! HealthMonitor (own timer) ──probe──▶ every source ──▶ HealthTable
//! ```

pub mod config;
pub mod error;
pub mod health;
pub mod service;
pub mod snapshot;

pub use config::{BootstrapConfig, HealthMonitorConfig};
pub use error::BootstrapError;
pub use health::{HealthMonitor, HealthTable};
pub use service::BootstrapService;
pub use snapshot::{BootstrapSnapshot, Readiness, ReadinessResponse, SnapshotSource, SourceReport};
