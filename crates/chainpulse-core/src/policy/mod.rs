//! Reliability policies shared by the polling engine and the aggregator.
//!
//! ```text
//! caller → [CircuitBreakerManager::try_acquire] → timeout(upstream call) → CallPermit::succeed / fail / release
//!                                                                       └→ [LogThrottle] on failure
//! ```

pub mod circuit_breaker;
pub mod throttle;

pub use circuit_breaker::{
    CallPermit, CircuitBreakerConfig, CircuitBreakerManager, CircuitBreakerState, CircuitState,
};
pub use throttle::LogThrottle;
