use chainpulse_core::ServiceHealth;
use thiserror::Error;

/// Terminal outcomes of a readiness request.
#[derive(Debug, Clone, Error)]
pub enum BootstrapError {
    /// Neither source produced usable data. Carries the last known health
    /// table so callers can explain the outage.
    #[error("no upstream source is available")]
    Unavailable { health: Vec<ServiceHealth> },
}

impl BootstrapError {
    pub fn health(&self) -> &[ServiceHealth] {
        match self {
            Self::Unavailable { health } => health,
        }
    }
}
