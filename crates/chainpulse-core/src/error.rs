//! Upstream source error types.

use thiserror::Error;

/// Errors that can occur while calling an upstream source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// HTTP request failed (connection refused, bad status, etc.).
    #[error("HTTP error: {0}")]
    Http(String),

    /// Socket-level failure talking to a TCP protocol server.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol-level error returned by the upstream.
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The call did not finish within its deadline.
    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Response could not be interpreted.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The source does not implement this method.
    #[error("{source_name} does not support {method}")]
    Unsupported {
        source_name: String,
        method: &'static str,
    },
}

impl SourceError {
    /// Returns `true` if the failure says something about the upstream's
    /// health and should count against its circuit breaker.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Unsupported { .. })
    }

    /// Short label used to group repeated failures for log throttling.
    pub fn class(&self) -> &'static str {
        match self {
            Self::Http(_) => "http",
            Self::Io(_) => "io",
            Self::Rpc { .. } => "rpc",
            Self::Timeout { .. } => "timeout",
            Self::Decode(_) => "decode",
            Self::Unsupported { .. } => "unsupported",
        }
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_is_not_transient() {
        let e = SourceError::Unsupported {
            source_name: "electrum".into(),
            method: "mempool_summary",
        };
        assert!(!e.is_transient());
        assert_eq!(e.to_string(), "electrum does not support mempool_summary");
    }

    #[test]
    fn timeouts_count_against_breaker() {
        let e = SourceError::Timeout { ms: 5000 };
        assert!(e.is_transient());
        assert_eq!(e.class(), "timeout");
    }
}
