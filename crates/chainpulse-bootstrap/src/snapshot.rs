//! Readiness read model and response envelope.

use chainpulse_core::{now_millis, MempoolSummary, ServiceHealth};
use serde::{Deserialize, Serialize};

/// Whether enough upstream data is available to serve consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Readiness {
    Ready,
    Degraded,
    Unavailable,
}

impl std::fmt::Display for Readiness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready => write!(f, "ready"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Which sources contributed to a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SnapshotSource {
    PrimaryOnly,
    SecondaryOnly,
    Hybrid,
}

/// What one source reported during aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceReport {
    pub height: u64,
    /// Mempool figures are best-effort; a failed mempool call does not
    /// disqualify the source.
    pub mempool: Option<MempoolSummary>,
}

/// Combined view of the primary (full node) and secondary (indexer) sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapSnapshot {
    pub primary_height: Option<u64>,
    pub secondary_height: Option<u64>,
    pub primary_mempool: Option<MempoolSummary>,
    pub secondary_mempool: Option<MempoolSummary>,
    pub readiness: Readiness,
    pub source: SnapshotSource,
    pub generated_at: i64,
}

impl BootstrapSnapshot {
    /// Combine two source reports. Returns `None` when neither source
    /// reported, which callers must treat as "unavailable", never as data.
    pub fn compose(primary: Option<SourceReport>, secondary: Option<SourceReport>) -> Option<Self> {
        let (readiness, source) = match (&primary, &secondary) {
            (Some(_), Some(_)) => (Readiness::Ready, SnapshotSource::Hybrid),
            (Some(_), None) => (Readiness::Degraded, SnapshotSource::PrimaryOnly),
            (None, Some(_)) => (Readiness::Degraded, SnapshotSource::SecondaryOnly),
            (None, None) => return None,
        };
        Some(Self {
            primary_height: primary.map(|r| r.height),
            secondary_height: secondary.map(|r| r.height),
            primary_mempool: primary.and_then(|r| r.mempool),
            secondary_mempool: secondary.and_then(|r| r.mempool),
            readiness,
            source,
            generated_at: now_millis(),
        })
    }

    /// Best known height: the higher of the two sources.
    pub fn height(&self) -> Option<u64> {
        self.primary_height.max(self.secondary_height)
    }
}

/// The `{ok, timestamp, ...}` envelope returned to readiness callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessResponse {
    pub ok: bool,
    pub timestamp: i64,
    #[serde(flatten)]
    pub snapshot: Option<BootstrapSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub services: Vec<ServiceHealth>,
}

impl ReadinessResponse {
    pub fn ready(snapshot: BootstrapSnapshot, services: Vec<ServiceHealth>) -> Self {
        Self {
            ok: true,
            timestamp: now_millis(),
            snapshot: Some(snapshot),
            error: None,
            services,
        }
    }

    pub fn unavailable(error: impl Into<String>, services: Vec<ServiceHealth>) -> Self {
        Self {
            ok: false,
            timestamp: now_millis(),
            snapshot: None,
            error: Some(error.into()),
            services,
        }
    }

    pub fn readiness(&self) -> Readiness {
        self.snapshot
            .as_ref()
            .map_or(Readiness::Unavailable, |s| s.readiness)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(height: u64) -> SourceReport {
        SourceReport {
            height,
            mempool: Some(MempoolSummary {
                pending_count: 10,
                vsize_bytes: None,
            }),
        }
    }

    #[test]
    fn both_sources_is_ready_hybrid() {
        let s = BootstrapSnapshot::compose(Some(report(100)), Some(report(99))).unwrap();
        assert_eq!(s.readiness, Readiness::Ready);
        assert_eq!(s.source, SnapshotSource::Hybrid);
        assert_eq!(s.height(), Some(100));
    }

    #[test]
    fn one_source_is_degraded() {
        let s = BootstrapSnapshot::compose(None, Some(report(99))).unwrap();
        assert_eq!(s.readiness, Readiness::Degraded);
        assert_eq!(s.source, SnapshotSource::SecondaryOnly);
        assert_eq!(s.primary_height, None);
        assert_eq!(s.primary_mempool, None);
        assert_eq!(s.secondary_height, Some(99));

        let s = BootstrapSnapshot::compose(Some(report(100)), None).unwrap();
        assert_eq!(s.source, SnapshotSource::PrimaryOnly);
    }

    #[test]
    fn no_sources_is_not_a_snapshot() {
        assert!(BootstrapSnapshot::compose(None, None).is_none());
    }

    #[test]
    fn response_flattens_snapshot() {
        let s = BootstrapSnapshot::compose(Some(report(100)), None).unwrap();
        let json = serde_json::to_value(ReadinessResponse::ready(s, vec![])).unwrap();
        assert_eq!(json["ok"], true);
        assert_eq!(json["readiness"], "degraded");
        assert_eq!(json["source"], "primaryOnly");
        assert_eq!(json["primaryHeight"], 100);
        assert!(json["timestamp"].is_i64());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn unavailable_response_has_no_snapshot_fields() {
        let r = ReadinessResponse::unavailable("no upstream source is available", vec![]);
        assert_eq!(r.readiness(), Readiness::Unavailable);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["ok"], false);
        assert!(json.get("readiness").is_none());
        assert_eq!(json["services"], serde_json::json!([]));
    }
}
