//! Reorg detection from successive tip observations.
//!
//! A reorg is reported when:
//! 1. the new height is lower than the last known height, or
//! 2. the height is unchanged but the fingerprint differs from the one
//!    seen at that height.
//!
//! Depth is approximated as the height distance between the two tips; the
//! common ancestor would require walking the header chain back.

use chainpulse_core::{ChainTip, ReorgEvent};

/// Outcome of observing one tip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TipChange {
    /// First tip ever observed.
    Initial(ChainTip),
    /// Height increased.
    Advanced(ChainTip),
    /// Same height, same fingerprint.
    Unchanged,
    /// The previously assumed chain was superseded.
    Reorg(ReorgEvent),
}

/// Classifies each new tip against the last known one.
#[derive(Debug, Default)]
pub struct ReorgDetector {
    head: Option<ChainTip>,
}

impl ReorgDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last known tip.
    pub fn head(&self) -> Option<&ChainTip> {
        self.head.as_ref()
    }

    /// Classify `tip` without recording it.
    pub fn classify(&self, tip: &ChainTip) -> TipChange {
        let Some(head) = &self.head else {
            return TipChange::Initial(tip.clone());
        };
        if tip.height > head.height {
            TipChange::Advanced(tip.clone())
        } else if tip.height == head.height && tip.fingerprint == head.fingerprint {
            TipChange::Unchanged
        } else {
            TipChange::Reorg(ReorgEvent::between(head.clone(), tip.clone()))
        }
    }

    /// Record `tip` as the new last-known tip and classify the change.
    pub fn observe(&mut self, tip: ChainTip) -> TipChange {
        let change = self.classify(&tip);
        match &change {
            TipChange::Unchanged => {}
            TipChange::Reorg(event) => {
                tracing::warn!(
                    depth = event.depth,
                    previous = event.previous_tip.height,
                    new = event.new_tip.height,
                    "Reorg detected"
                );
                self.head = Some(tip);
            }
            TipChange::Initial(_) | TipChange::Advanced(_) => self.head = Some(tip),
        }
        change
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tip(h: u64, f: &str) -> ChainTip {
        ChainTip::new(h, f)
    }

    #[test]
    fn normal_progression() {
        let mut det = ReorgDetector::new();
        assert_eq!(det.observe(tip(100, "a")), TipChange::Initial(tip(100, "a")));
        assert_eq!(det.observe(tip(101, "b")), TipChange::Advanced(tip(101, "b")));
        assert_eq!(det.observe(tip(101, "b")), TipChange::Unchanged);
        // Gaps are fine.
        assert_eq!(det.observe(tip(105, "e")), TipChange::Advanced(tip(105, "e")));
    }

    #[test]
    fn lower_height_is_reorg() {
        let mut det = ReorgDetector::new();
        det.observe(tip(100, "a"));
        det.observe(tip(101, "b"));
        match det.observe(tip(99, "x")) {
            TipChange::Reorg(e) => {
                assert_eq!(e.depth, 2);
                assert_eq!(e.previous_tip, tip(101, "b"));
                assert_eq!(e.new_tip, tip(99, "x"));
            }
            other => panic!("expected reorg, got {other:?}"),
        }
        assert_eq!(det.head(), Some(&tip(99, "x")));
    }

    #[test]
    fn same_height_new_fingerprint_is_reorg() {
        let mut det = ReorgDetector::new();
        det.observe(tip(100, "a"));
        match det.observe(tip(100, "a2")) {
            TipChange::Reorg(e) => assert_eq!(e.depth, 0),
            other => panic!("expected reorg, got {other:?}"),
        }
        // The replacement is now the reference.
        assert_eq!(det.observe(tip(100, "a2")), TipChange::Unchanged);
    }

    #[test]
    fn chain_continues_after_reorg() {
        let mut det = ReorgDetector::new();
        det.observe(tip(100, "a"));
        det.observe(tip(101, "b"));
        det.observe(tip(100, "a'"));
        assert_eq!(det.observe(tip(101, "b'")), TipChange::Advanced(tip(101, "b'")));
    }

    #[test]
    fn classify_does_not_record() {
        let mut det = ReorgDetector::new();
        det.observe(tip(100, "a"));
        assert_eq!(det.classify(&tip(101, "b")), TipChange::Advanced(tip(101, "b")));
        assert_eq!(det.head(), Some(&tip(100, "a")));
        assert_eq!(det.classify(&tip(100, "a")), TipChange::Unchanged);
    }
}
