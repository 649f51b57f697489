//! Log throttling for repeated upstream failures.
//!
//! During a sustained outage every timer tick fails the same way. The
//! throttle lets one line per `(operation, failure class)` through per
//! window and counts the rest, so the next emitted line can report how many
//! were dropped. A different failure class on the same operation logs
//! immediately.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

struct ClassState {
    last_emitted: Instant,
    suppressed: u64,
}

/// Per-class minimum interval between log lines.
pub struct LogThrottle {
    window: Duration,
    classes: Mutex<HashMap<(String, &'static str), ClassState>>,
}

impl LogThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            classes: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `Some(suppressed)` if a line for `class` failures of
    /// `operation` may be logged now, where `suppressed` counts the lines
    /// swallowed since the last one. Returns `None` inside the window.
    pub fn check(&self, operation: &str, class: &'static str) -> Option<u64> {
        let now = Instant::now();
        let mut classes = self.classes.lock();
        match classes.get_mut(&(operation.to_string(), class)) {
            Some(state) if now.duration_since(state.last_emitted) < self.window => {
                state.suppressed += 1;
                None
            }
            Some(state) => {
                let suppressed = std::mem::take(&mut state.suppressed);
                state.last_emitted = now;
                Some(suppressed)
            }
            None => {
                classes.insert(
                    (operation.to_string(), class),
                    ClassState {
                        last_emitted: now,
                        suppressed: 0,
                    },
                );
                Some(0)
            }
        }
    }

    /// Forget every class recorded for `operation`, so its next failure
    /// logs immediately. Called when the operation recovers.
    pub fn reset(&self, operation: &str) {
        self.classes.lock().retain(|(op, _), _| op != operation);
    }
}

impl Default for LogThrottle {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn one_line_per_window() {
        let t = LogThrottle::new(Duration::from_secs(60));
        assert_eq!(t.check("tip", "timeout"), Some(0));
        assert_eq!(t.check("tip", "timeout"), None);
        assert_eq!(t.check("tip", "timeout"), None);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(t.check("tip", "timeout"), Some(2));
        assert_eq!(t.check("tip", "timeout"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn operations_are_independent() {
        let t = LogThrottle::new(Duration::from_secs(60));
        assert_eq!(t.check("tip", "http"), Some(0));
        assert_eq!(t.check("fees", "http"), Some(0));
        assert_eq!(t.check("tip", "http"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn new_failure_class_logs_immediately() {
        let t = LogThrottle::new(Duration::from_secs(60));
        assert_eq!(t.check("tip", "timeout"), Some(0));
        assert_eq!(t.check("tip", "timeout"), None);
        assert_eq!(t.check("tip", "rpc"), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_reopens_every_class_of_an_operation() {
        let t = LogThrottle::new(Duration::from_secs(60));
        assert_eq!(t.check("mempool", "io"), Some(0));
        assert_eq!(t.check("mempool", "decode"), Some(0));
        assert_eq!(t.check("fees", "io"), Some(0));
        t.reset("mempool");
        assert_eq!(t.check("mempool", "io"), Some(0));
        assert_eq!(t.check("mempool", "decode"), Some(0));
        assert_eq!(t.check("fees", "io"), None);
    }
}
