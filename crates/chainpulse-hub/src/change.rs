//! Structural change detection for broadcast values.

/// Remembers the last broadcast value of one kind and reports whether a
/// new value differs from it. Comparison is `PartialEq`, i.e. a deep
/// structural compare (for JSON values, key order does not matter).
#[derive(Debug)]
pub struct ChangeDetector<T> {
    last: Option<T>,
}

impl<T: PartialEq> ChangeDetector<T> {
    pub fn new() -> Self {
        Self { last: None }
    }

    /// Store `value` and return `true` if it differs from the previous one.
    pub fn update(&mut self, value: T) -> bool {
        if self.last.as_ref() == Some(&value) {
            return false;
        }
        self.last = Some(value);
        true
    }

    pub fn last(&self) -> Option<&T> {
        self.last.as_ref()
    }
}

impl<T: PartialEq> Default for ChangeDetector<T> {
    fn default() -> Self {
        Self::new()
    }
}
