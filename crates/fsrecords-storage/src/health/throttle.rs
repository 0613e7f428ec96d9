//! Log throttling for repeated findings

use std::collections::HashMap;
use tracing::warn;

/// Logs each kind of message at most `max` times
pub(crate) struct MessageThrottle {
    max: u32,
    seen: HashMap<&'static str, u32>,
}

impl MessageThrottle {
    pub(crate) fn new(max: u32) -> Self {
        Self {
            max,
            seen: HashMap::new(),
        }
    }

    /// Log `message()` under `kind` unless the cap is reached
    pub(crate) fn warn(&mut self, kind: &'static str, message: impl FnOnce() -> String) {
        let seen = self.seen.entry(kind).or_insert(0);
        *seen += 1;
        if *seen <= self.max {
            warn!("{}: {}", kind, message());
        } else if *seen == self.max + 1 {
            warn!("{}: further messages suppressed", kind);
        }
    }

    /// Number of messages reported under `kind`, logged or not
    #[cfg(test)]
    pub(crate) fn count(&self, kind: &str) -> u32 {
        self.seen.get(kind).copied().unwrap_or(0)
    }
}
