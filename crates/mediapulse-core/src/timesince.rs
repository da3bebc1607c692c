//! Timestamps and `timeSince*` attribute generation
//!
//! Each tracker keeps a table of timestamps keyed by the action that set
//! them. When an event is emitted, every table entry whose filter matches
//! the action contributes a `timeSince*` attribute with the elapsed
//! milliseconds.

use crate::attribute::AttributeValue;
use regex::Regex;
use std::collections::HashMap;

/// A millisecond timestamp that can be overridden externally
///
/// A zero value means "unset" and yields no elapsed-time attribute. An
/// external set (historic replay) wins over subsequent internal sets.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampHolder {
    millis: i64,
    external: bool,
}

impl TimestampHolder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Internal authoritative set; ignored while an external override holds
    pub fn set_main(&mut self, millis: i64) {
        if !self.external {
            self.millis = millis;
        }
    }

    /// Caller override, used for replaying historic timestamps
    pub fn set_external(&mut self, millis: i64) {
        self.millis = millis;
        self.external = true;
    }

    pub fn is_set(&self) -> bool {
        self.millis != 0
    }

    /// Milliseconds elapsed between this timestamp and `now`, if set
    pub fn millis_since(&self, now: i64) -> Option<i64> {
        if self.is_set() {
            Some(now - self.millis)
        } else {
            None
        }
    }
}

/// One `timeSince*` table entry
struct TimeSince {
    action: String,
    attribute: String,
    filter: Regex,
    timestamp: TimestampHolder,
}

impl TimeSince {
    fn is_action(&self, action: &str) -> bool {
        self.action == action
    }

    fn is_match(&self, action: &str) -> bool {
        self.filter.is_match(action)
    }
}

/// Table of elapsed-time attributes for one tracker
pub struct TimeSinceTable {
    entries: Vec<TimeSince>,
}

impl TimeSinceTable {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Standard table for a content tracker
    pub fn for_content() -> Self {
        let mut table = Self::new();
        table.add("TRACKER_READY", "timeSinceTrackerReady", "[A-Z_]+");
        table.add("CONTENT_REQUEST", "timeSinceRequested", "CONTENT_[A-Z_]+");
        table.add("CONTENT_START", "timeSinceStarted", "CONTENT_[A-Z_]+");
        table.add("CONTENT_PAUSE", "timeSincePaused", "CONTENT_RESUME");
        table.add("CONTENT_SEEK_START", "timeSinceSeekBegin", "CONTENT_SEEK_END");
        table.add("CONTENT_BUFFER_START", "timeSinceBufferBegin", "CONTENT_BUFFER_END");
        table.add("CONTENT_HEARTBEAT", "timeSinceLastHeartbeat", "CONTENT_[A-Z_]+");
        table
    }

    /// Standard table for an ad tracker
    pub fn for_ads() -> Self {
        let mut table = Self::new();
        table.add("TRACKER_READY", "timeSinceTrackerReady", "[A-Z_]+");
        table.add("AD_REQUEST", "timeSinceAdRequested", "AD_[A-Z_]+");
        table.add("AD_START", "timeSinceAdStarted", "AD_[A-Z_]+");
        table.add("AD_PAUSE", "timeSinceAdPaused", "AD_RESUME");
        table.add("AD_SEEK_START", "timeSinceAdSeekBegin", "AD_SEEK_END");
        table.add("AD_BUFFER_START", "timeSinceAdBufferBegin", "AD_BUFFER_END");
        table.add("AD_HEARTBEAT", "timeSinceLastAdHeartbeat", "AD_[A-Z_]+");
        table.add("AD_BREAK_START", "timeSinceAdBreakBegin", "AD_BREAK_END");
        table
    }

    /// Register an entry. Static patterns only; panics on an invalid one.
    pub fn add(&mut self, action: &str, attribute: &str, filter: &str) {
        self.entries.push(TimeSince {
            action: action.to_string(),
            attribute: attribute.to_string(),
            filter: Regex::new(filter).expect("valid timeSince filter"),
            timestamp: TimestampHolder::new(),
        });
    }

    /// Override a timestamp for historic replay
    pub fn set_external(&mut self, action: &str, millis: i64) {
        for e in &mut self.entries {
            if e.is_action(action) {
                e.timestamp.set_external(millis);
            }
        }
    }

    /// Contribute matching `timeSince*` attributes for `action`, then stamp
    /// entries keyed by it.
    pub fn on_action(
        &mut self,
        action: &str,
        now_ms: i64,
        out: &mut HashMap<String, AttributeValue>,
    ) {
        for e in &self.entries {
            if e.is_match(action) {
                if let Some(ms) = e.timestamp.millis_since(now_ms) {
                    out.insert(e.attribute.clone(), AttributeValue::Int(ms));
                }
            }
        }
        for e in &mut self.entries {
            if e.is_action(action) {
                e.timestamp.set_main(now_ms);
            }
        }
    }
}

impl Default for TimeSinceTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_yields_nothing() {
        let holder = TimestampHolder::new();
        assert!(!holder.is_set());
        assert_eq!(holder.millis_since(1_000), None);
    }

    #[test]
    fn test_external_wins_over_main() {
        let mut holder = TimestampHolder::new();
        holder.set_external(500);
        holder.set_main(900);
        assert_eq!(holder.millis_since(1_000), Some(500));
    }

    #[test]
    fn test_time_since_flow() {
        let mut table = TimeSinceTable::for_content();
        let mut attrs = HashMap::new();

        // Request stamps the table but has nothing to report yet
        table.on_action("CONTENT_REQUEST", 1_000, &mut attrs);
        assert!(!attrs.contains_key("timeSinceRequested"));

        // Start, two seconds later, reports elapsed time since request
        table.on_action("CONTENT_START", 3_000, &mut attrs);
        assert_eq!(
            attrs.get("timeSinceRequested"),
            Some(&AttributeValue::Int(2_000))
        );
    }

    #[test]
    fn test_filter_scopes_attribute() {
        let mut table = TimeSinceTable::for_content();
        let mut attrs = HashMap::new();
        table.on_action("CONTENT_PAUSE", 1_000, &mut attrs);

        // timeSincePaused only applies to CONTENT_RESUME
        attrs.clear();
        table.on_action("CONTENT_HEARTBEAT", 2_000, &mut attrs);
        assert!(!attrs.contains_key("timeSincePaused"));

        attrs.clear();
        table.on_action("CONTENT_RESUME", 2_500, &mut attrs);
        assert_eq!(attrs.get("timeSincePaused"), Some(&AttributeValue::Int(1_500)));
    }
}
