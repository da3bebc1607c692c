//! Event model and wire serialization
//!
//! Events are immutable once created. The wire shape flattens the attribute
//! map next to `eventType`, `actionName` and `timestamp`.

use crate::attribute::AttributeValue;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Wire event type for playback events
pub const EVENT_TYPE_VIDEO: &str = "MobileVideo";

/// Wire event type for custom actions
pub const EVENT_TYPE_CUSTOM: &str = "VideoCustomAction";

/// Canonical action names
pub mod actions {
    pub const TRACKER_READY: &str = "TRACKER_READY";
    pub const PLAYER_READY: &str = "PLAYER_READY";

    pub const CONTENT_REQUEST: &str = "CONTENT_REQUEST";
    pub const CONTENT_START: &str = "CONTENT_START";
    pub const CONTENT_PAUSE: &str = "CONTENT_PAUSE";
    pub const CONTENT_RESUME: &str = "CONTENT_RESUME";
    pub const CONTENT_END: &str = "CONTENT_END";
    pub const CONTENT_SEEK_START: &str = "CONTENT_SEEK_START";
    pub const CONTENT_SEEK_END: &str = "CONTENT_SEEK_END";
    pub const CONTENT_BUFFER_START: &str = "CONTENT_BUFFER_START";
    pub const CONTENT_BUFFER_END: &str = "CONTENT_BUFFER_END";
    pub const CONTENT_HEARTBEAT: &str = "CONTENT_HEARTBEAT";
    pub const CONTENT_RENDITION_CHANGE: &str = "CONTENT_RENDITION_CHANGE";
    pub const CONTENT_ERROR: &str = "CONTENT_ERROR";

    pub const AD_REQUEST: &str = "AD_REQUEST";
    pub const AD_START: &str = "AD_START";
    pub const AD_PAUSE: &str = "AD_PAUSE";
    pub const AD_RESUME: &str = "AD_RESUME";
    pub const AD_END: &str = "AD_END";
    pub const AD_SEEK_START: &str = "AD_SEEK_START";
    pub const AD_SEEK_END: &str = "AD_SEEK_END";
    pub const AD_BUFFER_START: &str = "AD_BUFFER_START";
    pub const AD_BUFFER_END: &str = "AD_BUFFER_END";
    pub const AD_HEARTBEAT: &str = "AD_HEARTBEAT";
    pub const AD_RENDITION_CHANGE: &str = "AD_RENDITION_CHANGE";
    pub const AD_ERROR: &str = "AD_ERROR";
    pub const AD_BREAK_START: &str = "AD_BREAK_START";
    pub const AD_BREAK_END: &str = "AD_BREAK_END";
    pub const AD_QUARTILE: &str = "AD_QUARTILE";
    pub const AD_CLICK: &str = "AD_CLICK";
}

/// Harvest priority class
///
/// Live and on-demand events are buffered and harvested independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Live,
    OnDemand,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Live => "live",
            Priority::OnDemand => "ondemand",
        }
    }

    pub const ALL: [Priority; 2] = [Priority::Live, Priority::OnDemand];
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single telemetry event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoEvent {
    /// Wire event type (`MobileVideo` or `VideoCustomAction`)
    pub event_type: String,
    /// Action name (e.g. `CONTENT_START`)
    pub name: String,
    /// Event attributes
    pub attributes: HashMap<String, AttributeValue>,
    /// Epoch milliseconds at creation
    pub timestamp_ms: i64,
    /// Harvest priority class
    pub priority: Priority,
}

impl VideoEvent {
    /// Create an event timestamped now
    pub fn new(
        event_type: &str,
        name: impl Into<String>,
        attributes: HashMap<String, AttributeValue>,
        priority: Priority,
    ) -> Self {
        Self {
            event_type: event_type.to_string(),
            name: name.into(),
            attributes,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            priority,
        }
    }

    /// Create an event with an explicit timestamp (historic replay)
    pub fn with_timestamp(
        event_type: &str,
        name: impl Into<String>,
        attributes: HashMap<String, AttributeValue>,
        priority: Priority,
        timestamp_ms: i64,
    ) -> Self {
        Self {
            event_type: event_type.to_string(),
            name: name.into(),
            attributes,
            timestamp_ms,
            priority,
        }
    }

    /// Wire representation: attributes flattened next to the envelope fields
    pub fn to_wire(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert("eventType".to_string(), Value::from(self.event_type.clone()));
        map.insert("actionName".to_string(), Value::from(self.name.clone()));
        map.insert("timestamp".to_string(), Value::from(self.timestamp_ms));
        for (k, v) in &self.attributes {
            map.insert(k.clone(), serde_json::to_value(v).unwrap_or(Value::Null));
        }
        Value::Object(map)
    }
}

/// Estimates the serialized size of an event for batch accounting
pub trait SizeEstimator: Send + Sync {
    fn estimate(&self, event: &VideoEvent) -> usize;
}

/// Fallback size when an event cannot be serialized
const FALLBACK_EVENT_SIZE: usize = 512;

/// Default size estimation based on the serialized wire form
pub struct DefaultSizeEstimator;

impl SizeEstimator for DefaultSizeEstimator {
    fn estimate(&self, event: &VideoEvent) -> usize {
        serde_json::to_vec(&event.to_wire())
            .map(|v| v.len())
            .unwrap_or(FALLBACK_EVENT_SIZE)
    }
}
