//! MediaPulse Core - Video Analytics Library
//!
//! This crate provides the core functionality for video playback telemetry:
//! - Playback state machine with transient-state tracking
//! - Typed event attributes and wire serialization
//! - Priority event buffering with crash-safe persistence
//! - Harvest scheduling with retry and dead-letter semantics
//! - Offline storage for at-least-once delivery
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      MediaPulse Core                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐          │
//! │  │   Tracker    │  │   Playback   │  │  Attribute   │          │
//! │  │  (send_*)    │  │   Automat    │  │    Model     │          │
//! │  └──────┬───────┘  └──────────────┘  └──────────────┘          │
//! │         │                                                       │
//! │  ┌──────┴───────┐  ┌──────────────┐  ┌──────────────┐          │
//! │  │    Event     │  │   Harvest    │  │  Dead Letter │          │
//! │  │    Buffer    │──│  Scheduler   │──│   Handler    │          │
//! │  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘          │
//! │         │                 │                 │                   │
//! │  ┌──────┴───────┐  ┌──────┴──────┐  ┌──────┴──────┐            │
//! │  │   Offline    │  │  Collector  │  │   Offline   │            │
//! │  │   Storage    │  │   Client    │  │   Storage   │            │
//! │  └──────────────┘  └─────────────┘  └─────────────┘            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod agent;
pub mod attribute;
pub mod automat;
pub mod buffer;
pub mod config;
pub mod deadletter;
pub mod error;
pub mod event;
pub mod harvest;
pub mod http;
pub mod storage;
pub mod timesince;
pub mod tracker;

pub use agent::VideoAgent;
pub use attribute::{AttributeValue, EventAttributes};
pub use automat::{PlaybackAutomat, PlaybackState, Transition};
pub use buffer::{
    BufferCapacity, CrashSafeEventBuffer, DeadLetterEventBuffer, EventBuffer,
    PriorityEventBuffer, RecoveryStats,
};
pub use config::{VideoConfig, VideoConfigBuilder};
pub use deadletter::DeadLetterHandler;
pub use error::{Error, Result};
pub use event::{DefaultSizeEstimator, Priority, SizeEstimator, VideoEvent};
pub use harvest::{HarvestScheduler, SchedulerState};
pub use http::{CollectorClient, HttpClient};
pub use storage::OfflineStorage;
pub use timesince::{TimeSinceTable, TimestampHolder};
pub use tracker::{Tracker, TrackerBuilder, TrackerKind};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the analytics library with default configuration
pub fn init() {
    tracing::info!(version = VERSION, "MediaPulse Core initialized");
}
