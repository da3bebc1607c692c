//! MediaPulse SSAI - Server-Side Ad Insertion Tracking
//!
//! Detects ad breaks in server-side ad-inserted HLS streams and converts
//! playhead progress into ad telemetry events:
//! - Manifest cue detection (CUE-OUT/CUE-IN, discontinuities, MAP changes)
//! - Tracking-API metadata enrichment and reconciliation
//! - Quartile tracking (25%, 50%, 75%) per break and per pod
//! - Ad position detection (pre/mid/post for VOD)
//!
//! Events are emitted through a [`mediapulse_core::Tracker`] of the `Ad`
//! kind, so they share the core delivery pipeline with content events.

pub mod error;
pub mod manifest;
pub mod model;
pub mod schedule;
pub mod tracker;

pub use error::{Error, Result};
pub use manifest::{parse_media_playlist, ManifestAds};
pub use model::{
    AdBreak, AdPod, AdPosition, AdSource, TrackingAd, TrackingAvail, TrackingResponse,
};
pub use schedule::{quartiles_to_fire, AdSchedule};
pub use tracker::{SsaiOptions, SsaiTracker};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
