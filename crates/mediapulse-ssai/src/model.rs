//! Ad schedule entities and tracking-API models
//!
//! An [`AdBreak`] is a continuous period of ad content detected from HLS
//! CUE markers and/or the tracking API; it owns zero or more [`AdPod`]s
//! (individual creatives). A break with no pods is treated as a single
//! implicit pod for quartile purposes.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Minimum ad duration in seconds; shorter breaks are false positives
/// from zero-duration CUE markers and are discarded.
pub const MIN_AD_DURATION: f64 = 0.5;

/// Tolerance in seconds for matching ad times across sources
pub const AD_TIMING_TOLERANCE: f64 = 0.5;

/// Quartile progress fractions
pub const QUARTILE_Q1: f64 = 0.25;
pub const QUARTILE_Q2: f64 = 0.50;
pub const QUARTILE_Q3: f64 = 0.75;

/// Default live manifest poll interval
pub const DEFAULT_LIVE_MANIFEST_POLL: Duration = Duration::from_secs(5);

/// Default live tracking API poll interval
pub const DEFAULT_LIVE_TRACKING_POLL: Duration = Duration::from_secs(10);

/// Default tracking API request timeout
pub const DEFAULT_TRACKING_TIMEOUT: Duration = Duration::from_secs(5);

/// URL fragment identifying server-side ad-inserted streams
pub const SSAI_DOMAIN_PATTERN: &str = ".mediatailor.";

/// Ad position relative to content (VOD only; live is always Unknown)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdPosition {
    Pre,
    Mid,
    Post,
    Unknown,
}

impl AdPosition {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdPosition::Pre => "pre",
            AdPosition::Mid => "mid",
            AdPosition::Post => "post",
            AdPosition::Unknown => "unknown",
        }
    }
}

/// Where an ad break was detected from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdSource {
    /// CUE-OUT/CUE-IN tags in the manifest
    ManifestCue,
    /// Tracking API response only
    TrackingApi,
    /// Manifest cue confirmed and enriched by the tracking API
    Both,
}

impl AdSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdSource::ManifestCue => "manifest",
            AdSource::TrackingApi => "tracking",
            AdSource::Both => "both",
        }
    }
}

/// Fired-event flags for one break or pod; a one-way ratchet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuartileFlags {
    pub start: bool,
    pub q1: bool,
    pub q2: bool,
    pub q3: bool,
}

impl QuartileFlags {
    /// Latch a fired quartile; out-of-range values are ignored
    pub fn set_quartile(&mut self, quartile: u8) {
        match quartile {
            1 => self.q1 = true,
            2 => self.q2 = true,
            3 => self.q3 = true,
            _ => {}
        }
    }
}

/// A single ad creative within a break
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdPod {
    /// Start time in seconds on the content timeline
    pub start_time: f64,
    /// Duration in seconds
    pub duration: f64,
    /// End time in seconds (start + duration)
    pub end_time: f64,
    /// Creative title (tracking API)
    pub title: Option<String>,
    /// Creative ID (tracking API)
    pub creative_id: Option<String>,
    /// Start time reported by the tracking API, when it differs
    pub tracking_start_time: Option<f64>,
    /// Duration reported by the tracking API, when it differs
    pub tracking_duration: Option<f64>,
    /// EXT-X-MAP URI marking this pod's boundary
    pub map_url: Option<String>,
    pub fired: QuartileFlags,
}

impl AdPod {
    pub fn new(start_time: f64, duration: f64) -> Self {
        Self {
            start_time,
            duration,
            end_time: start_time + duration,
            title: None,
            creative_id: None,
            tracking_start_time: None,
            tracking_duration: None,
            map_url: None,
            fired: QuartileFlags::default(),
        }
    }

    pub fn contains(&self, t: f64) -> bool {
        t >= self.start_time && t < self.end_time
    }
}

/// A continuous ad insertion period on the content timeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdBreak {
    /// Identifier, derived from the start time (e.g. `avail-120.5`)
    pub break_id: String,
    /// Start time in seconds on the content timeline
    pub start_time: f64,
    /// Duration in seconds
    pub duration: f64,
    /// End time in seconds (start + duration)
    pub end_time: f64,
    /// Break title (tracking API)
    pub title: Option<String>,
    /// Creative ID (tracking API)
    pub creative_id: Option<String>,
    pub position: AdPosition,
    pub source: AdSource,
    /// Whether the tracking API confirmed this break
    pub confirmed_by_tracking: bool,
    /// AD_BREAK_START fired
    pub fired_break_start: bool,
    /// AD_BREAK_END fired
    pub fired_break_end: bool,
    /// AD_START and quartiles for a break with no pods
    pub fired: QuartileFlags,
    /// Individual creatives; empty means the break acts as a single pod
    pub pods: Vec<AdPod>,
}

impl AdBreak {
    pub fn new(start_time: f64, duration: f64, source: AdSource) -> Self {
        Self {
            break_id: format!("avail-{start_time:.1}"),
            start_time,
            duration,
            end_time: start_time + duration,
            title: None,
            creative_id: None,
            position: AdPosition::Unknown,
            source,
            confirmed_by_tracking: false,
            fired_break_start: false,
            fired_break_end: false,
            fired: QuartileFlags::default(),
            pods: Vec::new(),
        }
    }

    pub fn contains(&self, t: f64) -> bool {
        t >= self.start_time && t < self.end_time
    }

    /// Whether this break overlaps another on the timeline
    pub fn overlaps(&self, other: &AdBreak) -> bool {
        self.start_time < other.end_time && other.start_time < self.end_time
    }

    /// The pod active at `t`, if this break has explicit pods
    pub fn active_pod_index(&self, t: f64) -> Option<usize> {
        self.pods.iter().position(|p| p.contains(t))
    }
}

/// An individual ad within a tracking avail
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingAd {
    #[serde(default)]
    pub ad_id: String,
    #[serde(default)]
    pub ad_title: String,
    #[serde(default)]
    pub start_time_in_seconds: f64,
    #[serde(default)]
    pub duration_in_seconds: f64,
}

/// An avail (ad break) as reported by the tracking API
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingAvail {
    #[serde(default)]
    pub avail_id: String,
    #[serde(default)]
    pub start_time_in_seconds: f64,
    #[serde(default)]
    pub duration_in_seconds: f64,
    #[serde(default)]
    pub ads: Vec<TrackingAd>,
}

/// Root tracking API response
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingResponse {
    #[serde(default)]
    pub avails: Vec<TrackingAvail>,
}

impl TrackingResponse {
    /// Parse the tracking API JSON body
    pub fn parse(data: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}
