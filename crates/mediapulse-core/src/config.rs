//! Agent configuration
//!
//! Built through [`VideoConfigBuilder`]; `build()` is the only place the
//! library reports errors synchronously. Everything after initialization
//! degrades to reduced telemetry fidelity instead of failing the host app.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Harvest cycle bounds (seconds)
const HARVEST_CYCLE_RANGE: (u64, u64) = (5, 300);
/// Live harvest cycle bounds (seconds)
const LIVE_HARVEST_CYCLE_RANGE: (u64, u64) = (1, 60);
/// Regular batch size bounds (bytes)
const REGULAR_BATCH_RANGE: (usize, usize) = (1024, 1024 * 1024);
/// Live batch size bounds (bytes)
const LIVE_BATCH_RANGE: (usize, usize) = (512, 512 * 1024);
/// Dead letter queue bounds (events)
const DEAD_LETTER_RANGE: (usize, usize) = (10, 1000);

/// Interval multiplier applied by `resume(extended)` on TV devices
const EXTENDED_INTERVAL_FACTOR: u32 = 3;

/// Immutable agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    /// Ingest license token (required)
    pub application_token: String,
    /// Collector region, used to derive the endpoint
    pub region: String,
    /// Explicit collector endpoint; overrides the region-derived one
    pub collector_address: Option<Url>,
    /// On-demand harvest period in seconds
    pub harvest_cycle_seconds: u64,
    /// Live harvest period in seconds
    pub live_harvest_cycle_seconds: u64,
    /// Max batch bytes per on-demand harvest
    pub regular_batch_size_bytes: usize,
    /// Max batch bytes per live harvest
    pub live_batch_size_bytes: usize,
    /// Max events held in the dead-letter retry queue
    pub max_dead_letter_size: usize,
    /// Offline storage bound in megabytes
    pub max_offline_storage_mb: u64,
    /// Root directory for offline storage (temp dir when unset)
    pub offline_storage_root: Option<PathBuf>,
    /// Halve buffer capacities for constrained devices
    pub memory_optimized: bool,
    /// TV device: larger buffers, longer extended intervals
    pub is_tv: bool,
    /// Verbose agent logging
    pub debug_logging_enabled: bool,
    /// Harvest transmission timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Heartbeat period in seconds; 0 disables heartbeats
    pub heartbeat_interval_seconds: u64,
}

impl VideoConfig {
    pub fn builder() -> VideoConfigBuilder {
        VideoConfigBuilder::default()
    }

    /// Batch size bound for one priority class
    pub fn batch_size_bytes(&self, live: bool) -> usize {
        if live {
            self.live_batch_size_bytes
        } else {
            self.regular_batch_size_bytes
        }
    }

    /// Harvest period for one priority class
    pub fn harvest_interval(&self, live: bool) -> Duration {
        if live {
            Duration::from_secs(self.live_harvest_cycle_seconds)
        } else {
            Duration::from_secs(self.harvest_cycle_seconds)
        }
    }

    /// Harvest period under extended (background/TV) scheduling
    pub fn extended_harvest_interval(&self, live: bool) -> Duration {
        self.harvest_interval(live) * EXTENDED_INTERVAL_FACTOR
    }

    /// Dead-letter retry backoff, tuned per device class
    pub fn dead_letter_retry_interval(&self) -> Duration {
        if self.is_tv {
            Duration::from_secs(60)
        } else {
            Duration::from_secs(30)
        }
    }

    /// Offline storage root, defaulting under the system temp dir
    pub fn storage_root(&self) -> PathBuf {
        self.offline_storage_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("mediapulse-offline"))
    }
}

/// Builder for [`VideoConfig`]
#[derive(Debug, Clone, Default)]
pub struct VideoConfigBuilder {
    application_token: Option<String>,
    region: Option<String>,
    collector_address: Option<Url>,
    harvest_cycle_seconds: Option<u64>,
    live_harvest_cycle_seconds: Option<u64>,
    regular_batch_size_bytes: Option<usize>,
    live_batch_size_bytes: Option<usize>,
    max_dead_letter_size: Option<usize>,
    max_offline_storage_mb: Option<u64>,
    offline_storage_root: Option<PathBuf>,
    memory_optimized: bool,
    is_tv: bool,
    debug_logging_enabled: bool,
    request_timeout_ms: Option<u64>,
    heartbeat_interval_seconds: Option<u64>,
}

impl VideoConfigBuilder {
    pub fn with_application_token(mut self, token: impl Into<String>) -> Self {
        self.application_token = Some(token.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_collector_address(mut self, url: Url) -> Self {
        self.collector_address = Some(url);
        self
    }

    pub fn with_harvest_cycle(mut self, seconds: u64) -> Self {
        self.harvest_cycle_seconds = Some(seconds);
        self
    }

    pub fn with_live_harvest_cycle(mut self, seconds: u64) -> Self {
        self.live_harvest_cycle_seconds = Some(seconds);
        self
    }

    pub fn with_regular_batch_size(mut self, bytes: usize) -> Self {
        self.regular_batch_size_bytes = Some(bytes);
        self
    }

    pub fn with_live_batch_size(mut self, bytes: usize) -> Self {
        self.live_batch_size_bytes = Some(bytes);
        self
    }

    pub fn with_max_dead_letter_size(mut self, events: usize) -> Self {
        self.max_dead_letter_size = Some(events);
        self
    }

    pub fn with_max_offline_storage_mb(mut self, megabytes: u64) -> Self {
        self.max_offline_storage_mb = Some(megabytes);
        self
    }

    pub fn with_offline_storage_root(mut self, root: PathBuf) -> Self {
        self.offline_storage_root = Some(root);
        self
    }

    pub fn with_memory_optimization(mut self, enabled: bool) -> Self {
        self.memory_optimized = enabled;
        self
    }

    pub fn for_tv(mut self, is_tv: bool) -> Self {
        self.is_tv = is_tv;
        self
    }

    pub fn with_debug_logging(mut self, enabled: bool) -> Self {
        self.debug_logging_enabled = enabled;
        self
    }

    pub fn with_request_timeout_ms(mut self, millis: u64) -> Self {
        self.request_timeout_ms = Some(millis);
        self
    }

    pub fn with_heartbeat_interval(mut self, seconds: u64) -> Self {
        self.heartbeat_interval_seconds = Some(seconds);
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> Result<VideoConfig> {
        let application_token = self
            .application_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::InvalidConfig("application token is required".to_string()))?;

        let harvest_cycle_seconds = self.harvest_cycle_seconds.unwrap_or(60);
        check_range("harvestCycleSeconds", harvest_cycle_seconds, HARVEST_CYCLE_RANGE)?;

        let live_harvest_cycle_seconds = self.live_harvest_cycle_seconds.unwrap_or(10);
        check_range(
            "liveHarvestCycleSeconds",
            live_harvest_cycle_seconds,
            LIVE_HARVEST_CYCLE_RANGE,
        )?;

        let regular_batch_size_bytes = self.regular_batch_size_bytes.unwrap_or(64 * 1024);
        check_range(
            "regularBatchSizeBytes",
            regular_batch_size_bytes,
            REGULAR_BATCH_RANGE,
        )?;

        let live_batch_size_bytes = self.live_batch_size_bytes.unwrap_or(16 * 1024);
        check_range("liveBatchSizeBytes", live_batch_size_bytes, LIVE_BATCH_RANGE)?;

        let max_dead_letter_size = self.max_dead_letter_size.unwrap_or(100);
        check_range("maxDeadLetterSize", max_dead_letter_size, DEAD_LETTER_RANGE)?;

        Ok(VideoConfig {
            application_token,
            region: self.region.unwrap_or_else(|| "US".to_string()),
            collector_address: self.collector_address,
            harvest_cycle_seconds,
            live_harvest_cycle_seconds,
            regular_batch_size_bytes,
            live_batch_size_bytes,
            max_dead_letter_size,
            max_offline_storage_mb: self.max_offline_storage_mb.unwrap_or(10),
            offline_storage_root: self.offline_storage_root,
            memory_optimized: self.memory_optimized,
            is_tv: self.is_tv,
            debug_logging_enabled: self.debug_logging_enabled,
            request_timeout_ms: self.request_timeout_ms.unwrap_or(8_000),
            heartbeat_interval_seconds: self.heartbeat_interval_seconds.unwrap_or(30),
        })
    }
}

fn check_range<T: PartialOrd + std::fmt::Display + Copy>(
    name: &str,
    value: T,
    (min, max): (T, T),
) -> Result<()> {
    if value < min || value > max {
        return Err(Error::InvalidConfig(format!(
            "{name} must be in [{min}, {max}], got {value}"
        )));
    }
    Ok(())
}
