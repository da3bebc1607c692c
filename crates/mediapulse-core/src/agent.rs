//! Application context
//!
//! [`VideoAgent`] is constructed once by the host application and passed by
//! reference wherever trackers are created; there is no process-wide
//! singleton. It owns the component graph (storage, crash-safe buffer,
//! dead-letter handler, collector client, harvest scheduler) and the
//! lifecycle operations the host forwards on background/foreground and
//! teardown.

use crate::buffer::{BufferCapacity, CrashSafeEventBuffer, EventBuffer};
use crate::config::VideoConfig;
use crate::deadletter::DeadLetterHandler;
use crate::error::Result;
use crate::harvest::HarvestScheduler;
use crate::http::{CollectorClient, HttpClient};
use crate::storage::OfflineStorage;
use crate::tracker::{TrackerBuilder, TrackerKind};
use std::sync::Arc;
use tracing::info;

/// Endpoint name under the offline storage root
const STORAGE_ENDPOINT: &str = "video-events";

/// One agent instance per application
pub struct VideoAgent {
    config: VideoConfig,
    buffer: Arc<CrashSafeEventBuffer>,
    dead_letter: Arc<DeadLetterHandler>,
    scheduler: Arc<HarvestScheduler>,
}

impl VideoAgent {
    /// Build the agent with the default collector client and start
    /// harvesting.
    pub async fn new(config: VideoConfig) -> Result<Self> {
        let http: Arc<dyn HttpClient> = Arc::new(CollectorClient::new(&config)?);
        Self::with_http_client(config, http).await
    }

    /// Build the agent against a custom transport (tests, proxies)
    pub async fn with_http_client(config: VideoConfig, http: Arc<dyn HttpClient>) -> Result<Self> {
        let storage = Arc::new(
            OfflineStorage::new(
                &config.storage_root(),
                STORAGE_ENDPOINT,
                config.max_offline_storage_mb,
            )
            .await?,
        );
        let capacity = BufferCapacity::for_device(config.is_tv, config.memory_optimized);
        let buffer = Arc::new(CrashSafeEventBuffer::new(capacity, storage).await?);
        let dead_letter = Arc::new(DeadLetterHandler::new(
            buffer.clone(),
            config.max_dead_letter_size,
            config.dead_letter_retry_interval(),
        ));
        let scheduler = Arc::new(HarvestScheduler::new(
            buffer.clone(),
            http,
            dead_letter.clone(),
            config.clone(),
        ));

        // Overflow triggers an out-of-cycle harvest instead of waiting for
        // the next tick.
        let overflow_scheduler = scheduler.clone();
        buffer.set_overflow_callback(Arc::new(move |priority| {
            let scheduler = overflow_scheduler.clone();
            tokio::spawn(async move {
                scheduler.force_harvest_priority(priority).await;
            });
        }));

        scheduler.start();
        info!(version = crate::VERSION, is_tv = config.is_tv, "Video agent initialized");

        Ok(Self {
            config,
            buffer,
            dead_letter,
            scheduler,
        })
    }

    pub fn config(&self) -> &VideoConfig {
        &self.config
    }

    /// Shared event buffer (for diagnostics)
    pub fn buffer(&self) -> Arc<CrashSafeEventBuffer> {
        self.buffer.clone()
    }

    /// Harvest scheduler (for diagnostics and manual flushes)
    pub fn scheduler(&self) -> Arc<HarvestScheduler> {
        self.scheduler.clone()
    }

    /// Builder for a content tracker feeding this agent's buffer
    pub fn content_tracker(&self) -> TrackerBuilder {
        TrackerBuilder::new(TrackerKind::Content, self.buffer.clone())
            .with_heartbeat_interval(self.config.heartbeat_interval_seconds)
    }

    /// Builder for an ad tracker feeding this agent's buffer
    pub fn ad_tracker(&self) -> TrackerBuilder {
        TrackerBuilder::new(TrackerKind::Ad, self.buffer.clone())
            .with_heartbeat_interval(self.config.heartbeat_interval_seconds)
    }

    /// App moved to background: flush what we can, then protect the rest
    pub async fn on_background(&self) {
        self.scheduler.force_harvest().await;
        self.scheduler.pause();
        self.dead_letter.emergency_backup().await;
        self.buffer.emergency_backup().await;
        info!("Agent backgrounded");
    }

    /// App returned to foreground; TV devices resume on extended intervals
    pub fn on_foreground(&self) {
        self.scheduler.resume(self.config.is_tv);
        info!("Agent foregrounded");
    }

    /// Final harvest and teardown. Events that cannot be transmitted end
    /// up in offline storage; nothing is silently dropped.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        self.dead_letter.emergency_backup().await;
        self.buffer.emergency_backup().await;
        info!("Video agent shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::event::{Priority, VideoEvent};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct MockHttpClient {
        fail: AtomicBool,
        sent_events: AtomicUsize,
    }

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn send_events(&self, events: &[VideoEvent], _priority: Priority) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::ConnectionTimeout);
            }
            self.sent_events.fetch_add(events.len(), Ordering::SeqCst);
            Ok(())
        }
    }

    fn config(root: &std::path::Path) -> VideoConfig {
        VideoConfig::builder()
            .with_application_token("token")
            .with_offline_storage_root(root.to_path_buf())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_tracker_events_reach_transport() {
        let tmp = tempfile::tempdir().unwrap();
        let http = Arc::new(MockHttpClient {
            fail: AtomicBool::new(false),
            sent_events: AtomicUsize::new(0),
        });
        let agent = VideoAgent::with_http_client(config(tmp.path()), http.clone())
            .await
            .unwrap();

        let tracker = agent.content_tracker().with_heartbeat_interval(0).build();
        tracker.send_request().await;
        tracker.send_start().await;

        agent.scheduler().force_harvest().await;
        assert_eq!(http.sent_events.load(Ordering::SeqCst), 2);
        agent.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_accounts_for_every_event() {
        let tmp = tempfile::tempdir().unwrap();
        let http = Arc::new(MockHttpClient {
            fail: AtomicBool::new(true),
            sent_events: AtomicUsize::new(0),
        });
        let agent = VideoAgent::with_http_client(config(tmp.path()), http.clone())
            .await
            .unwrap();

        let tracker = agent.content_tracker().with_heartbeat_interval(0).build();
        tracker.send_request().await;
        tracker.send_start().await;
        agent.shutdown().await;

        // Nothing in memory, everything accounted for on disk
        assert_eq!(agent.buffer().event_count().await, 0);
        assert!(agent.buffer().recovery_stats().await.backup_batch_count > 0);
    }

    #[tokio::test]
    async fn test_background_foreground_cycle() {
        let tmp = tempfile::tempdir().unwrap();
        let http = Arc::new(MockHttpClient {
            fail: AtomicBool::new(false),
            sent_events: AtomicUsize::new(0),
        });
        let agent = VideoAgent::with_http_client(config(tmp.path()), http.clone())
            .await
            .unwrap();

        agent.on_background().await;
        assert!(!agent.scheduler().is_running());
        agent.on_foreground();
        assert!(agent.scheduler().is_running());
        agent.shutdown().await;
    }
}
