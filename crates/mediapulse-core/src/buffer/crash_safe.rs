//! Crash-safe event buffer
//!
//! Wraps the in-memory priority buffer with crash detection and offline
//! recovery. A session marker is written on init and cleared after the
//! first successful harvest; finding it on init means the previous session
//! ended uncleanly and any persisted backlog must be replayed. Recovery is
//! at-least-once: a surfaced batch is deleted from disk only after a later
//! successful harvest acknowledges it.

use super::{
    BufferCapacity, CapacityCallback, EventBuffer, OverflowCallback, PriorityEventBuffer,
};
use crate::error::Result;
use crate::event::{Priority, SizeEstimator, VideoEvent};
use crate::storage::OfflineStorage;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Batch files surfaced from storage per recovery step
const RECOVERY_READ_LIMIT: usize = 4;

/// Recovery status snapshot
#[derive(Debug, Clone)]
pub struct RecoveryStats {
    pub is_recovering: bool,
    /// Batch files still waiting on disk
    pub backup_batch_count: usize,
    pub recovery_reason: Option<String>,
}

struct RecoveryState {
    recovering: bool,
    reason: Option<String>,
    first_harvest_done: bool,
    /// Batches re-injected into memory, awaiting a successful harvest ack
    surfaced: Vec<String>,
}

/// Priority buffer with crash detection and offline recovery
pub struct CrashSafeEventBuffer {
    inner: PriorityEventBuffer,
    storage: Arc<OfflineStorage>,
    recovery: Mutex<RecoveryState>,
}

impl CrashSafeEventBuffer {
    /// Initialize, detecting whether the previous session ended uncleanly
    pub async fn new(capacity: BufferCapacity, storage: Arc<OfflineStorage>) -> Result<Self> {
        let unclean = storage.session_flag_exists().await;
        let backlog = storage.batch_count().await;
        let recovering = unclean || backlog > 0;
        let reason = if unclean {
            Some("previous session ended uncleanly".to_string())
        } else if backlog > 0 {
            Some("persisted backlog found".to_string())
        } else {
            None
        };
        if recovering {
            info!(backlog, reason = reason.as_deref().unwrap_or(""), "Entering recovery mode");
        }
        storage.set_session_flag().await?;

        Ok(Self {
            inner: PriorityEventBuffer::new(capacity),
            storage,
            recovery: Mutex::new(RecoveryState {
                recovering,
                reason,
                first_harvest_done: false,
                surfaced: Vec::new(),
            }),
        })
    }

    /// Flush every in-memory event to disk. Safe to call from a
    /// termination handler: errors are logged, never propagated.
    pub async fn emergency_backup(&self) {
        let events = self.inner.drain_all().await;
        if events.is_empty() {
            return;
        }
        match self.storage.persist_batch(&events).await {
            Ok(()) => {
                info!(count = events.len(), "Emergency backup persisted");
                let mut recovery = self.recovery.lock().await;
                recovery.recovering = true;
                recovery.reason.get_or_insert_with(|| "emergency backup".to_string());
            }
            Err(e) => warn!(error = %e, count = events.len(), "Emergency backup failed, events lost"),
        }
    }

    /// Persist events that exhausted their retries; recovery picks them up
    /// on the next successful harvest.
    pub async fn backup_failed_events(&self, events: Vec<VideoEvent>) {
        if events.is_empty() {
            return;
        }
        match self.storage.persist_batch(&events).await {
            Ok(()) => {
                let mut recovery = self.recovery.lock().await;
                recovery.recovering = true;
                recovery.reason.get_or_insert_with(|| "retries exhausted".to_string());
            }
            Err(e) => warn!(error = %e, count = events.len(), "Failed-event backup failed, events lost"),
        }
    }

    /// Current recovery status
    pub async fn recovery_stats(&self) -> RecoveryStats {
        let recovery = self.recovery.lock().await;
        RecoveryStats {
            is_recovering: recovery.recovering,
            backup_batch_count: self.storage.batch_count().await,
            recovery_reason: recovery.reason.clone(),
        }
    }
}

#[async_trait]
impl EventBuffer for CrashSafeEventBuffer {
    async fn add_event(&self, event: VideoEvent) {
        self.inner.add_event(event).await;
    }

    async fn poll_batch_by_priority(
        &self,
        max_size_bytes: usize,
        estimator: &dyn SizeEstimator,
        priority: Priority,
    ) -> Vec<VideoEvent> {
        self.inner
            .poll_batch_by_priority(max_size_bytes, estimator, priority)
            .await
    }

    async fn event_count(&self) -> usize {
        self.inner.event_count().await
    }

    async fn is_empty(&self) -> bool {
        self.inner.is_empty().await
    }

    async fn cleanup(&self) {
        self.inner.cleanup().await;
    }

    fn set_overflow_callback(&self, callback: OverflowCallback) {
        self.inner.set_overflow_callback(callback);
    }

    fn set_capacity_callback(&self, callback: CapacityCallback) {
        self.inner.set_capacity_callback(callback);
    }

    /// Acknowledge surfaced batches and step the recovery drain
    async fn on_successful_harvest(&self) {
        let mut recovery = self.recovery.lock().await;

        if !recovery.first_harvest_done {
            recovery.first_harvest_done = true;
            self.storage.clear_session_flag().await;
        }

        // Previously surfaced batches made it out; drop them from disk
        if !recovery.surfaced.is_empty() {
            let acked = std::mem::take(&mut recovery.surfaced);
            if let Err(e) = self.storage.remove_processed(&acked).await {
                warn!(error = %e, "Failed to ack recovered batches");
            }
        }

        if !recovery.recovering {
            return;
        }

        // Surface the next slice of backlog into the in-memory buffer
        match self.storage.read_unprocessed(RECOVERY_READ_LIMIT).await {
            Ok(batches) if batches.is_empty() => {
                info!("Recovery backlog drained");
                recovery.recovering = false;
                recovery.reason = None;
            }
            Ok(batches) => {
                let mut events = Vec::new();
                for batch in batches {
                    recovery.surfaced.push(batch.id);
                    events.extend(batch.events);
                }
                info!(count = events.len(), "Re-injecting recovered events");
                self.inner.push_front_all(events).await;
            }
            Err(e) => warn!(error = %e, "Recovery read failed"),
        }
    }
}
