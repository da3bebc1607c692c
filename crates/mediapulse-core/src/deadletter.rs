//! Dead-letter handling for failed event batches
//!
//! A failed batch first goes to a bounded in-memory retry queue and is
//! retried on a later harvest tick of the same priority. Batches that do
//! not fit the queue, exhaust their retry budget, or are caught by an app
//! termination go to offline storage through the crash-safe buffer.

use crate::buffer::{CrashSafeEventBuffer, DeadLetterEventBuffer, EventBuffer};
use crate::event::{Priority, VideoEvent};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Retries before a batch is written off to offline storage
const MAX_RETRIES: u32 = 3;

/// Bookkeeping for one failed batch held in the retry queue
#[derive(Debug, Clone)]
struct RecordMeta {
    priority: Priority,
    count: usize,
    retry_count: u32,
    next_retry_at_ms: i64,
}

/// A batch handed back to the scheduler for one retry attempt
pub struct RetryBatch {
    pub events: Vec<VideoEvent>,
    pub priority: Priority,
    pub retry_count: u32,
}

/// Routes failed batches between the in-memory retry queue and disk
pub struct DeadLetterHandler {
    queue: DeadLetterEventBuffer,
    records: Mutex<VecDeque<RecordMeta>>,
    crash_safe: Arc<CrashSafeEventBuffer>,
    retry_interval: Duration,
}

impl DeadLetterHandler {
    pub fn new(
        crash_safe: Arc<CrashSafeEventBuffer>,
        max_queue_events: usize,
        retry_interval: Duration,
    ) -> Self {
        Self {
            queue: DeadLetterEventBuffer::new(max_queue_events),
            records: Mutex::new(VecDeque::new()),
            crash_safe,
            retry_interval,
        }
    }

    /// Queue a failed batch for retry, or persist it if the queue is full
    pub async fn handle_failed_events(&self, events: Vec<VideoEvent>, priority: Priority) {
        if events.is_empty() {
            return;
        }
        if self.queue.remaining_capacity().await < events.len() {
            warn!(
                count = events.len(),
                priority = %priority,
                "Retry queue full, backing up failed events to disk"
            );
            self.crash_safe.backup_failed_events(events).await;
            return;
        }

        self.enqueue(events, priority, 0).await;
    }

    /// First retry-eligible batch of `priority`, if any
    pub async fn take_eligible(&self, priority: Priority, now_ms: i64) -> Option<RetryBatch> {
        let meta = {
            let mut records = self.records.lock().await;
            let pos = records.iter().position(|r| r.priority == priority)?;
            if records[pos].next_retry_at_ms > now_ms {
                return None;
            }
            records.remove(pos)?
        };

        let events = self.queue.take_events(priority, meta.count).await;
        debug!(
            count = events.len(),
            retry = meta.retry_count,
            priority = %priority,
            "Retrying dead-letter batch"
        );
        Some(RetryBatch {
            events,
            priority,
            retry_count: meta.retry_count,
        })
    }

    /// Put a batch back after a failed retry; exhausting the budget sends
    /// it to offline storage instead.
    pub async fn reoffer(&self, batch: RetryBatch) {
        let retry_count = batch.retry_count + 1;
        if retry_count >= MAX_RETRIES {
            warn!(
                count = batch.events.len(),
                priority = %batch.priority,
                "Retry budget exhausted, backing up to disk"
            );
            self.crash_safe.backup_failed_events(batch.events).await;
            return;
        }
        self.enqueue(batch.events, batch.priority, retry_count).await;
    }

    /// Flush the entire retry queue to offline storage. Called from the
    /// background/terminate path; never fails toward the caller.
    pub async fn emergency_backup(&self) {
        let mut all = Vec::new();
        {
            let mut records = self.records.lock().await;
            records.clear();
        }
        for priority in Priority::ALL {
            all.extend(self.queue.take_events(priority, usize::MAX).await);
        }
        if !all.is_empty() {
            self.crash_safe.backup_failed_events(all).await;
        }
    }

    /// Events currently waiting in the in-memory retry queue
    pub async fn queue_len(&self) -> usize {
        self.queue.event_count().await
    }

    async fn enqueue(&self, events: Vec<VideoEvent>, priority: Priority, retry_count: u32) {
        let meta = RecordMeta {
            priority,
            count: events.len(),
            retry_count,
            next_retry_at_ms: chrono::Utc::now().timestamp_millis()
                + self.retry_interval.as_millis() as i64,
        };
        {
            let mut records = self.records.lock().await;
            records.push_back(meta);
        }
        for event in events {
            self.queue.add_event(event).await;
        }
    }
}

impl DeadLetterEventBuffer {
    /// Remove up to `count` events of `priority`, preserving order
    pub(crate) async fn take_events(&self, priority: Priority, count: usize) -> Vec<VideoEvent> {
        struct Unbounded;
        impl crate::event::SizeEstimator for Unbounded {
            fn estimate(&self, _event: &VideoEvent) -> usize {
                0
            }
        }
        // Zero-cost estimator: the poll is bounded by count below
        let mut events = self.poll_batch_by_priority(usize::MAX, &Unbounded, priority).await;
        if events.len() > count {
            let rest = events.split_off(count);
            for event in rest {
                self.add_event(event).await;
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferCapacity;
    use crate::event::{actions, EVENT_TYPE_VIDEO};
    use crate::storage::OfflineStorage;
    use std::collections::HashMap;

    fn events(n: usize, priority: Priority) -> Vec<VideoEvent> {
        (0..n)
            .map(|i| {
                let mut attrs = HashMap::new();
                attrs.insert("seq".to_string(), crate::AttributeValue::Int(i as i64));
                VideoEvent::new(EVENT_TYPE_VIDEO, actions::CONTENT_HEARTBEAT, attrs, priority)
            })
            .collect()
    }

    async fn handler(dir: &std::path::Path, max_queue: usize) -> (DeadLetterHandler, Arc<CrashSafeEventBuffer>) {
        let storage = Arc::new(OfflineStorage::new(dir, "video-events", 10).await.unwrap());
        let crash_safe = Arc::new(
            CrashSafeEventBuffer::new(BufferCapacity::default(), storage)
                .await
                .unwrap(),
        );
        (
            DeadLetterHandler::new(crash_safe.clone(), max_queue, Duration::ZERO),
            crash_safe,
        )
    }

    #[tokio::test]
    async fn test_failed_events_wait_for_retry() {
        let tmp = tempfile::tempdir().unwrap();
        let (handler, _) = handler(tmp.path(), 100).await;

        handler
            .handle_failed_events(events(3, Priority::Live), Priority::Live)
            .await;
        assert_eq!(handler.queue_len().await, 3);

        let now = chrono::Utc::now().timestamp_millis();
        let batch = handler.take_eligible(Priority::Live, now).await.unwrap();
        assert_eq!(batch.events.len(), 3);
        assert_eq!(batch.retry_count, 0);
        assert_eq!(handler.queue_len().await, 0);
    }

    #[tokio::test]
    async fn test_priority_isolation() {
        let tmp = tempfile::tempdir().unwrap();
        let (handler, _) = handler(tmp.path(), 100).await;

        handler
            .handle_failed_events(events(2, Priority::OnDemand), Priority::OnDemand)
            .await;
        let now = chrono::Utc::now().timestamp_millis();
        assert!(handler.take_eligible(Priority::Live, now).await.is_none());
        assert!(handler.take_eligible(Priority::OnDemand, now).await.is_some());
    }

    #[tokio::test]
    async fn test_full_queue_goes_to_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let (handler, crash_safe) = handler(tmp.path(), 2).await;

        handler
            .handle_failed_events(events(5, Priority::Live), Priority::Live)
            .await;
        assert_eq!(handler.queue_len().await, 0);
        assert!(crash_safe.recovery_stats().await.is_recovering);
        assert_eq!(crash_safe.recovery_stats().await.backup_batch_count, 1);
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion() {
        let tmp = tempfile::tempdir().unwrap();
        let (handler, crash_safe) = handler(tmp.path(), 100).await;

        handler
            .handle_failed_events(events(1, Priority::Live), Priority::Live)
            .await;
        let now = chrono::Utc::now().timestamp_millis() + 10_000;
        for _ in 0..MAX_RETRIES {
            if let Some(batch) = handler.take_eligible(Priority::Live, now).await {
                handler.reoffer(batch).await;
            }
        }
        // Third reoffer exhausted the budget
        assert_eq!(handler.queue_len().await, 0);
        assert!(crash_safe.recovery_stats().await.is_recovering);
    }

    #[tokio::test]
    async fn test_emergency_backup_flushes_queue() {
        let tmp = tempfile::tempdir().unwrap();
        let (handler, crash_safe) = handler(tmp.path(), 100).await;

        handler
            .handle_failed_events(events(2, Priority::Live), Priority::Live)
            .await;
        handler
            .handle_failed_events(events(2, Priority::OnDemand), Priority::OnDemand)
            .await;
        handler.emergency_backup().await;

        assert_eq!(handler.queue_len().await, 0);
        assert_eq!(crash_safe.recovery_stats().await.backup_batch_count, 1);
    }
}
