//! Event buffering
//!
//! All buffer implementations share one contract and differ only in
//! durability behavior:
//! - [`PriorityEventBuffer`] - in-memory, two FIFO partitions (live and
//!   on-demand), overflow and capacity callbacks
//! - [`CrashSafeEventBuffer`] - wraps the priority buffer with crash
//!   detection and offline recovery
//! - [`DeadLetterEventBuffer`] - plain holding queue for failed events,
//!   managed directly by the dead-letter handler

mod crash_safe;

pub use crash_safe::{CrashSafeEventBuffer, RecoveryStats};

use crate::event::{Priority, SizeEstimator, VideoEvent};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Invoked once per high-water-mark crossing, per priority partition
pub type OverflowCallback = Arc<dyn Fn(Priority) + Send + Sync>;

/// Invoked once per configured fill-ratio threshold crossing
pub type CapacityCallback = Arc<dyn Fn(f64, Priority) + Send + Sync>;

/// Contract shared by all event buffer implementations
#[async_trait]
pub trait EventBuffer: Send + Sync {
    /// Add an event to the buffer
    async fn add_event(&self, event: VideoEvent);

    /// Poll a batch of events of one priority, greedily accumulated in
    /// insertion order until adding the next event would exceed
    /// `max_size_bytes`. An event is never split across batches. Polled
    /// events are removed from the buffer.
    async fn poll_batch_by_priority(
        &self,
        max_size_bytes: usize,
        estimator: &dyn SizeEstimator,
        priority: Priority,
    ) -> Vec<VideoEvent>;

    /// Total number of buffered events across partitions
    async fn event_count(&self) -> usize;

    /// Whether the buffer holds no events
    async fn is_empty(&self) -> bool;

    /// Release resources and drop buffered events
    async fn cleanup(&self);

    /// Register the overflow callback (optional capability)
    fn set_overflow_callback(&self, _callback: OverflowCallback) {}

    /// Register the capacity callback (optional capability)
    fn set_capacity_callback(&self, _callback: CapacityCallback) {}

    /// Called after a successful harvest; crash-safe implementations use
    /// this to acknowledge and drain recovery backlog.
    async fn on_successful_harvest(&self) {}
}

/// Fill ratio at which the overflow callback fires
const HIGH_WATER_RATIO: f64 = 0.8;

/// Per-partition capacity settings, sized by device class
#[derive(Debug, Clone)]
pub struct BufferCapacity {
    pub live_events: usize,
    pub ondemand_events: usize,
    /// Fill ratios reported through the capacity callback
    pub thresholds: Vec<f64>,
}

impl BufferCapacity {
    /// Device-aware defaults: TV devices buffer more, memory-optimized
    /// devices buffer half.
    pub fn for_device(is_tv: bool, memory_optimized: bool) -> Self {
        let (mut live, mut ondemand) = if is_tv { (3000, 1500) } else { (1500, 750) };
        if memory_optimized {
            live /= 2;
            ondemand /= 2;
        }
        Self {
            live_events: live,
            ondemand_events: ondemand,
            thresholds: vec![0.5, 0.75, 0.9],
        }
    }
}

impl Default for BufferCapacity {
    fn default() -> Self {
        Self::for_device(false, false)
    }
}

struct Partition {
    events: VecDeque<VideoEvent>,
    capacity: usize,
    overflow_fired: bool,
    thresholds_fired: Vec<bool>,
}

impl Partition {
    fn new(capacity: usize, threshold_count: usize) -> Self {
        Self {
            events: VecDeque::new(),
            capacity,
            overflow_fired: false,
            thresholds_fired: vec![false; threshold_count],
        }
    }

    fn high_water(&self) -> usize {
        ((self.capacity as f64) * HIGH_WATER_RATIO).ceil() as usize
    }

    fn fill_ratio(&self, len: usize) -> f64 {
        if self.capacity == 0 {
            return 1.0;
        }
        len as f64 / self.capacity as f64
    }

    /// Re-arm callbacks whose thresholds the partition dropped below
    fn rearm(&mut self, thresholds: &[f64]) {
        let len = self.events.len();
        if len < self.high_water() {
            self.overflow_fired = false;
        }
        for (i, t) in thresholds.iter().enumerate() {
            if self.fill_ratio(len) < *t {
                self.thresholds_fired[i] = false;
            }
        }
    }
}

struct Partitions {
    live: Partition,
    ondemand: Partition,
}

impl Partitions {
    fn get_mut(&mut self, priority: Priority) -> &mut Partition {
        match priority {
            Priority::Live => &mut self.live,
            Priority::OnDemand => &mut self.ondemand,
        }
    }
}

/// In-memory event buffer with independent live and on-demand partitions
///
/// All mutation is serialized through one internal lock; callbacks fire
/// with the lock released.
pub struct PriorityEventBuffer {
    partitions: Mutex<Partitions>,
    capacity: BufferCapacity,
    overflow_callback: StdMutex<Option<OverflowCallback>>,
    capacity_callback: StdMutex<Option<CapacityCallback>>,
}

impl PriorityEventBuffer {
    pub fn new(capacity: BufferCapacity) -> Self {
        let threshold_count = capacity.thresholds.len();
        Self {
            partitions: Mutex::new(Partitions {
                live: Partition::new(capacity.live_events, threshold_count),
                ondemand: Partition::new(capacity.ondemand_events, threshold_count),
            }),
            capacity,
            overflow_callback: StdMutex::new(None),
            capacity_callback: StdMutex::new(None),
        }
    }

    /// Remove and return every buffered event, both partitions, in
    /// insertion order per partition (live first).
    pub async fn drain_all(&self) -> Vec<VideoEvent> {
        let mut partitions = self.partitions.lock().await;
        let mut out: Vec<VideoEvent> = partitions.live.events.drain(..).collect();
        out.extend(partitions.ondemand.events.drain(..));
        partitions.live.rearm(&self.capacity.thresholds);
        partitions.ondemand.rearm(&self.capacity.thresholds);
        out
    }

    /// Re-inject recovered events ahead of fresh ones
    pub(crate) async fn push_front_all(&self, events: Vec<VideoEvent>) {
        let mut partitions = self.partitions.lock().await;
        for event in events.into_iter().rev() {
            partitions.get_mut(event.priority).events.push_front(event);
        }
    }
}

#[async_trait]
impl EventBuffer for PriorityEventBuffer {
    async fn add_event(&self, event: VideoEvent) {
        let priority = event.priority;
        let (fire_overflow, fire_thresholds) = {
            let mut partitions = self.partitions.lock().await;
            let partition = partitions.get_mut(priority);
            let projected = partition.events.len() + 1;

            let fire_overflow = projected >= partition.high_water() && !partition.overflow_fired;
            if fire_overflow {
                partition.overflow_fired = true;
            }

            let mut fire_thresholds = Vec::new();
            for (i, t) in self.capacity.thresholds.iter().enumerate() {
                if partition.fill_ratio(projected) >= *t && !partition.thresholds_fired[i] {
                    partition.thresholds_fired[i] = true;
                    fire_thresholds.push(*t);
                }
            }
            (fire_overflow, fire_thresholds)
        };

        // Callbacks run before the event is accepted so an overflow-driven
        // harvest can observe the buffer at its high-water mark.
        if fire_overflow {
            debug!(priority = %priority, "Buffer high-water mark crossed");
            let callback = self.overflow_callback.lock().map(|g| g.clone()).unwrap_or(None);
            if let Some(callback) = callback {
                callback(priority);
            }
        }
        if !fire_thresholds.is_empty() {
            let callback = self.capacity_callback.lock().map(|g| g.clone()).unwrap_or(None);
            if let Some(callback) = callback {
                for ratio in fire_thresholds {
                    callback(ratio, priority);
                }
            }
        }

        let mut partitions = self.partitions.lock().await;
        partitions.get_mut(priority).events.push_back(event);
    }

    async fn poll_batch_by_priority(
        &self,
        max_size_bytes: usize,
        estimator: &dyn SizeEstimator,
        priority: Priority,
    ) -> Vec<VideoEvent> {
        let mut partitions = self.partitions.lock().await;
        let partition = partitions.get_mut(priority);

        let mut batch = Vec::new();
        let mut batch_bytes = 0usize;
        while let Some(front) = partition.events.front() {
            let size = estimator.estimate(front);
            if batch_bytes + size > max_size_bytes {
                break;
            }
            batch_bytes += size;
            // Front checked above, pop cannot fail
            if let Some(event) = partition.events.pop_front() {
                batch.push(event);
            }
        }

        partition.rearm(&self.capacity.thresholds);
        batch
    }

    async fn event_count(&self) -> usize {
        let partitions = self.partitions.lock().await;
        partitions.live.events.len() + partitions.ondemand.events.len()
    }

    async fn is_empty(&self) -> bool {
        self.event_count().await == 0
    }

    async fn cleanup(&self) {
        let mut partitions = self.partitions.lock().await;
        partitions.live.events.clear();
        partitions.ondemand.events.clear();
        partitions.live.rearm(&self.capacity.thresholds);
        partitions.ondemand.rearm(&self.capacity.thresholds);
    }

    fn set_overflow_callback(&self, callback: OverflowCallback) {
        if let Ok(mut guard) = self.overflow_callback.lock() {
            *guard = Some(callback);
        }
    }

    fn set_capacity_callback(&self, callback: CapacityCallback) {
        if let Ok(mut guard) = self.capacity_callback.lock() {
            *guard = Some(callback);
        }
    }
}

/// Bounded store-and-forward queue for events awaiting retry
///
/// Drives no scheduler and fires no callbacks; the dead-letter handler
/// manages it directly.
pub struct DeadLetterEventBuffer {
    events: Mutex<VecDeque<VideoEvent>>,
    max_events: usize,
}

impl DeadLetterEventBuffer {
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            max_events,
        }
    }

    /// Number of additional events the queue can hold
    pub async fn remaining_capacity(&self) -> usize {
        let events = self.events.lock().await;
        self.max_events.saturating_sub(events.len())
    }
}

#[async_trait]
impl EventBuffer for DeadLetterEventBuffer {
    async fn add_event(&self, event: VideoEvent) {
        let mut events = self.events.lock().await;
        if events.len() >= self.max_events {
            // Caller is expected to check capacity first; dropping the
            // oldest keeps the queue bounded either way.
            warn!(max = self.max_events, "Dead letter queue full, dropping oldest");
            events.pop_front();
        }
        events.push_back(event);
    }

    async fn poll_batch_by_priority(
        &self,
        max_size_bytes: usize,
        estimator: &dyn SizeEstimator,
        priority: Priority,
    ) -> Vec<VideoEvent> {
        let mut events = self.events.lock().await;
        let mut batch = Vec::new();
        let mut batch_bytes = 0usize;
        let mut kept = VecDeque::new();
        while let Some(event) = events.pop_front() {
            if event.priority != priority {
                kept.push_back(event);
                continue;
            }
            let size = estimator.estimate(&event);
            if batch_bytes + size > max_size_bytes {
                kept.push_back(event);
                break;
            }
            batch_bytes += size;
            batch.push(event);
        }
        kept.extend(events.drain(..));
        *events = kept;
        batch
    }

    async fn event_count(&self) -> usize {
        self.events.lock().await.len()
    }

    async fn is_empty(&self) -> bool {
        self.events.lock().await.is_empty()
    }

    async fn cleanup(&self) {
        self.events.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{actions, DefaultSizeEstimator, EVENT_TYPE_VIDEO};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event(priority: Priority) -> VideoEvent {
        VideoEvent::new(EVENT_TYPE_VIDEO, actions::CONTENT_HEARTBEAT, HashMap::new(), priority)
    }

    fn tiny_capacity() -> BufferCapacity {
        BufferCapacity {
            live_events: 10,
            ondemand_events: 10,
            thresholds: vec![0.5],
        }
    }

    #[tokio::test]
    async fn test_fifo_within_partition() {
        let buffer = PriorityEventBuffer::new(BufferCapacity::default());
        for i in 0..3 {
            let mut e = event(Priority::Live);
            e.attributes.insert("seq".into(), crate::AttributeValue::Int(i));
            buffer.add_event(e).await;
        }
        let batch = buffer
            .poll_batch_by_priority(1 << 20, &DefaultSizeEstimator, Priority::Live)
            .await;
        let seqs: Vec<i64> = batch
            .iter()
            .map(|e| e.attributes["seq"].as_int().unwrap())
            .collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_partitions_independent() {
        let buffer = PriorityEventBuffer::new(BufferCapacity::default());
        buffer.add_event(event(Priority::Live)).await;
        buffer.add_event(event(Priority::OnDemand)).await;

        let live = buffer
            .poll_batch_by_priority(1 << 20, &DefaultSizeEstimator, Priority::Live)
            .await;
        assert_eq!(live.len(), 1);
        assert_eq!(buffer.event_count().await, 1);
    }

    #[tokio::test]
    async fn test_poll_respects_size_bound() {
        let buffer = PriorityEventBuffer::new(BufferCapacity::default());
        let estimator = DefaultSizeEstimator;
        let per_event = estimator.estimate(&event(Priority::Live));
        for _ in 0..5 {
            buffer.add_event(event(Priority::Live)).await;
        }

        let max = per_event * 2 + per_event / 2;
        let batch = buffer
            .poll_batch_by_priority(max, &estimator, Priority::Live)
            .await;
        assert_eq!(batch.len(), 2);
        let total: usize = batch.iter().map(|e| estimator.estimate(e)).sum();
        assert!(total <= max);

        // The rest is still buffered, in order
        assert_eq!(buffer.event_count().await, 3);
    }

    #[tokio::test]
    async fn test_overflow_fires_once_per_crossing() {
        let buffer = PriorityEventBuffer::new(tiny_capacity());
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        buffer.set_overflow_callback(Arc::new(move |_| {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        }));

        // High water at 8 of 10; cross it and keep adding
        for _ in 0..10 {
            buffer.add_event(event(Priority::Live)).await;
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Draining re-arms; crossing again fires again
        buffer
            .poll_batch_by_priority(1 << 20, &DefaultSizeEstimator, Priority::Live)
            .await;
        for _ in 0..10 {
            buffer.add_event(event(Priority::Live)).await;
        }
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_capacity_thresholds_fire_once() {
        let buffer = PriorityEventBuffer::new(tiny_capacity());
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        buffer.set_capacity_callback(Arc::new(move |_, _| {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        }));

        for _ in 0..10 {
            buffer.add_event(event(Priority::OnDemand)).await;
        }
        // Single 0.5 threshold, crossed once
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dead_letter_priority_filter() {
        let buffer = DeadLetterEventBuffer::new(100);
        buffer.add_event(event(Priority::Live)).await;
        buffer.add_event(event(Priority::OnDemand)).await;
        buffer.add_event(event(Priority::Live)).await;

        let live = buffer
            .poll_batch_by_priority(1 << 20, &DefaultSizeEstimator, Priority::Live)
            .await;
        assert_eq!(live.len(), 2);
        assert_eq!(buffer.event_count().await, 1);
    }

    #[tokio::test]
    async fn test_dead_letter_bounded() {
        let buffer = DeadLetterEventBuffer::new(2);
        for _ in 0..4 {
            buffer.add_event(event(Priority::Live)).await;
        }
        assert_eq!(buffer.event_count().await, 2);
        assert_eq!(buffer.remaining_capacity().await, 0);
    }
}
