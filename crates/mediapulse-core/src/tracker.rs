//! Playback trackers
//!
//! One concrete [`Tracker`] type covers content and ad tracking; the kind
//! selects `CONTENT_*` or `AD_*` action names. Player adapters inject
//! attribute suppliers (closures queried immediately before each emit) and
//! call the `send_*` surface; the state machine decides which sends are
//! legal, which is how duplicate player callbacks are filtered out.

use crate::attribute::{AttributeValue, EventAttributes};
use crate::automat::{PlaybackAutomat, PlaybackState, Transition};
use crate::buffer::EventBuffer;
use crate::event::{actions, Priority, VideoEvent, EVENT_TYPE_CUSTOM, EVENT_TYPE_VIDEO};
use crate::timesince::TimeSinceTable;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Content or ad tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerKind {
    Content,
    Ad,
}

/// Attribute getter queried right before each emit; `None` omits the
/// attribute from the event.
pub type AttributeSupplier = Box<dyn Fn() -> Option<AttributeValue> + Send + Sync>;

/// Builder for [`Tracker`]
pub struct TrackerBuilder {
    kind: TrackerKind,
    buffer: Arc<dyn EventBuffer>,
    live: bool,
    heartbeat_interval: Duration,
    suppliers: HashMap<String, AttributeSupplier>,
}

impl TrackerBuilder {
    pub fn new(kind: TrackerKind, buffer: Arc<dyn EventBuffer>) -> Self {
        Self {
            kind,
            buffer,
            live: false,
            heartbeat_interval: Duration::from_secs(30),
            suppliers: HashMap::new(),
        }
    }

    /// Mark the tracked stream as live (routes events to the live
    /// harvest partition)
    pub fn live(mut self, live: bool) -> Self {
        self.live = live;
        self
    }

    /// Heartbeat period in seconds; minimum 1, 0 disables heartbeats
    pub fn with_heartbeat_interval(mut self, seconds: u64) -> Self {
        self.heartbeat_interval = if seconds == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(seconds.max(1))
        };
        self
    }

    /// Register a named attribute getter (e.g. `contentBitrate`)
    pub fn with_attribute_supplier(
        mut self,
        name: impl Into<String>,
        supplier: impl Fn() -> Option<AttributeValue> + Send + Sync + 'static,
    ) -> Self {
        self.suppliers.insert(name.into(), Box::new(supplier));
        self
    }

    pub fn build(self) -> Arc<Tracker> {
        let time_since = match self.kind {
            TrackerKind::Content => TimeSinceTable::for_content(),
            TrackerKind::Ad => TimeSinceTable::for_ads(),
        };
        Arc::new(Tracker {
            id: Uuid::new_v4(),
            kind: self.kind,
            live: AtomicBool::new(self.live),
            buffer: self.buffer,
            automat: Mutex::new(PlaybackAutomat::new()),
            attributes: Mutex::new(EventAttributes::new()),
            time_since: Mutex::new(time_since),
            suppliers: self.suppliers,
            heartbeat_interval: StdMutex::new(self.heartbeat_interval),
            heartbeat_task: StdMutex::new(None),
            num_errors: AtomicU32::new(0),
        })
    }
}

/// A playback tracker for one content or ad entity
pub struct Tracker {
    id: Uuid,
    kind: TrackerKind,
    live: AtomicBool,
    buffer: Arc<dyn EventBuffer>,
    automat: Mutex<PlaybackAutomat>,
    attributes: Mutex<EventAttributes>,
    time_since: Mutex<TimeSinceTable>,
    suppliers: HashMap<String, AttributeSupplier>,
    heartbeat_interval: StdMutex<Duration>,
    heartbeat_task: StdMutex<Option<JoinHandle<()>>>,
    num_errors: AtomicU32,
}

impl Tracker {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> TrackerKind {
        self.kind
    }

    pub fn is_ad(&self) -> bool {
        self.kind == TrackerKind::Ad
    }

    /// Current playback state
    pub async fn state(&self) -> PlaybackState {
        self.automat.lock().await.state()
    }

    pub fn set_live(&self, live: bool) {
        self.live.store(live, Ordering::SeqCst);
    }

    fn priority(&self) -> Priority {
        if self.live.load(Ordering::SeqCst) {
            Priority::Live
        } else {
            Priority::OnDemand
        }
    }

    /// Set a tracker-global attribute, optionally scoped by action filter
    pub async fn set_attribute(
        &self,
        key: impl Into<String>,
        value: AttributeValue,
        filter: Option<&str>,
    ) {
        self.attributes.lock().await.set(key, value, filter);
    }

    pub async fn set_user_id(&self, user_id: impl Into<String>) {
        self.attributes.lock().await.set_user_id(user_id);
    }

    /// Override a time-since timestamp for historic replay
    pub async fn set_external_timestamp(&self, action: &str, millis: i64) {
        self.time_since.lock().await.set_external(action, millis);
    }

    fn action_name(&self, content: &'static str, ad: &'static str) -> &'static str {
        match self.kind {
            TrackerKind::Content => content,
            TrackerKind::Ad => ad,
        }
    }

    async fn emit(
        &self,
        event_type: &str,
        action: &str,
        extra: Option<HashMap<String, AttributeValue>>,
    ) {
        // Supplier values first; tracker-global, filtered and per-call
        // attributes override them in that order.
        let mut attrs: HashMap<String, AttributeValue> = HashMap::new();
        for (name, supplier) in &self.suppliers {
            if let Some(value) = supplier() {
                attrs.insert(name.clone(), value);
            }
        }
        attrs.insert("trackerId".to_string(), AttributeValue::String(self.id.to_string()));
        attrs.insert(
            "isAd".to_string(),
            AttributeValue::Int(if self.is_ad() { 1 } else { 0 }),
        );
        attrs.extend(self.attributes.lock().await.generate(action, extra.as_ref()));

        let now_ms = chrono::Utc::now().timestamp_millis();
        self.time_since.lock().await.on_action(action, now_ms, &mut attrs);

        let event = VideoEvent::with_timestamp(event_type, action, attrs, self.priority(), now_ms);
        debug!(action = %action, tracker = %self.id, "Event emitted");
        self.buffer.add_event(event).await;
    }

    // ---- Lifecycle events -------------------------------------------------

    pub async fn send_tracker_ready(&self) {
        self.emit(EVENT_TYPE_VIDEO, actions::TRACKER_READY, None).await;
    }

    pub async fn send_player_ready(&self) {
        self.emit(EVENT_TYPE_VIDEO, actions::PLAYER_READY, None).await;
    }

    pub async fn send_request(self: &Arc<Self>) {
        let allowed = self.automat.lock().await.transition(Transition::ClickPlay);
        if allowed {
            self.emit(
                EVENT_TYPE_VIDEO,
                self.action_name(actions::CONTENT_REQUEST, actions::AD_REQUEST),
                None,
            )
            .await;
            self.start_heartbeat();
        }
    }

    pub async fn send_start(&self) {
        let allowed = self.automat.lock().await.transition(Transition::FrameShown);
        if allowed {
            self.emit(
                EVENT_TYPE_VIDEO,
                self.action_name(actions::CONTENT_START, actions::AD_START),
                None,
            )
            .await;
        }
    }

    pub async fn send_pause(&self) {
        let allowed = self.automat.lock().await.transition(Transition::ClickPause);
        if allowed {
            self.emit(
                EVENT_TYPE_VIDEO,
                self.action_name(actions::CONTENT_PAUSE, actions::AD_PAUSE),
                None,
            )
            .await;
        }
    }

    pub async fn send_resume(&self) {
        let allowed = self.automat.lock().await.transition(Transition::ClickPlay);
        if allowed {
            self.emit(
                EVENT_TYPE_VIDEO,
                self.action_name(actions::CONTENT_RESUME, actions::AD_RESUME),
                None,
            )
            .await;
        }
    }

    /// End is not gated: it always emits, returns the machine to Stopped
    /// and clears the transient-state stack.
    pub async fn send_end(&self) {
        self.emit(
            EVENT_TYPE_VIDEO,
            self.action_name(actions::CONTENT_END, actions::AD_END),
            None,
        )
        .await;
        self.automat.lock().await.end();
        self.stop_heartbeat();
    }

    pub async fn send_seek_start(&self) {
        self.emit(
            EVENT_TYPE_VIDEO,
            self.action_name(actions::CONTENT_SEEK_START, actions::AD_SEEK_START),
            None,
        )
        .await;
        self.automat.lock().await.interrupt(PlaybackState::Seeking);
    }

    pub async fn send_seek_end(&self) {
        let allowed = self
            .automat
            .lock()
            .await
            .transition(Transition::EndDraggingSlider);
        if allowed {
            self.emit(
                EVENT_TYPE_VIDEO,
                self.action_name(actions::CONTENT_SEEK_END, actions::AD_SEEK_END),
                None,
            )
            .await;
        }
    }

    pub async fn send_buffer_start(&self) {
        self.emit(
            EVENT_TYPE_VIDEO,
            self.action_name(actions::CONTENT_BUFFER_START, actions::AD_BUFFER_START),
            None,
        )
        .await;
        self.automat.lock().await.interrupt(PlaybackState::Buffering);
    }

    pub async fn send_buffer_end(&self) {
        let allowed = self.automat.lock().await.transition(Transition::EndBuffering);
        if allowed {
            self.emit(
                EVENT_TYPE_VIDEO,
                self.action_name(actions::CONTENT_BUFFER_END, actions::AD_BUFFER_END),
                None,
            )
            .await;
        }
    }

    pub async fn send_heartbeat(&self) {
        self.emit(
            EVENT_TYPE_VIDEO,
            self.action_name(actions::CONTENT_HEARTBEAT, actions::AD_HEARTBEAT),
            None,
        )
        .await;
    }

    pub async fn send_rendition_change(&self) {
        self.emit(
            EVENT_TYPE_VIDEO,
            self.action_name(actions::CONTENT_RENDITION_CHANGE, actions::AD_RENDITION_CHANGE),
            None,
        )
        .await;
    }

    pub async fn send_error(&self, message: &str) {
        let errors = self.num_errors.fetch_add(1, Ordering::SeqCst) + 1;
        let mut extra = HashMap::new();
        extra.insert(
            "errorMessage".to_string(),
            AttributeValue::String(message.to_string()),
        );
        extra.insert("numErrors".to_string(), AttributeValue::Int(errors as i64));
        self.emit(
            EVENT_TYPE_VIDEO,
            self.action_name(actions::CONTENT_ERROR, actions::AD_ERROR),
            Some(extra),
        )
        .await;
    }

    /// Emit a custom action; bypasses the state machine
    pub async fn send_custom_action(
        &self,
        name: &str,
        attributes: HashMap<String, AttributeValue>,
    ) {
        self.emit(EVENT_TYPE_CUSTOM, name, Some(attributes)).await;
    }

    // ---- Ad break events (ad trackers only) -------------------------------

    pub async fn send_ad_break_start(&self, attributes: HashMap<String, AttributeValue>) {
        if self.guard_ad("AD_BREAK_START") {
            self.emit(EVENT_TYPE_VIDEO, actions::AD_BREAK_START, Some(attributes))
                .await;
        }
    }

    pub async fn send_ad_break_end(&self, attributes: HashMap<String, AttributeValue>) {
        if self.guard_ad("AD_BREAK_END") {
            self.emit(EVENT_TYPE_VIDEO, actions::AD_BREAK_END, Some(attributes))
                .await;
        }
    }

    pub async fn send_ad_start(&self, attributes: HashMap<String, AttributeValue>) {
        if self.guard_ad("AD_START") {
            self.emit(EVENT_TYPE_VIDEO, actions::AD_START, Some(attributes)).await;
        }
    }

    pub async fn send_ad_quartile(&self, quartile: u8, mut attributes: HashMap<String, AttributeValue>) {
        if self.guard_ad("AD_QUARTILE") {
            attributes.insert("quartile".to_string(), AttributeValue::Int(quartile as i64));
            self.emit(EVENT_TYPE_VIDEO, actions::AD_QUARTILE, Some(attributes)).await;
        }
    }

    pub async fn send_ad_click(&self, attributes: HashMap<String, AttributeValue>) {
        if self.guard_ad("AD_CLICK") {
            self.emit(EVENT_TYPE_VIDEO, actions::AD_CLICK, Some(attributes)).await;
        }
    }

    fn guard_ad(&self, action: &str) -> bool {
        if self.kind != TrackerKind::Ad {
            warn!(action = %action, "Ad event on a content tracker, suppressed");
            return false;
        }
        true
    }

    // ---- Heartbeat timer --------------------------------------------------

    /// Start (or restart) the periodic heartbeat task
    pub fn start_heartbeat(self: &Arc<Self>) {
        let interval = self
            .heartbeat_interval
            .lock()
            .map(|g| *g)
            .unwrap_or(Duration::ZERO);
        if interval.is_zero() {
            return;
        }
        self.stop_heartbeat();

        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match weak.upgrade() {
                    Some(tracker) => tracker.send_heartbeat().await,
                    None => break,
                }
            }
        });
        if let Ok(mut guard) = self.heartbeat_task.lock() {
            *guard = Some(handle);
        }
    }

    /// Stop the heartbeat task
    pub fn stop_heartbeat(&self) {
        if let Ok(mut guard) = self.heartbeat_task.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }

    /// Change the heartbeat period; takes effect on the next start
    pub fn set_heartbeat_interval(&self, seconds: u64) {
        let interval = if seconds == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(seconds.max(1))
        };
        if let Ok(mut guard) = self.heartbeat_interval.lock() {
            *guard = interval;
        }
    }

    /// Release timers; pending sends already in the buffer are unaffected
    pub fn dispose(&self) {
        self.stop_heartbeat();
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        self.stop_heartbeat();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferCapacity, PriorityEventBuffer};
    use crate::event::DefaultSizeEstimator;

    fn capture() -> Arc<PriorityEventBuffer> {
        Arc::new(PriorityEventBuffer::new(BufferCapacity::default()))
    }

    async fn drain(buffer: &PriorityEventBuffer, priority: Priority) -> Vec<VideoEvent> {
        buffer
            .poll_batch_by_priority(1 << 24, &DefaultSizeEstimator, priority)
            .await
    }

    #[tokio::test]
    async fn test_duplicate_request_suppressed() {
        let buffer = capture();
        let tracker = TrackerBuilder::new(TrackerKind::Content, buffer.clone())
            .with_heartbeat_interval(0)
            .build();

        tracker.send_request().await;
        tracker.send_request().await;

        let events = drain(&buffer, Priority::OnDemand).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "CONTENT_REQUEST");
    }

    #[tokio::test]
    async fn test_full_playback_sequence() {
        let buffer = capture();
        let tracker = TrackerBuilder::new(TrackerKind::Content, buffer.clone())
            .with_heartbeat_interval(0)
            .build();

        tracker.send_request().await;
        tracker.send_start().await;
        tracker.send_buffer_start().await;
        tracker.send_buffer_end().await;
        tracker.send_pause().await;
        tracker.send_resume().await;
        tracker.send_end().await;

        let names: Vec<String> = drain(&buffer, Priority::OnDemand)
            .await
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "CONTENT_REQUEST",
                "CONTENT_START",
                "CONTENT_BUFFER_START",
                "CONTENT_BUFFER_END",
                "CONTENT_PAUSE",
                "CONTENT_RESUME",
                "CONTENT_END",
            ]
        );
    }

    #[tokio::test]
    async fn test_ad_tracker_uses_ad_actions() {
        let buffer = capture();
        let tracker = TrackerBuilder::new(TrackerKind::Ad, buffer.clone())
            .with_heartbeat_interval(0)
            .build();

        tracker.send_request().await;
        tracker.send_start().await;

        let events = drain(&buffer, Priority::OnDemand).await;
        assert_eq!(events[0].name, "AD_REQUEST");
        assert_eq!(events[1].name, "AD_START");
        assert_eq!(events[1].attributes["isAd"].as_int(), Some(1));
    }

    #[tokio::test]
    async fn test_suppliers_feed_attributes() {
        let buffer = capture();
        let tracker = TrackerBuilder::new(TrackerKind::Content, buffer.clone())
            .with_heartbeat_interval(0)
            .with_attribute_supplier("contentBitrate", || Some(AttributeValue::Int(2_000_000)))
            .with_attribute_supplier("contentDuration", || None)
            .build();

        tracker.send_request().await;
        let events = drain(&buffer, Priority::OnDemand).await;
        assert_eq!(events[0].attributes["contentBitrate"].as_int(), Some(2_000_000));
        // Absent supplier value omits the attribute entirely
        assert!(!events[0].attributes.contains_key("contentDuration"));
    }

    #[tokio::test]
    async fn test_live_flag_routes_priority() {
        let buffer = capture();
        let tracker = TrackerBuilder::new(TrackerKind::Content, buffer.clone())
            .with_heartbeat_interval(0)
            .live(true)
            .build();

        tracker.send_request().await;
        assert_eq!(drain(&buffer, Priority::Live).await.len(), 1);
        assert!(drain(&buffer, Priority::OnDemand).await.is_empty());
    }

    #[tokio::test]
    async fn test_double_end_emits_twice_but_state_stable() {
        let buffer = capture();
        let tracker = TrackerBuilder::new(TrackerKind::Content, buffer.clone())
            .with_heartbeat_interval(0)
            .build();

        tracker.send_request().await;
        tracker.send_end().await;
        tracker.send_end().await;

        let names: Vec<String> = drain(&buffer, Priority::OnDemand)
            .await
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["CONTENT_REQUEST", "CONTENT_END", "CONTENT_END"]);
        assert_eq!(tracker.state().await, PlaybackState::Stopped);

        // A new playback starts cleanly after the double end
        tracker.send_request().await;
        assert_eq!(tracker.state().await, PlaybackState::Starting);
    }

    #[tokio::test]
    async fn test_error_counts_accumulate() {
        let buffer = capture();
        let tracker = TrackerBuilder::new(TrackerKind::Content, buffer.clone())
            .with_heartbeat_interval(0)
            .build();

        tracker.send_error("first").await;
        tracker.send_error("second").await;

        let events = drain(&buffer, Priority::OnDemand).await;
        assert_eq!(events[0].attributes["numErrors"].as_int(), Some(1));
        assert_eq!(events[1].attributes["numErrors"].as_int(), Some(2));
        assert_eq!(events[1].attributes["errorMessage"].as_str(), Some("second"));
    }

    #[tokio::test]
    async fn test_ad_events_suppressed_on_content_tracker() {
        let buffer = capture();
        let tracker = TrackerBuilder::new(TrackerKind::Content, buffer.clone())
            .with_heartbeat_interval(0)
            .build();

        tracker.send_ad_break_start(HashMap::new()).await;
        tracker.send_ad_quartile(1, HashMap::new()).await;
        assert!(buffer.is_empty().await);
    }

    #[tokio::test]
    async fn test_ad_break_and_click_events() {
        let buffer = capture();
        let tracker = TrackerBuilder::new(TrackerKind::Ad, buffer.clone())
            .with_heartbeat_interval(0)
            .build();

        let mut attrs = HashMap::new();
        attrs.insert("adBreakId".to_string(), AttributeValue::String("avail-1".into()));
        tracker.send_ad_break_start(attrs.clone()).await;
        tracker.send_ad_quartile(2, attrs.clone()).await;
        tracker.send_ad_click(attrs.clone()).await;
        tracker.send_ad_break_end(attrs).await;

        let events = drain(&buffer, Priority::OnDemand).await;
        let names: Vec<&str> = events.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["AD_BREAK_START", "AD_QUARTILE", "AD_CLICK", "AD_BREAK_END"]);
        assert_eq!(events[1].attributes["quartile"].as_int(), Some(2));
        assert_eq!(events[2].attributes["adBreakId"].as_str(), Some("avail-1"));
    }

    #[tokio::test]
    async fn test_custom_action_event_type() {
        let buffer = capture();
        let tracker = TrackerBuilder::new(TrackerKind::Content, buffer.clone())
            .with_heartbeat_interval(0)
            .build();

        tracker.send_custom_action("GOAL_SCORED", HashMap::new()).await;
        let events = drain(&buffer, Priority::OnDemand).await;
        assert_eq!(events[0].event_type, EVENT_TYPE_CUSTOM);
        assert_eq!(events[0].name, "GOAL_SCORED");
    }

    #[tokio::test]
    async fn test_heartbeat_task_fires_and_stops() {
        let buffer = capture();
        let tracker = TrackerBuilder::new(TrackerKind::Content, buffer.clone())
            .with_heartbeat_interval(1)
            .build();

        tracker.send_request().await;
        tokio::time::sleep(Duration::from_millis(1_200)).await;
        tracker.dispose();

        let heartbeats = drain(&buffer, Priority::OnDemand)
            .await
            .into_iter()
            .filter(|e| e.name == "CONTENT_HEARTBEAT")
            .count();
        assert!(heartbeats >= 1);
    }
}
