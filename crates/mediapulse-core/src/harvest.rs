//! Harvest scheduling
//!
//! One periodic task per priority class polls the buffer, transmits the
//! batch, and routes failures to the dead-letter handler. Pausing keeps
//! the tasks alive but skips ticks; shutdown always performs a final
//! synchronous harvest before releasing the tasks.

use crate::buffer::EventBuffer;
use crate::config::VideoConfig;
use crate::deadletter::DeadLetterHandler;
use crate::event::{DefaultSizeEstimator, Priority, SizeEstimator};
use crate::http::HttpClient;
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Scheduler lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Paused,
}

struct SchedulerInner {
    buffer: Arc<dyn EventBuffer>,
    http: Arc<dyn HttpClient>,
    dead_letter: Arc<DeadLetterHandler>,
    estimator: Arc<dyn SizeEstimator>,
    config: VideoConfig,
    state: StdRwLock<SchedulerState>,
    /// (live, ondemand) tick periods; swapped for extended intervals
    intervals: StdRwLock<(Duration, Duration)>,
}

impl SchedulerInner {
    fn state(&self) -> SchedulerState {
        self.state.read().map(|s| *s).unwrap_or(SchedulerState::Idle)
    }

    fn set_state(&self, state: SchedulerState) {
        if let Ok(mut guard) = self.state.write() {
            *guard = state;
        }
    }

    fn interval_for(&self, priority: Priority) -> Duration {
        let (live, ondemand) = self
            .intervals
            .read()
            .map(|i| *i)
            .unwrap_or((Duration::from_secs(10), Duration::from_secs(60)));
        match priority {
            Priority::Live => live,
            Priority::OnDemand => ondemand,
        }
    }

    /// One harvest pass: retry an eligible dead-letter batch, then poll and
    /// transmit a fresh batch. A forced pass ignores the retry backoff.
    async fn harvest_tick(&self, priority: Priority, force: bool) {
        let now_ms = if force {
            i64::MAX
        } else {
            chrono::Utc::now().timestamp_millis()
        };
        if let Some(batch) = self.dead_letter.take_eligible(priority, now_ms).await {
            match self.http.send_events(&batch.events, priority).await {
                Ok(()) => self.buffer.on_successful_harvest().await,
                Err(e) => {
                    warn!(priority = %priority, error = %e, "Dead-letter retry failed");
                    self.dead_letter.reoffer(batch).await;
                }
            }
        }

        let max_bytes = self.config.batch_size_bytes(priority == Priority::Live);
        let batch = self
            .buffer
            .poll_batch_by_priority(max_bytes, self.estimator.as_ref(), priority)
            .await;
        if batch.is_empty() {
            return;
        }

        debug!(priority = %priority, count = batch.len(), "Harvesting batch");
        match self.http.send_events(&batch, priority).await {
            Ok(()) => self.buffer.on_successful_harvest().await,
            Err(e) => {
                warn!(priority = %priority, error = %e, code = e.error_code(), "Harvest failed");
                self.dead_letter.handle_failed_events(batch, priority).await;
            }
        }
    }

    /// Drain one priority completely, regardless of timer phase
    async fn force_harvest_priority(&self, priority: Priority) {
        loop {
            let before = self.buffer.event_count().await;
            self.harvest_tick(priority, true).await;
            let after = self.buffer.event_count().await;
            // Stop once the partition is drained or transmission is failing
            if after == 0 || after >= before {
                break;
            }
        }
    }
}

/// Device-aware, priority-split harvest scheduler
pub struct HarvestScheduler {
    inner: Arc<SchedulerInner>,
    handles: StdMutex<Vec<JoinHandle<()>>>,
}

impl HarvestScheduler {
    pub fn new(
        buffer: Arc<dyn EventBuffer>,
        http: Arc<dyn HttpClient>,
        dead_letter: Arc<DeadLetterHandler>,
        config: VideoConfig,
    ) -> Self {
        let intervals = (
            config.harvest_interval(true),
            config.harvest_interval(false),
        );
        Self {
            inner: Arc::new(SchedulerInner {
                buffer,
                http,
                dead_letter,
                estimator: Arc::new(DefaultSizeEstimator),
                config,
                state: StdRwLock::new(SchedulerState::Idle),
                intervals: StdRwLock::new(intervals),
            }),
            handles: StdMutex::new(Vec::new()),
        }
    }

    /// Start both priority tasks
    pub fn start(&self) {
        if self.inner.state() == SchedulerState::Running {
            return;
        }
        self.inner.set_state(SchedulerState::Running);
        for priority in Priority::ALL {
            self.spawn_loop(priority);
        }
        info!("Harvest scheduler started");
    }

    /// Start a single priority task
    pub fn start_priority(&self, priority: Priority) {
        if self.inner.state() == SchedulerState::Running {
            return;
        }
        self.inner.set_state(SchedulerState::Running);
        self.spawn_loop(priority);
    }

    /// Whether any harvest task is active
    pub fn is_running(&self) -> bool {
        self.inner.state() == SchedulerState::Running
    }

    /// Current scheduler state
    pub fn state(&self) -> SchedulerState {
        self.inner.state()
    }

    /// Immediate synchronous harvest of both priorities
    pub async fn force_harvest(&self) {
        for priority in Priority::ALL {
            self.inner.force_harvest_priority(priority).await;
        }
    }

    /// Immediate synchronous harvest of one priority (overflow path)
    pub async fn force_harvest_priority(&self, priority: Priority) {
        self.inner.force_harvest_priority(priority).await;
    }

    /// Suspend harvests without losing buffered events
    pub fn pause(&self) {
        if self.inner.state() == SchedulerState::Running {
            self.inner.set_state(SchedulerState::Paused);
            info!("Harvest scheduler paused");
        }
    }

    /// Resume harvesting; `extended` restarts timers at the longer
    /// device-saving interval (background/TV case).
    pub fn resume(&self, extended: bool) {
        if self.inner.state() == SchedulerState::Idle {
            return;
        }
        let intervals = if extended {
            (
                self.inner.config.extended_harvest_interval(true),
                self.inner.config.extended_harvest_interval(false),
            )
        } else {
            (
                self.inner.config.harvest_interval(true),
                self.inner.config.harvest_interval(false),
            )
        };
        if let Ok(mut guard) = self.inner.intervals.write() {
            *guard = intervals;
        }
        self.inner.set_state(SchedulerState::Running);
        info!(extended, "Harvest scheduler resumed");
    }

    /// Final harvest, then release the timer tasks
    pub async fn shutdown(&self) {
        self.inner.set_state(SchedulerState::Idle);
        self.force_harvest().await;
        if let Ok(mut handles) = self.handles.lock() {
            for handle in handles.drain(..) {
                handle.abort();
            }
        }
        info!("Harvest scheduler shut down");
    }

    fn spawn_loop(&self, priority: Priority) {
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            loop {
                let interval = inner.interval_for(priority);
                tokio::time::sleep(interval).await;
                match inner.state() {
                    SchedulerState::Idle => break,
                    SchedulerState::Paused => continue,
                    SchedulerState::Running => inner.harvest_tick(priority, false).await,
                }
            }
        });
        if let Ok(mut handles) = self.handles.lock() {
            handles.push(handle);
        }
    }
}
