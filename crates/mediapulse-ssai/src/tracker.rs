//! SSAI polling driver
//!
//! Fetches the manifest (once for VOD, polled for live), polls the
//! tracking API, maintains the [`AdSchedule`], and turns playhead
//! progress into `AD_BREAK_START`/`AD_BREAK_END`, `AD_START` and
//! `AD_QUARTILE` events on a core ad tracker. Disposing the tracker
//! aborts the polling tasks and cancels their in-flight requests.

use crate::error::{Error, Result};
use crate::manifest::{parse_media_playlist, ManifestAds};
use crate::model::{
    AdBreak, AdPod, TrackingResponse, DEFAULT_LIVE_MANIFEST_POLL, DEFAULT_LIVE_TRACKING_POLL,
    DEFAULT_TRACKING_TIMEOUT, SSAI_DOMAIN_PATTERN,
};
use crate::schedule::{quartiles_to_fire, AdSchedule};
use mediapulse_core::{AttributeValue, Tracker};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

/// SSAI tracker configuration
#[derive(Debug, Clone)]
pub struct SsaiOptions {
    /// Detect ad breaks from the manifest (default true)
    pub enable_manifest_parsing: bool,
    /// Live manifest re-poll period; stretched to the manifest's target
    /// duration when that is longer
    pub live_manifest_poll_interval: Duration,
    /// Live tracking API poll period
    pub live_tracking_poll_interval: Duration,
    /// Tracking API and manifest request timeout
    pub tracking_api_timeout: Duration,
}

impl Default for SsaiOptions {
    fn default() -> Self {
        Self {
            enable_manifest_parsing: true,
            live_manifest_poll_interval: DEFAULT_LIVE_MANIFEST_POLL,
            live_tracking_poll_interval: DEFAULT_LIVE_TRACKING_POLL,
            tracking_api_timeout: DEFAULT_TRACKING_TIMEOUT,
        }
    }
}

/// Events decided under the schedule lock, emitted after releasing it
enum Pending {
    BreakStart(HashMap<String, AttributeValue>),
    BreakEnd(HashMap<String, AttributeValue>),
    AdStart(HashMap<String, AttributeValue>),
    Quartile(u8, HashMap<String, AttributeValue>),
}

/// Server-side ad insertion tracker for one stream
pub struct SsaiTracker {
    tracker: Arc<Tracker>,
    schedule: Mutex<AdSchedule>,
    options: SsaiOptions,
    client: Client,
    manifest_url: Url,
    tracking_url: Option<Url>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl SsaiTracker {
    /// Whether a stream URL points at a server-side ad insertion service
    pub fn is_ssai_url(url: &Url) -> bool {
        url.as_str().contains(SSAI_DOMAIN_PATTERN)
    }

    pub fn new(
        tracker: Arc<Tracker>,
        manifest_url: Url,
        tracking_url: Option<Url>,
        options: SsaiOptions,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(options.tracking_api_timeout)
            .build()
            .map_err(Error::Network)?;
        Ok(Self {
            tracker,
            schedule: Mutex::new(AdSchedule::new(false)),
            options,
            client,
            manifest_url,
            tracking_url,
            tasks: StdMutex::new(Vec::new()),
        })
    }

    /// The core ad tracker events are emitted through
    pub fn tracker(&self) -> &Arc<Tracker> {
        &self.tracker
    }

    /// Fetch and parse the manifest; for live streams start the manifest
    /// and tracking poll loops.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if !self.options.enable_manifest_parsing {
            debug!("Manifest parsing disabled");
            return Ok(());
        }
        let ads = self.refresh_manifest().await?;
        if self.tracking_url.is_some() {
            // Tracking enrichment is best-effort; a failed or malformed
            // response leaves the manifest schedule intact.
            if let Err(e) = self.refresh_tracking().await {
                warn!(error = %e, "Tracking metadata unavailable");
            }
        }
        if !ads.is_vod {
            self.spawn_pollers(ads.target_duration);
        }
        Ok(())
    }

    /// Fetch the manifest and fold it into the schedule
    pub async fn refresh_manifest(&self) -> Result<ManifestAds> {
        let response = self
            .client
            .get(self.manifest_url.clone())
            .send()
            .await
            .map_err(|e| Error::ManifestFetch(e.to_string()))?;
        let text = response
            .text()
            .await
            .map_err(|e| Error::ManifestFetch(e.to_string()))?;
        self.ingest_manifest(&text).await
    }

    /// Fold already-fetched manifest text into the schedule
    pub async fn ingest_manifest(&self, text: &str) -> Result<ManifestAds> {
        let ads = parse_media_playlist(text)?;
        let mut schedule = self.schedule.lock().await;
        schedule.set_vod(ads.is_vod);
        schedule.apply_manifest(ads.breaks.clone());
        debug!(
            breaks = schedule.breaks().len(),
            is_vod = ads.is_vod,
            "Manifest folded into ad schedule"
        );
        Ok(ads)
    }

    /// Fetch tracking metadata and reconcile it onto the schedule
    pub async fn refresh_tracking(&self) -> Result<()> {
        let url = self
            .tracking_url
            .clone()
            .ok_or_else(|| Error::InvalidUrl("no tracking URL configured".to_string()))?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::TrackingFetch(e.to_string()))?;
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::TrackingFetch(e.to_string()))?;
        let parsed = TrackingResponse::parse(&body)?;
        self.ingest_tracking(&parsed).await;
        Ok(())
    }

    /// Reconcile an already-parsed tracking response
    pub async fn ingest_tracking(&self, response: &TrackingResponse) {
        let mut schedule = self.schedule.lock().await;
        schedule.reconcile_tracking(&response.avails);
    }

    /// Number of breaks currently scheduled
    pub async fn break_count(&self) -> usize {
        self.schedule.lock().await.breaks().len()
    }

    /// Drive ad events from the current playhead position (seconds)
    pub async fn on_playhead(&self, t: f64) {
        let pending = {
            let mut schedule = self.schedule.lock().await;
            let mut pending = Vec::new();

            for ended in schedule.breaks_ended_before_mut(t) {
                if ended.fired_break_start && !ended.fired_break_end {
                    ended.fired_break_end = true;
                    pending.push(Pending::BreakEnd(break_attributes(ended)));
                }
            }

            if let Some(active) = schedule.find_active_break_mut(t) {
                if !active.fired_break_start {
                    active.fired_break_start = true;
                    pending.push(Pending::BreakStart(break_attributes(active)));
                }
                match active.active_pod_index(t) {
                    Some(index) => {
                        let base = break_attributes(active);
                        let pod = &mut active.pods[index];
                        if !pod.fired.start {
                            pod.fired.start = true;
                            pending.push(Pending::AdStart(pod_attributes(pod, index, &base)));
                        }
                        let progress = t - pod.start_time;
                        for quartile in quartiles_to_fire(progress, pod.duration, &pod.fired) {
                            pod.fired.set_quartile(quartile);
                            pending.push(Pending::Quartile(
                                quartile,
                                pod_attributes(pod, index, &base),
                            ));
                        }
                    }
                    // No explicit pods: the break is its own implicit pod
                    None if active.pods.is_empty() => {
                        let attrs = break_attributes(active);
                        if !active.fired.start {
                            active.fired.start = true;
                            pending.push(Pending::AdStart(attrs.clone()));
                        }
                        let progress = t - active.start_time;
                        for quartile in quartiles_to_fire(progress, active.duration, &active.fired) {
                            active.fired.set_quartile(quartile);
                            pending.push(Pending::Quartile(quartile, attrs.clone()));
                        }
                    }
                    // Playhead sits in a gap between pods
                    None => {}
                }
            }
            pending
        };

        for event in pending {
            match event {
                Pending::BreakStart(attrs) => self.tracker.send_ad_break_start(attrs).await,
                Pending::BreakEnd(attrs) => self.tracker.send_ad_break_end(attrs).await,
                Pending::AdStart(attrs) => self.tracker.send_ad_start(attrs).await,
                Pending::Quartile(quartile, attrs) => {
                    self.tracker.send_ad_quartile(quartile, attrs).await
                }
            }
        }
    }

    /// Abort polling tasks and cancel their in-flight requests
    pub fn dispose(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
        self.tracker.dispose();
    }

    fn spawn_pollers(self: &Arc<Self>, target_duration: f64) {
        let manifest_interval = self
            .options
            .live_manifest_poll_interval
            .max(Duration::from_secs_f64(target_duration.max(0.0)));

        let weak = Arc::downgrade(self);
        let manifest_task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(manifest_interval).await;
                let Some(this) = weak.upgrade() else { break };
                if let Err(e) = this.refresh_manifest().await {
                    warn!(error = %e, "Live manifest poll failed");
                }
            }
        });

        let mut tasks = Vec::from([manifest_task]);
        if self.tracking_url.is_some() {
            let tracking_interval = self.options.live_tracking_poll_interval;
            let weak = Arc::downgrade(self);
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::time::sleep(tracking_interval).await;
                    let Some(this) = weak.upgrade() else { break };
                    if let Err(e) = this.refresh_tracking().await {
                        warn!(error = %e, "Live tracking poll failed");
                    }
                }
            }));
        }

        if let Ok(mut guard) = self.tasks.lock() {
            guard.extend(tasks);
        }
    }
}

impl Drop for SsaiTracker {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

fn break_attributes(ad_break: &AdBreak) -> HashMap<String, AttributeValue> {
    let mut attrs = HashMap::new();
    attrs.insert(
        "adBreakId".to_string(),
        AttributeValue::String(ad_break.break_id.clone()),
    );
    attrs.insert(
        "adBreakDuration".to_string(),
        AttributeValue::Float(ad_break.duration),
    );
    attrs.insert(
        "adPosition".to_string(),
        AttributeValue::String(ad_break.position.as_str().to_string()),
    );
    attrs.insert(
        "adSource".to_string(),
        AttributeValue::String(ad_break.source.as_str().to_string()),
    );
    attrs.insert(
        "confirmedByTracking".to_string(),
        AttributeValue::Int(ad_break.confirmed_by_tracking as i64),
    );
    if let Some(title) = &ad_break.title {
        attrs.insert("adTitle".to_string(), AttributeValue::String(title.clone()));
    }
    if let Some(creative) = &ad_break.creative_id {
        attrs.insert(
            "adCreativeId".to_string(),
            AttributeValue::String(creative.clone()),
        );
    }
    attrs
}

fn pod_attributes(
    pod: &AdPod,
    index: usize,
    base: &HashMap<String, AttributeValue>,
) -> HashMap<String, AttributeValue> {
    let mut attrs = base.clone();
    attrs.insert("adPodIndex".to_string(), AttributeValue::Int(index as i64));
    attrs.insert("adDuration".to_string(), AttributeValue::Float(pod.duration));
    if let Some(title) = &pod.title {
        attrs.insert("adTitle".to_string(), AttributeValue::String(title.clone()));
    }
    if let Some(creative) = &pod.creative_id {
        attrs.insert(
            "adCreativeId".to_string(),
            AttributeValue::String(creative.clone()),
        );
    }
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssai_url_detection() {
        let ssai =
            Url::parse("https://a1b2.mediatailor.us-east-1.amazonaws.com/v1/master/x/y.m3u8")
                .unwrap();
        let plain = Url::parse("https://cdn.example.com/master.m3u8").unwrap();
        assert!(SsaiTracker::is_ssai_url(&ssai));
        assert!(!SsaiTracker::is_ssai_url(&plain));
    }

    #[test]
    fn test_default_options() {
        let options = SsaiOptions::default();
        assert!(options.enable_manifest_parsing);
        assert_eq!(options.live_manifest_poll_interval, Duration::from_secs(5));
        assert_eq!(options.live_tracking_poll_interval, Duration::from_secs(10));
        assert_eq!(options.tracking_api_timeout, Duration::from_secs(5));
    }
}
