//! Ad schedule maintenance
//!
//! Merges manifest-parsed breaks across refreshes, reconciles tracking-API
//! avails onto them, assigns VOD positions, and answers the active-break
//! and quartile queries the event emitter drives on every playhead move.
//! The schedule is kept non-overlapping; conflicting inserts are rejected.

use crate::model::{
    AdBreak, AdPod, AdPosition, AdSource, QuartileFlags, TrackingAvail, AD_TIMING_TOLERANCE,
    MIN_AD_DURATION, QUARTILE_Q1, QUARTILE_Q2, QUARTILE_Q3,
};
use tracing::{debug, warn};

/// The ordered, non-overlapping ad break schedule for one stream
pub struct AdSchedule {
    breaks: Vec<AdBreak>,
    is_vod: bool,
}

impl AdSchedule {
    pub fn new(is_vod: bool) -> Self {
        Self {
            breaks: Vec::new(),
            is_vod,
        }
    }

    pub fn is_vod(&self) -> bool {
        self.is_vod
    }

    /// Stream type is only known after the first manifest parse
    pub fn set_vod(&mut self, is_vod: bool) {
        self.is_vod = is_vod;
    }

    pub fn breaks(&self) -> &[AdBreak] {
        &self.breaks
    }

    /// Merge a fresh manifest parse into the schedule.
    ///
    /// Existing breaks matched by start time keep their fired flags and
    /// tracking enrichment; new breaks are inserted unless they would
    /// overlap. VOD schedules get positions reassigned afterwards.
    pub fn apply_manifest(&mut self, parsed: Vec<AdBreak>) {
        for incoming in parsed {
            match self.find_break_index(incoming.start_time) {
                Some(i) => {
                    let existing = &mut self.breaks[i];
                    existing.duration = incoming.duration;
                    existing.end_time = existing.start_time + incoming.duration;
                    if existing.pods.is_empty() && !incoming.pods.is_empty() {
                        existing.pods = incoming.pods;
                    }
                    if existing.source == AdSource::TrackingApi {
                        existing.source = AdSource::Both;
                    }
                }
                None => self.insert(incoming),
            }
        }
        self.assign_positions();
    }

    /// Reconcile tracking-API avails onto the schedule.
    ///
    /// A matched avail promotes the break to `source=Both` and copies
    /// metadata onto it and its pods (by index, 1:1; extra pods keep
    /// manifest-only data). An unmatched avail inserts a tracking-only
    /// break. When two breaks sit within tolerance of an avail, the
    /// nearest start time wins.
    pub fn reconcile_tracking(&mut self, avails: &[TrackingAvail]) {
        for avail in avails {
            if avail.duration_in_seconds < MIN_AD_DURATION {
                debug!(avail = %avail.avail_id, "Skipping sub-minimum tracking avail");
                continue;
            }
            match self.nearest_break_index(avail.start_time_in_seconds) {
                Some(i) => self.enrich(i, avail),
                None => {
                    let mut created = AdBreak::new(
                        avail.start_time_in_seconds,
                        avail.duration_in_seconds,
                        AdSource::TrackingApi,
                    );
                    created.confirmed_by_tracking = true;
                    apply_avail_metadata(&mut created, avail);
                    created.pods = pods_from_avail(avail);
                    self.insert(created);
                }
            }
        }
        self.assign_positions();
    }

    fn enrich(&mut self, index: usize, avail: &TrackingAvail) {
        let ad_break = &mut self.breaks[index];
        ad_break.confirmed_by_tracking = true;
        ad_break.source = match ad_break.source {
            AdSource::ManifestCue | AdSource::Both => AdSource::Both,
            AdSource::TrackingApi => AdSource::TrackingApi,
        };
        apply_avail_metadata(ad_break, avail);

        if ad_break.pods.is_empty() {
            ad_break.pods = pods_from_avail(avail);
            return;
        }
        // Distribute ads onto existing pods by index; extra pods keep
        // their manifest-only data.
        for (pod, ad) in ad_break.pods.iter_mut().zip(avail.ads.iter()) {
            pod.title = Some(ad.ad_title.clone());
            pod.creative_id = Some(ad.ad_id.clone());
            if (ad.start_time_in_seconds - pod.start_time).abs() > f64::EPSILON {
                pod.tracking_start_time = Some(ad.start_time_in_seconds);
            }
            if (ad.duration_in_seconds - pod.duration).abs() > f64::EPSILON {
                pod.tracking_duration = Some(ad.duration_in_seconds);
            }
        }
    }

    /// Index of the break whose start matches `start_time` within
    /// tolerance; the nearest wins when two qualify.
    pub fn find_break_index(&self, start_time: f64) -> Option<usize> {
        self.nearest_break_index(start_time)
    }

    fn nearest_break_index(&self, start_time: f64) -> Option<usize> {
        self.breaks
            .iter()
            .enumerate()
            .filter(|(_, b)| (b.start_time - start_time).abs() <= AD_TIMING_TOLERANCE)
            .min_by(|(_, a), (_, b)| {
                let da = (a.start_time - start_time).abs();
                let db = (b.start_time - start_time).abs();
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(i, _)| i)
    }

    /// The unique break containing `t`, if any
    pub fn find_active_break(&self, t: f64) -> Option<&AdBreak> {
        self.breaks.iter().find(|b| b.contains(t))
    }

    pub fn find_active_break_mut(&mut self, t: f64) -> Option<&mut AdBreak> {
        self.breaks.iter_mut().find(|b| b.contains(t))
    }

    /// Breaks whose end time has passed `t`
    pub fn breaks_ended_before_mut(&mut self, t: f64) -> impl Iterator<Item = &mut AdBreak> {
        self.breaks.iter_mut().filter(move |b| b.end_time <= t)
    }

    fn insert(&mut self, ad_break: AdBreak) {
        if ad_break.duration < MIN_AD_DURATION {
            debug!(id = %ad_break.break_id, "Discarding sub-minimum break");
            return;
        }
        if let Some(conflict) = self.breaks.iter().find(|b| b.overlaps(&ad_break)) {
            warn!(
                id = %ad_break.break_id,
                conflicts_with = %conflict.break_id,
                "Rejecting overlapping ad break"
            );
            return;
        }
        self.breaks.push(ad_break);
        self.breaks
            .sort_by(|a, b| a.start_time.partial_cmp(&b.start_time).unwrap_or(std::cmp::Ordering::Equal));
    }

    /// VOD: first break is pre-roll, last is post-roll, the rest mid-roll.
    /// Live schedules stay Unknown.
    fn assign_positions(&mut self) {
        if !self.is_vod {
            return;
        }
        let last = self.breaks.len().saturating_sub(1);
        for (i, b) in self.breaks.iter_mut().enumerate() {
            b.position = if i == 0 {
                AdPosition::Pre
            } else if i == last {
                AdPosition::Post
            } else {
                AdPosition::Mid
            };
        }
    }
}

fn apply_avail_metadata(ad_break: &mut AdBreak, avail: &TrackingAvail) {
    if let Some(first) = avail.ads.first() {
        ad_break.title = Some(first.ad_title.clone());
        ad_break.creative_id = Some(first.ad_id.clone());
    }
}

fn pods_from_avail(avail: &TrackingAvail) -> Vec<AdPod> {
    if avail.ads.len() < 2 {
        return Vec::new();
    }
    avail
        .ads
        .iter()
        .map(|ad| {
            let mut pod = AdPod::new(ad.start_time_in_seconds, ad.duration_in_seconds);
            pod.title = Some(ad.ad_title.clone());
            pod.creative_id = Some(ad.ad_id.clone());
            pod
        })
        .collect()
}

/// Quartiles crossed by `progress` within `duration` whose flags are not
/// yet set, in firing order. A one-way ratchet: going backward past a
/// fired threshold never re-fires it, and a forward skip can fire several
/// at once.
pub fn quartiles_to_fire(progress: f64, duration: f64, fired: &QuartileFlags) -> Vec<u8> {
    if duration <= 0.0 {
        return Vec::new();
    }
    let ratio = progress / duration;
    let mut due = Vec::new();
    if !fired.q1 && ratio >= QUARTILE_Q1 {
        due.push(1);
    }
    if !fired.q2 && ratio >= QUARTILE_Q2 {
        due.push(2);
    }
    if !fired.q3 && ratio >= QUARTILE_Q3 {
        due.push(3);
    }
    due
}
