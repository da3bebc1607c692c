//! HLS manifest ad-cue detection
//!
//! Pure parsing over media playlist text: a CUE-OUT opens an ad break at
//! the cumulative EXTINF cursor, discontinuities and EXT-X-MAP changes
//! split pods inside an open break, and CUE-IN closes it. Breaks shorter
//! than [`MIN_AD_DURATION`] are discarded as false positives.

use crate::error::{Error, Result};
use crate::model::{AdBreak, AdPod, AdSource, MIN_AD_DURATION};
use m3u8_rs::MediaSegment;
use tracing::debug;

/// Ads extracted from one media playlist
#[derive(Debug, Clone)]
pub struct ManifestAds {
    pub breaks: Vec<AdBreak>,
    /// `true` when the playlist carries an end-list marker
    pub is_vod: bool,
    /// EXT-X-TARGETDURATION in seconds; drives live polling cadence
    pub target_duration: f64,
}

struct OpenBreak {
    start: f64,
    declared_duration: Option<f64>,
    pods: Vec<AdPod>,
    pod_start: f64,
    current_map: Option<String>,
}

impl OpenBreak {
    fn new(start: f64, declared_duration: Option<f64>) -> Self {
        Self {
            start,
            declared_duration,
            pods: Vec::new(),
            pod_start: start,
            current_map: None,
        }
    }

    fn close_pod(&mut self, at: f64) {
        let mut pod = AdPod::new(self.pod_start, at - self.pod_start);
        pod.map_url = self.current_map.clone();
        self.pods.push(pod);
    }

    fn finalize(mut self, close_time: f64) -> Option<AdBreak> {
        if close_time > self.pod_start + f64::EPSILON {
            self.close_pod(close_time);
        }
        let duration = self.declared_duration.unwrap_or(close_time - self.start);
        if duration < MIN_AD_DURATION {
            debug!(start = self.start, duration, "Discarding sub-minimum ad break");
            return None;
        }
        let mut ad_break = AdBreak::new(self.start, duration, AdSource::ManifestCue);
        // A single pod spanning the whole break carries no extra
        // information; the break itself acts as the implicit pod.
        if self.pods.len() > 1 {
            ad_break.pods = self.pods;
        }
        Some(ad_break)
    }
}

/// Parse media playlist text into the ad breaks it advertises
pub fn parse_media_playlist(text: &str) -> Result<ManifestAds> {
    let playlist = m3u8_rs::parse_media_playlist_res(text.as_bytes())
        .map_err(|e| Error::ManifestParse(format!("{e:?}")))?;

    let mut breaks = Vec::new();
    let mut open: Option<OpenBreak> = None;
    let mut cursor = 0.0f64;

    for segment in &playlist.segments {
        // Tags precede the segment's EXTINF, so the cursor is still at the
        // segment's start time here.
        for tag in &segment.unknown_tags {
            if tag.tag == "X-CUE-IN" {
                if let Some(finished) = open.take() {
                    if let Some(ad_break) = finished.finalize(cursor) {
                        breaks.push(ad_break);
                    }
                }
            } else if is_cue_out(&tag.tag) && open.is_none() {
                let declared = tag.rest.as_deref().and_then(parse_cue_out_duration);
                open = Some(OpenBreak::new(cursor, declared));
            }
        }

        if let Some(current) = open.as_mut() {
            pod_boundary(current, segment, cursor);
        }

        cursor += segment.duration as f64;
    }

    // Live playlists can end mid-break; close at the cursor
    if let Some(unfinished) = open.take() {
        if let Some(ad_break) = unfinished.finalize(cursor) {
            breaks.push(ad_break);
        }
    }

    Ok(ManifestAds {
        breaks,
        is_vod: playlist.end_list,
        target_duration: playlist.target_duration as f64,
    })
}

/// Split a pod on a discontinuity or a MAP URI change inside an open break
fn pod_boundary(open: &mut OpenBreak, segment: &MediaSegment, cursor: f64) {
    let segment_map = segment.map.as_ref().map(|m| m.uri.clone());
    let map_changed = segment_map.is_some() && segment_map != open.current_map;
    let elapsed = cursor > open.pod_start + f64::EPSILON;
    if (segment.discontinuity || map_changed) && elapsed {
        open.close_pod(cursor);
        open.pod_start = cursor;
    }
    if let Some(map) = segment_map {
        open.current_map = Some(map);
    }
}

fn is_cue_out(tag: &str) -> bool {
    tag == "X-CUE-OUT" || (tag.starts_with("X-CUE-OUT") && !tag.starts_with("X-CUE-OUT-CONT"))
}

/// Accepts `DURATION=30.0` and the bare `30.0` form
fn parse_cue_out_duration(rest: &str) -> Option<f64> {
    let value = rest.strip_prefix("DURATION=").unwrap_or(rest);
    value.trim().parse().ok()
}
