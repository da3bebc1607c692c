//! Integration tests for MediaPulse SSAI
//!
//! Drive the full detection flow offline: manifest text in, tracking
//! response reconciled, playhead moved through the break, ad events out
//! through a capturing core buffer.

use mediapulse_ssai::{SsaiOptions, SsaiTracker, TrackingResponse};
use mediapulse_core::{
    BufferCapacity, DefaultSizeEstimator, EventBuffer, Priority, PriorityEventBuffer,
    TrackerBuilder, TrackerKind, VideoEvent,
};
use std::sync::Arc;
use url::Url;

const VOD_MANIFEST: &str = "#EXTM3U\n\
#EXT-X-VERSION:3\n\
#EXT-X-TARGETDURATION:6\n\
#EXT-X-MEDIA-SEQUENCE:0\n\
#EXTINF:6.0,\nseg0.ts\n\
#EXTINF:6.0,\nseg1.ts\n\
#EXT-X-CUE-OUT:DURATION=30.0\n\
#EXTINF:6.0,\nad0.ts\n\
#EXTINF:6.0,\nad1.ts\n\
#EXTINF:6.0,\nad2.ts\n\
#EXTINF:6.0,\nad3.ts\n\
#EXTINF:6.0,\nad4.ts\n\
#EXT-X-CUE-IN\n\
#EXTINF:6.0,\nseg2.ts\n\
#EXT-X-ENDLIST\n";

const TRACKING_JSON: &str = r#"{
    "avails": [{
        "availId": "avail-12",
        "startTimeInSeconds": 12.0,
        "durationInSeconds": 30.0,
        "ads": [
            {"adId": "cr-1", "adTitle": "Soda Spot", "startTimeInSeconds": 12.0, "durationInSeconds": 30.0}
        ]
    }]
}"#;

struct Rig {
    ssai: Arc<SsaiTracker>,
    buffer: Arc<PriorityEventBuffer>,
}

fn rig() -> Rig {
    let buffer = Arc::new(PriorityEventBuffer::new(BufferCapacity::default()));
    let tracker = TrackerBuilder::new(TrackerKind::Ad, buffer.clone())
        .with_heartbeat_interval(0)
        .build();
    let ssai = Arc::new(
        SsaiTracker::new(
            tracker,
            Url::parse("https://x.mediatailor.test/master.m3u8").unwrap(),
            None,
            SsaiOptions::default(),
        )
        .unwrap(),
    );
    Rig { ssai, buffer }
}

async fn drain(buffer: &PriorityEventBuffer) -> Vec<VideoEvent> {
    buffer
        .poll_batch_by_priority(1 << 24, &DefaultSizeEstimator, Priority::OnDemand)
        .await
}

#[tokio::test]
async fn test_full_break_lifecycle() {
    let rig = rig();
    rig.ssai.ingest_manifest(VOD_MANIFEST).await.unwrap();
    assert_eq!(rig.ssai.break_count().await, 1);

    // Approach, enter and play through the break (starts at 12s, 30s long)
    rig.ssai.on_playhead(5.0).await;
    rig.ssai.on_playhead(12.5).await; // break start + ad start
    rig.ssai.on_playhead(20.0).await; // q1 (25% = 19.5s)
    rig.ssai.on_playhead(28.0).await; // q2 (50% = 27s)
    rig.ssai.on_playhead(35.0).await; // q3 (75% = 34.5s)
    rig.ssai.on_playhead(43.0).await; // past end (42s)

    let names: Vec<String> = drain(&rig.buffer).await.into_iter().map(|e| e.name).collect();
    assert_eq!(
        names,
        vec![
            "AD_BREAK_START",
            "AD_START",
            "AD_QUARTILE",
            "AD_QUARTILE",
            "AD_QUARTILE",
            "AD_BREAK_END",
        ]
    );
}

#[tokio::test]
async fn test_quartiles_skip_ahead_fire_together() {
    let rig = rig();
    rig.ssai.ingest_manifest(VOD_MANIFEST).await.unwrap();

    rig.ssai.on_playhead(12.5).await;
    // Jump straight to 90% through the break
    rig.ssai.on_playhead(39.0).await;

    let events = drain(&rig.buffer).await;
    let quartiles: Vec<i64> = events
        .iter()
        .filter(|e| e.name == "AD_QUARTILE")
        .map(|e| e.attributes["quartile"].as_int().unwrap())
        .collect();
    assert_eq!(quartiles, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_quartile_never_refires() {
    let rig = rig();
    rig.ssai.ingest_manifest(VOD_MANIFEST).await.unwrap();

    rig.ssai.on_playhead(12.5).await;
    rig.ssai.on_playhead(28.0).await; // q1 + q2
    rig.ssai.on_playhead(13.0).await; // scrub backward
    rig.ssai.on_playhead(29.0).await; // forward past q2 again

    let events = drain(&rig.buffer).await;
    let quartiles: Vec<i64> = events
        .iter()
        .filter(|e| e.name == "AD_QUARTILE")
        .map(|e| e.attributes["quartile"].as_int().unwrap())
        .collect();
    assert_eq!(quartiles, vec![1, 2]);
}

#[tokio::test]
async fn test_tracking_enrichment_on_events() {
    let rig = rig();
    rig.ssai.ingest_manifest(VOD_MANIFEST).await.unwrap();
    let tracking = TrackingResponse::parse(TRACKING_JSON.as_bytes()).unwrap();
    rig.ssai.ingest_tracking(&tracking).await;
    assert_eq!(rig.ssai.break_count().await, 1);

    rig.ssai.on_playhead(12.5).await;
    let events = drain(&rig.buffer).await;
    let start = events.iter().find(|e| e.name == "AD_BREAK_START").unwrap();
    assert_eq!(start.attributes["adTitle"].as_str(), Some("Soda Spot"));
    assert_eq!(start.attributes["adCreativeId"].as_str(), Some("cr-1"));
    assert_eq!(start.attributes["adSource"].as_str(), Some("both"));
    assert_eq!(start.attributes["confirmedByTracking"].as_int(), Some(1));
    // Single break in a VOD schedule leads with pre-roll
    assert_eq!(start.attributes["adPosition"].as_str(), Some("pre"));
}

#[tokio::test]
async fn test_unmatched_avail_becomes_tracking_break() {
    let rig = rig();
    rig.ssai.ingest_manifest(VOD_MANIFEST).await.unwrap();
    let tracking = TrackingResponse::parse(
        br#"{"avails": [{"availId": "late", "startTimeInSeconds": 300.0, "durationInSeconds": 15.0, "ads": []}]}"#,
    )
    .unwrap();
    rig.ssai.ingest_tracking(&tracking).await;
    assert_eq!(rig.ssai.break_count().await, 2);

    rig.ssai.on_playhead(301.0).await;
    let events = drain(&rig.buffer).await;
    let start = events.iter().find(|e| e.name == "AD_BREAK_START").unwrap();
    assert_eq!(start.attributes["adSource"].as_str(), Some("tracking"));
}

#[tokio::test]
async fn test_pod_level_events() {
    let pod_manifest = "#EXTM3U\n\
#EXT-X-VERSION:3\n\
#EXT-X-TARGETDURATION:6\n\
#EXT-X-MEDIA-SEQUENCE:0\n\
#EXT-X-CUE-OUT:DURATION=20.0\n\
#EXTINF:5.0,\nad0.ts\n\
#EXTINF:5.0,\nad1.ts\n\
#EXT-X-DISCONTINUITY\n\
#EXTINF:5.0,\nad2.ts\n\
#EXTINF:5.0,\nad3.ts\n\
#EXT-X-CUE-IN\n\
#EXTINF:6.0,\nseg0.ts\n\
#EXT-X-ENDLIST\n";

    let rig = rig();
    rig.ssai.ingest_manifest(pod_manifest).await.unwrap();

    rig.ssai.on_playhead(1.0).await; // pod 0 start
    rig.ssai.on_playhead(11.0).await; // pod 1 start
    let events = drain(&rig.buffer).await;

    let ad_starts: Vec<i64> = events
        .iter()
        .filter(|e| e.name == "AD_START")
        .map(|e| e.attributes["adPodIndex"].as_int().unwrap())
        .collect();
    assert_eq!(ad_starts, vec![0, 1]);
}

#[tokio::test]
async fn test_malformed_tracking_leaves_schedule_intact() {
    let rig = rig();
    rig.ssai.ingest_manifest(VOD_MANIFEST).await.unwrap();
    assert!(TrackingResponse::parse(b"{broken").is_err());
    // The manifest-derived schedule is untouched
    assert_eq!(rig.ssai.break_count().await, 1);
}
