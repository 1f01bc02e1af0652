//! Integration tests for Ladder Core

use async_trait::async_trait;
use bytes::Bytes;
use ladder_core::{
    AbrAlgorithm, AbrContext, BandwidthEstimate, Chunk, Collaborators, Decryptor,
    EndOfStreamReason, EngineConfig, Error, FetchError, FetchRequest, FetchResponse,
    MasterPlaylist, MediaPlaylist, MediaSink, PlaybackClock, PlayerSession, PlaylistEvent,
    PlaylistLoader, PreloadPolicy, Rendition, Resolution, SessionPhase, SinkState,
    StreamEvent, SwitchStatus, TimeRanges, Transport, VarianceSelector,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

// =============================================================================
// Test collaborators
// =============================================================================

fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

fn media(id: &str, count: usize, duration: f64) -> MediaPlaylist {
    let chunks = (0..count)
        .map(|i| Chunk::new(url(&format!("https://cdn.test/{}/{}.ts", id, i)), duration))
        .collect();
    MediaPlaylist::new(duration, chunks)
}

fn rendition(id: &str, bandwidth: u64) -> Rendition {
    Rendition::new(id, url(&format!("https://cdn.test/{}.m3u8", id))).with_bandwidth(bandwidth)
}

/// Serves `"<start>,<duration>"` bodies; everything else is a 404
#[derive(Default)]
struct ScriptedTransport {
    bodies: Mutex<HashMap<String, Bytes>>,
    requests: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    fn serve(&self, playlist: &MediaPlaylist) {
        let mut start = 0.0;
        let mut bodies = self.bodies.lock().unwrap();
        for chunk in &playlist.chunks {
            bodies.insert(
                chunk.uri.to_string(),
                Bytes::from(format!("{},{}", start, chunk.duration)),
            );
            start += chunk.duration;
        }
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let uri = request.uri.to_string();
        self.requests.lock().unwrap().push(uri.clone());
        let body = self.bodies.lock().unwrap().get(&uri).cloned();
        match body {
            Some(bytes) => Ok(FetchResponse {
                status: 200,
                bytes,
                bandwidth: 50_000_000.0,
                round_trip: Duration::from_millis(20),
            }),
            None => Err(FetchError::Status { status: 404 }),
        }
    }
}

#[derive(Default)]
struct RecordingSink {
    buffered: Mutex<TimeRanges>,
    finalized: Mutex<Option<Option<EndOfStreamReason>>>,
}

#[async_trait]
impl MediaSink for RecordingSink {
    fn ready_state(&self) -> SinkState {
        match *self.finalized.lock().unwrap() {
            Some(_) => SinkState::Ended,
            None => SinkState::Open,
        }
    }

    fn buffered(&self) -> TimeRanges {
        self.buffered.lock().unwrap().clone()
    }

    async fn append(&self, data: Bytes) -> ladder_core::Result<()> {
        let text = std::str::from_utf8(&data).map_err(|e| Error::SinkAppend(e.to_string()))?;
        let (start, duration) = text
            .split_once(',')
            .ok_or_else(|| Error::SinkAppend("bad chunk".into()))?;
        let start: f64 = start.parse().map_err(|_| Error::SinkAppend("bad start".into()))?;
        let duration: f64 = duration
            .parse()
            .map_err(|_| Error::SinkAppend("bad duration".into()))?;
        self.buffered.lock().unwrap().add(start, start + duration);
        Ok(())
    }

    fn evict(&self, start: f64, end: f64) {
        self.buffered.lock().unwrap().remove(start, end);
    }

    fn set_timestamp_offset(&self, _offset: f64) {}

    fn set_duration(&self, _duration: f64) {}

    fn finalize(&self, reason: Option<EndOfStreamReason>) {
        *self.finalized.lock().unwrap() = Some(reason);
    }
}

#[derive(Default)]
struct Playhead(Mutex<f64>);

impl PlaybackClock for Playhead {
    fn current_time(&self) -> f64 {
        *self.0.lock().unwrap()
    }

    fn is_seeking(&self) -> bool {
        false
    }

    fn set_current_time(&self, time: f64) {
        *self.0.lock().unwrap() = time;
    }

    fn surface(&self) -> Option<Resolution> {
        None
    }
}

struct NoDecryption;

#[async_trait]
impl Decryptor for NoDecryption {
    async fn decrypt(&self, cipher: Bytes, _key: [u8; 16], _iv: [u8; 16]) -> ladder_core::Result<Bytes> {
        Ok(cipher)
    }
}

/// Loader whose chunk lists always arrive asynchronously
struct DeferredLoader;

impl PlaylistLoader for DeferredLoader {
    fn switch_to(&self, _rendition: &Rendition) -> SwitchStatus {
        SwitchStatus::Pending
    }
}

fn collaborators(
    transport: Arc<ScriptedTransport>,
    sink: Arc<RecordingSink>,
    loader: Arc<dyn PlaylistLoader>,
) -> Collaborators {
    Collaborators {
        transport,
        decryptor: Arc::new(NoDecryption),
        sink,
        clock: Arc::new(Playhead::default()),
        loader,
    }
}

// =============================================================================
// Types Tests
// =============================================================================

#[test]
fn test_resolution_quality_name() {
    assert_eq!(Resolution::new(854, 480).quality_name(), "480p");
    assert_eq!(Resolution::new(1280, 720).quality_name(), "720p");
    assert_eq!(Resolution::new(1920, 1080).quality_name(), "1080p");
    assert_eq!(Resolution::new(3840, 2160).quality_name(), "4K");
}

#[test]
fn test_session_phase_transitions() {
    // Valid transitions
    assert!(SessionPhase::Idle.can_transition_to(&SessionPhase::Ready));
    assert!(SessionPhase::Ready.can_transition_to(&SessionPhase::Switching { to: "hd".into() }));
    assert!(SessionPhase::Ready.can_transition_to(&SessionPhase::Ended));
    assert!(SessionPhase::Ended.can_transition_to(&SessionPhase::Ready));

    // Invalid transitions
    assert!(!SessionPhase::Failed.can_transition_to(&SessionPhase::Ready));
    assert!(!SessionPhase::Idle.can_transition_to(&SessionPhase::Ended));
}

#[test]
fn test_master_sorted_by_bandwidth() {
    let master = MasterPlaylist::new(vec![
        rendition("high", 3_000_000),
        rendition("low", 400_000),
        rendition("mid", 1_200_000),
    ]);
    let ids: Vec<_> = master.renditions.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["low", "mid", "high"]);
}

// =============================================================================
// Config Tests
// =============================================================================

#[test]
fn test_engine_config_defaults() {
    let config = EngineConfig::default();
    assert_eq!(config.preload, PreloadPolicy::Auto);
    assert_eq!(config.goal_buffer_length, 30.0);
    assert_eq!(config.bandwidth_variance, 1.2);
    assert_eq!(config.exclusion_window(), Duration::from_secs(300));
}

#[test]
fn test_engine_config_from_json() {
    let config = EngineConfig::from_json(r#"{"goal_buffer_length": 12.0, "preload": "none"}"#)
        .unwrap();
    assert_eq!(config.goal_buffer_length, 12.0);
    assert_eq!(config.preload, PreloadPolicy::None);
    assert_eq!(config.check_interval(), Duration::from_millis(500));

    let err = EngineConfig::from_json(r#"{"bandwidth_variance": -1.0}"#).unwrap_err();
    assert_eq!(err.error_code(), "INVALID_CONFIG");
}

// =============================================================================
// Selection Tests
// =============================================================================

#[tokio::test]
async fn test_selector_respects_exclusions() {
    let mut renditions = vec![rendition("low", 500_000), rendition("high", 2_000_000)];
    renditions[1].excluded_until = Some(Instant::now() + Duration::from_secs(60));

    let selector = VarianceSelector::default();
    let context = AbrContext {
        bandwidth: 100_000_000.0,
        surface: None,
        now: Instant::now(),
    };
    let chosen = selector.select_rendition(&renditions, &context).unwrap();
    assert_eq!(chosen.id, "low");
}

#[test]
fn test_bandwidth_estimate_floor() {
    let mut estimate = BandwidthEstimate::new(Some(5_000_000.0));
    estimate.drop_to_minimum();
    assert_eq!(estimate.bits_per_second(), 1.0);
    assert_eq!(BandwidthEstimate::throughput(1_000, Duration::from_secs(1)), 8_000.0);
}

// =============================================================================
// Session Tests
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_session_streams_to_end() {
    let transport = Arc::new(ScriptedTransport::default());
    let sink = Arc::new(RecordingSink::default());
    let list = media("main", 4, 6.0);
    transport.serve(&list);

    let session = PlayerSession::spawn(
        EngineConfig::default(),
        collaborators(transport.clone(), sink.clone(), Arc::new(ladder_core::StaticPlaylistLoader)),
    )
    .unwrap();
    let mut events = session.subscribe_events();

    session
        .load_master(MasterPlaylist::new(vec![rendition("main", 800_000).with_media(list)]))
        .await
        .unwrap();
    session
        .wait_for_phase(|p| *p == SessionPhase::Ended)
        .await
        .unwrap();

    assert_eq!(transport.requests().len(), 4);
    assert_eq!(sink.buffered(), TimeRanges::from_pairs(&[(0.0, 24.0)]));
    assert_eq!(*sink.finalized.lock().unwrap(), Some(None));

    let mut appended = 0;
    let mut saw_metadata = false;
    while let Ok(record) = events.try_recv() {
        match record.event {
            StreamEvent::ChunkAppended { .. } => appended += 1,
            StreamEvent::MetadataLoaded { is_live, duration, .. } => {
                saw_metadata = true;
                assert!(!is_live);
                assert_eq!(duration, Some(24.0));
            }
            _ => {}
        }
    }
    assert_eq!(appended, 4);
    assert!(saw_metadata);

    session.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_session_waits_for_deferred_switch() {
    let transport = Arc::new(ScriptedTransport::default());
    let sink = Arc::new(RecordingSink::default());
    let list = media("main", 2, 10.0);
    transport.serve(&list);

    let session = PlayerSession::spawn(
        EngineConfig::default(),
        collaborators(transport.clone(), sink.clone(), Arc::new(DeferredLoader)),
    )
    .unwrap();

    session
        .load_master(MasterPlaylist::new(vec![rendition("main", 800_000)]))
        .await
        .unwrap();
    let phase = session
        .wait_for_phase(|p| matches!(p, SessionPhase::Switching { .. }))
        .await
        .unwrap();
    assert_eq!(phase, SessionPhase::Switching { to: "main".into() });

    session
        .playlist_event(PlaylistEvent::RenditionUpdated {
            id: "main".into(),
            media: list,
        })
        .await
        .unwrap();
    assert!(transport.requests().is_empty());

    session
        .playlist_event(PlaylistEvent::RenditionChanged { id: "main".into() })
        .await
        .unwrap();
    session
        .wait_for_phase(|p| *p == SessionPhase::Ended)
        .await
        .unwrap();
    assert_eq!(transport.requests().len(), 2);

    session.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_session_fails_when_every_chunk_is_missing() {
    let transport = Arc::new(ScriptedTransport::default());
    let sink = Arc::new(RecordingSink::default());

    let session = PlayerSession::spawn(
        EngineConfig::default(),
        collaborators(transport.clone(), sink.clone(), Arc::new(ladder_core::StaticPlaylistLoader)),
    )
    .unwrap();
    session
        .load_master(MasterPlaylist::new(vec![
            rendition("low", 400_000).with_media(media("low", 3, 10.0)),
            rendition("high", 2_000_000).with_media(media("high", 3, 10.0)),
        ]))
        .await
        .unwrap();
    session
        .wait_for_phase(|p| *p == SessionPhase::Failed)
        .await
        .unwrap();

    // Each rendition gets one attempt before the session gives up
    assert_eq!(transport.requests().len(), 2);
    assert_eq!(
        *sink.finalized.lock().unwrap(),
        Some(Some(EndOfStreamReason::Network))
    );

    session.stop().await.unwrap();
}
