//! Mock collaborators for engine tests.
//!
//! Chunk bodies are small text payloads of the form `"<start>,<duration>"`;
//! [`MockSink`] parses them to decide which time range an append covers.
//! Encrypted bodies carry an `enc:` prefix that [`MockDecryptor`] strips.

use crate::{
    decrypt::Decryptor,
    engine::{Collaborators, Engine},
    playlist::StaticPlaylistLoader,
    sink::{EndOfStreamReason, MediaSink, PlaybackClock, SinkState},
    time_ranges::TimeRanges,
    transport::{FetchError, FetchRequest, FetchResponse, Transport},
    types::*,
    EngineConfig, Error, Result,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

/// Body of an unencrypted chunk covering `[start, start + duration]`
pub fn chunk_body(start: f64, duration: f64) -> Bytes {
    Bytes::from(format!("{},{}", start, duration))
}

/// Body of an encrypted chunk covering `[start, start + duration]`
pub fn encrypted_body(start: f64, duration: f64) -> Bytes {
    Bytes::from(format!("enc:{},{}", start, duration))
}

pub fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

/// Complete chunk list of `count` chunks, each `duration` seconds long
pub fn vod_media(id: &str, count: usize, duration: f64) -> MediaPlaylist {
    let chunks = (0..count)
        .map(|i| Chunk::new(url(&format!("https://cdn.test/{}/{}.ts", id, i)), duration))
        .collect();
    MediaPlaylist::new(duration, chunks)
}

pub fn vod_rendition(id: &str, bandwidth: u64, count: usize, duration: f64) -> Rendition {
    Rendition::new(id, url(&format!("https://cdn.test/{}.m3u8", id)))
        .with_bandwidth(bandwidth)
        .with_media(vod_media(id, count, duration))
}

/// Scripted reply for one URL
#[derive(Debug, Clone)]
pub enum MockResponse {
    Body(Bytes),
    Status(u16),
    /// Never answers
    Hang,
}

/// Transport answering from a URL-keyed script
#[derive(Debug)]
pub struct MockTransport {
    routes: Mutex<HashMap<String, MockResponse>>,
    requests: Mutex<Vec<String>>,
    bandwidth: f64,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::with_bandwidth(1e12)
    }

    /// Every successful response reports `bandwidth` bits per second
    pub fn with_bandwidth(bandwidth: f64) -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            bandwidth,
        }
    }

    pub fn route(&self, uri: &str, response: MockResponse) {
        self.routes
            .lock()
            .unwrap()
            .insert(uri.to_string(), response);
    }

    /// Serve every chunk of `rendition` at its nominal position
    pub fn serve(&self, rendition: &Rendition) {
        let Some(media) = &rendition.media else {
            return;
        };
        let mut start = 0.0;
        for chunk in &media.chunks {
            let body = if chunk.key.is_some() {
                encrypted_body(start, chunk.duration)
            } else {
                chunk_body(start, chunk.duration)
            };
            self.route(chunk.uri.as_str(), MockResponse::Body(body));
            start += chunk.duration;
        }
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self, uri: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.as_str() == uri)
            .count()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn fetch(&self, request: FetchRequest) -> std::result::Result<FetchResponse, FetchError> {
        let uri = request.uri.to_string();
        self.requests.lock().unwrap().push(uri.clone());
        let response = self.routes.lock().unwrap().get(&uri).cloned();

        match response {
            Some(MockResponse::Body(bytes)) => Ok(FetchResponse {
                status: 200,
                bytes,
                bandwidth: self.bandwidth,
                round_trip: Duration::from_millis(10),
            }),
            Some(MockResponse::Status(status)) => Err(FetchError::Status { status }),
            Some(MockResponse::Hang) => std::future::pending().await,
            None => Err(FetchError::Status { status: 404 }),
        }
    }
}

#[derive(Debug, Default)]
struct SinkInner {
    state: SinkState,
    buffered: TimeRanges,
    cursor: Option<f64>,
    appends: Vec<Bytes>,
    evictions: Vec<(f64, f64)>,
    duration: Option<f64>,
    finalized: Option<Option<EndOfStreamReason>>,
}

/// In-memory sink that tracks buffered ranges from chunk bodies.
///
/// Once a timestamp offset is set, appends are laid out back to back from it;
/// before that each body's own start time is used.
#[derive(Debug)]
pub struct MockSink {
    inner: Mutex<SinkInner>,
}

impl MockSink {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SinkInner {
                state: SinkState::Open,
                ..Default::default()
            }),
        }
    }

    pub fn set_state(&self, state: SinkState) {
        self.inner.lock().unwrap().state = state;
    }

    pub fn appends(&self) -> Vec<Bytes> {
        self.inner.lock().unwrap().appends.clone()
    }

    pub fn evictions(&self) -> Vec<(f64, f64)> {
        self.inner.lock().unwrap().evictions.clone()
    }

    pub fn duration(&self) -> Option<f64> {
        self.inner.lock().unwrap().duration
    }

    pub fn finalized(&self) -> Option<Option<EndOfStreamReason>> {
        self.inner.lock().unwrap().finalized
    }

    fn parse(data: &[u8]) -> Option<(f64, f64)> {
        let text = std::str::from_utf8(data).ok()?;
        // Undecrypted bytes still play, as corrupt media would
        let text = text.strip_prefix("enc:").unwrap_or(text);
        let (start, duration) = text.split_once(',')?;
        Some((start.parse().ok()?, duration.parse().ok()?))
    }
}

#[async_trait]
impl MediaSink for MockSink {
    fn ready_state(&self) -> SinkState {
        self.inner.lock().unwrap().state
    }

    fn buffered(&self) -> TimeRanges {
        self.inner.lock().unwrap().buffered.clone()
    }

    async fn append(&self, data: Bytes) -> Result<()> {
        let (start, duration) =
            Self::parse(&data).ok_or_else(|| Error::SinkAppend("unreadable chunk".into()))?;
        let mut inner = self.inner.lock().unwrap();
        let start = inner.cursor.unwrap_or(start);
        if inner.cursor.is_some() {
            inner.cursor = Some(start + duration);
        }
        inner.buffered.add(start, start + duration);
        inner.appends.push(data);
        if inner.state == SinkState::Ended {
            inner.state = SinkState::Open;
        }
        Ok(())
    }

    fn evict(&self, start: f64, end: f64) {
        let mut inner = self.inner.lock().unwrap();
        inner.buffered.remove(start, end);
        inner.evictions.push((start, end));
    }

    fn set_timestamp_offset(&self, offset: f64) {
        self.inner.lock().unwrap().cursor = Some(offset);
    }

    fn set_duration(&self, duration: f64) {
        self.inner.lock().unwrap().duration = Some(duration);
    }

    fn finalize(&self, reason: Option<EndOfStreamReason>) {
        let mut inner = self.inner.lock().unwrap();
        inner.finalized = Some(reason);
        inner.state = SinkState::Ended;
    }
}

/// Decryptor that strips the `enc:` marker and records the IVs it saw
#[derive(Debug, Default)]
pub struct MockDecryptor {
    ivs: Mutex<Vec<[u8; 16]>>,
    fail: Mutex<bool>,
}

impl MockDecryptor {
    pub fn ivs(&self) -> Vec<[u8; 16]> {
        self.ivs.lock().unwrap().clone()
    }

    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }
}

#[async_trait]
impl Decryptor for MockDecryptor {
    async fn decrypt(&self, cipher: Bytes, _key: [u8; 16], iv: [u8; 16]) -> Result<Bytes> {
        self.ivs.lock().unwrap().push(iv);
        if *self.fail.lock().unwrap() {
            return Err(Error::Decryption("bad padding".into()));
        }
        match cipher.strip_prefix(b"enc:") {
            Some(plain) => Ok(Bytes::copy_from_slice(plain)),
            None => Err(Error::Decryption("not encrypted".into())),
        }
    }
}

#[derive(Debug, Default)]
struct PlaybackInner {
    current_time: f64,
    seeking: bool,
    surface: Option<Resolution>,
}

/// Playback clock the test moves by hand
#[derive(Debug, Default)]
pub struct MockPlayback {
    inner: Mutex<PlaybackInner>,
}

impl MockPlayback {
    /// Start a seek to `time`
    pub fn seek_to(&self, time: f64) {
        let mut inner = self.inner.lock().unwrap();
        inner.current_time = time;
        inner.seeking = true;
    }

    pub fn set_surface(&self, surface: Resolution) {
        self.inner.lock().unwrap().surface = Some(surface);
    }
}

impl PlaybackClock for MockPlayback {
    fn current_time(&self) -> f64 {
        self.inner.lock().unwrap().current_time
    }

    fn is_seeking(&self) -> bool {
        self.inner.lock().unwrap().seeking
    }

    fn set_current_time(&self, time: f64) {
        self.inner.lock().unwrap().current_time = time;
    }

    fn surface(&self) -> Option<Resolution> {
        self.inner.lock().unwrap().surface
    }
}

/// Engine wired to mock collaborators
pub struct Harness {
    pub engine: Engine,
    pub transport: Arc<MockTransport>,
    pub sink: Arc<MockSink>,
    pub clock: Arc<MockPlayback>,
    pub decryptor: Arc<MockDecryptor>,
}

impl Harness {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_transport(config, MockTransport::new())
    }

    pub fn with_transport(config: EngineConfig, transport: MockTransport) -> Self {
        let transport = Arc::new(transport);
        let sink = Arc::new(MockSink::new());
        let clock = Arc::new(MockPlayback::default());
        let decryptor = Arc::new(MockDecryptor::default());

        let io = Collaborators {
            transport: transport.clone(),
            decryptor: decryptor.clone(),
            sink: sink.clone(),
            clock: clock.clone(),
            loader: Arc::new(StaticPlaylistLoader),
        };
        let engine = Engine::new(config, io, SessionId::new()).unwrap();

        Self {
            engine,
            transport,
            sink,
            clock,
            decryptor,
        }
    }
}
