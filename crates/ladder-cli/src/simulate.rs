//! In-process network, sink and playhead for simulated sessions
//!
//! Chunk bodies carry their own timeline position as `"<start>,<duration>"`.
//! Download time follows each rendition's declared bitrate and the configured
//! throughput, compressed by the simulation rate.

use async_trait::async_trait;
use bytes::Bytes;
use ladder_core::{
    BandwidthEstimate, Chunk, Collaborators, Decryptor, EndOfStreamReason, Error, FetchError,
    FetchRequest, FetchResponse, MasterPlaylist, MediaPlaylist, MediaSink, PlaybackClock,
    Resolution, SinkState, StaticPlaylistLoader, TimeRanges, Transport,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

/// Bitrate assumed for renditions that declare none
const FALLBACK_BITRATE: u64 = 1_000_000;

/// Knobs of a simulated session
#[derive(Debug, Clone)]
pub struct SimulationOptions {
    /// Network throughput in bits per second
    pub throughput: f64,
    pub chunks: usize,
    pub chunk_duration: f64,
    /// Renditions whose chunks answer 503
    pub failing: HashSet<String>,
    pub live: bool,
    /// Simulated seconds per wall-clock second
    pub rate: f64,
    pub timeout: Duration,
}

/// Ladder with chunk lists plus the collaborators serving it
pub struct Simulation {
    pub master: MasterPlaylist,
    pub collaborators: Collaborators,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Give every rendition a chunk list and wire up simulated collaborators
pub fn build(mut master: MasterPlaylist, options: &SimulationOptions) -> Simulation {
    let mut routes = HashMap::new();

    for rendition in master.renditions.iter_mut() {
        let bitrate = rendition.bandwidth.unwrap_or(FALLBACK_BITRATE);
        let failing = options.failing.contains(&rendition.id);
        let mut chunks = Vec::with_capacity(options.chunks);
        let mut start = 0.0;

        for i in 0..options.chunks {
            let uri = rendition
                .uri
                .join(&format!("{}/{}.ts", rendition.id, i))
                .unwrap_or_else(|_| rendition.uri.clone());
            let route = if failing {
                Route::Fail(503)
            } else {
                Route::Serve {
                    body: Bytes::from(format!("{},{}", start, options.chunk_duration)),
                    size: (bitrate as f64 * options.chunk_duration / 8.0) as u64,
                }
            };
            routes.insert(uri.to_string(), route);
            chunks.push(Chunk::new(uri, options.chunk_duration));
            start += options.chunk_duration;
        }

        rendition.media = Some(if options.live {
            MediaPlaylist::live(0, options.chunk_duration, chunks)
        } else {
            MediaPlaylist::new(options.chunk_duration, chunks)
        });
    }

    let sink = Arc::new(SimSink::default());
    let collaborators = Collaborators {
        transport: Arc::new(SimNetwork {
            routes,
            throughput: options.throughput,
            rate: options.rate,
        }),
        decryptor: Arc::new(PassthroughDecryptor),
        sink: sink.clone(),
        clock: Arc::new(SimPlayhead::new(sink, options.rate)),
        loader: Arc::new(StaticPlaylistLoader),
    };

    Simulation {
        master,
        collaborators,
    }
}

#[derive(Debug, Clone)]
enum Route {
    Serve { body: Bytes, size: u64 },
    Fail(u16),
}

/// Network with a fixed throughput
struct SimNetwork {
    routes: HashMap<String, Route>,
    throughput: f64,
    rate: f64,
}

#[async_trait]
impl Transport for SimNetwork {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let (body, size) = match self.routes.get(request.uri.as_str()) {
            Some(Route::Serve { body, size }) => (body.clone(), *size),
            Some(Route::Fail(status)) => return Err(FetchError::Status { status: *status }),
            None => return Err(FetchError::Status { status: 404 }),
        };

        let transfer = Duration::from_secs_f64(size as f64 * 8.0 / self.throughput.max(1.0));
        tokio::time::sleep(transfer.div_f64(self.rate.max(1.0))).await;
        debug!(uri = %request.uri, bytes = size, transfer_ms = transfer.as_millis(), "Simulated download");

        Ok(FetchResponse {
            status: 200,
            bytes: body,
            bandwidth: BandwidthEstimate::throughput(size as usize, transfer),
            round_trip: transfer,
        })
    }
}

/// Simulated content is never encrypted
struct PassthroughDecryptor;

#[async_trait]
impl Decryptor for PassthroughDecryptor {
    async fn decrypt(&self, cipher: Bytes, _key: [u8; 16], _iv: [u8; 16]) -> ladder_core::Result<Bytes> {
        Ok(cipher)
    }
}

#[derive(Debug, Default)]
struct SinkInner {
    state: SinkState,
    buffered: TimeRanges,
    cursor: Option<f64>,
}

/// Sink that only tracks buffered ranges
#[derive(Debug)]
struct SimSink {
    inner: Mutex<SinkInner>,
}

impl Default for SimSink {
    fn default() -> Self {
        Self {
            inner: Mutex::new(SinkInner {
                state: SinkState::Open,
                ..Default::default()
            }),
        }
    }
}

#[async_trait]
impl MediaSink for SimSink {
    fn ready_state(&self) -> SinkState {
        lock(&self.inner).state
    }

    fn buffered(&self) -> TimeRanges {
        lock(&self.inner).buffered.clone()
    }

    async fn append(&self, data: Bytes) -> ladder_core::Result<()> {
        let text = std::str::from_utf8(&data).map_err(|e| Error::SinkAppend(e.to_string()))?;
        let (start, duration) = text
            .split_once(',')
            .and_then(|(s, d)| Some((s.parse::<f64>().ok()?, d.parse::<f64>().ok()?)))
            .ok_or_else(|| Error::SinkAppend(format!("unreadable chunk '{}'", text)))?;

        let mut inner = lock(&self.inner);
        let start = match inner.cursor {
            Some(cursor) => {
                inner.cursor = Some(cursor + duration);
                cursor
            }
            None => start,
        };
        inner.buffered.add(start, start + duration);
        if inner.state == SinkState::Ended {
            inner.state = SinkState::Open;
        }
        Ok(())
    }

    fn evict(&self, start: f64, end: f64) {
        lock(&self.inner).buffered.remove(start, end);
    }

    fn set_timestamp_offset(&self, offset: f64) {
        lock(&self.inner).cursor = Some(offset);
    }

    fn set_duration(&self, duration: f64) {
        debug!(duration, "Simulated sink duration");
    }

    fn finalize(&self, reason: Option<EndOfStreamReason>) {
        debug!(reason = ?reason, "Simulated sink finalized");
        lock(&self.inner).state = SinkState::Ended;
    }
}

#[derive(Debug)]
struct Playhead {
    position: f64,
    since: Instant,
}

/// Playhead advancing at the simulation rate while media is buffered
struct SimPlayhead {
    sink: Arc<SimSink>,
    rate: f64,
    state: Mutex<Playhead>,
}

impl SimPlayhead {
    fn new(sink: Arc<SimSink>, rate: f64) -> Self {
        Self {
            sink,
            rate,
            state: Mutex::new(Playhead {
                position: 0.0,
                since: Instant::now(),
            }),
        }
    }
}

impl PlaybackClock for SimPlayhead {
    fn current_time(&self) -> f64 {
        let buffered = self.sink.buffered();
        let mut playhead = lock(&self.state);
        let advanced = playhead.position + playhead.since.elapsed().as_secs_f64() * self.rate;
        // Playback stalls at the end of the buffered range
        if let Some(range) = buffered.range_for(playhead.position) {
            playhead.position = advanced.min(range.end).max(playhead.position);
        }
        playhead.since = Instant::now();
        playhead.position
    }

    fn is_seeking(&self) -> bool {
        false
    }

    fn set_current_time(&self, time: f64) {
        let mut playhead = lock(&self.state);
        playhead.position = time;
        playhead.since = Instant::now();
    }

    fn surface(&self) -> Option<Resolution> {
        None
    }
}
