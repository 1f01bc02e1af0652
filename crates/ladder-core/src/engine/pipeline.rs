//! Chunk fetch pipeline
//!
//! A pending chunk moves through `Requesting -> Received -> (Decrypting) ->
//! Appending`. Each step that suspends runs as an engine task tagged with the
//! chunk's generation; a completion whose generation no longer matches the
//! pending chunk is stale and dropped.

use super::{Completion, Engine, FetchPhase, InFlightFetch, Payload};
use crate::{
    error::{FailureClass, RenditionFailure},
    events::{StreamEvent, SwitchReason},
    keys::{derive_iv, KeyStatus},
    timeline,
    transport::{FetchError, FetchRequest, FetchResponse},
    Error, Result,
};
use bytes::Bytes;
use tracing::{debug, warn};

/// What draining the pending chunk should do next
enum DrainStep {
    Wait,
    FetchKey(url::Url),
    KeyFailed { rendition: String, url: String },
    Decrypt {
        cipher: Bytes,
        key: [u8; 16],
        iv: [u8; 16],
    },
    Append(Bytes),
}

impl Engine {
    /// Issue the request for `fetch` and make it the pending chunk
    pub(super) fn load_segment(&mut self, mut fetch: InFlightFetch) {
        self.evict_back_buffer();
        if let Some(key) = &fetch.chunk.key {
            self.fetch_key(key.uri.clone());
        }

        fetch.generation = self.state.next_generation();
        let timeout = self.config.chunk_timeout(fetch.chunk.duration);
        let request = FetchRequest::chunk(
            fetch.chunk.uri.clone(),
            timeout,
            fetch.chunk.byte_range,
        );
        let transport = self.io.transport.clone();
        let generation = fetch.generation;

        let handle = self.tasks.spawn(async move {
            let result = match tokio::time::timeout(timeout, transport.fetch(request)).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::TimedOut),
            };
            Completion::Chunk { generation, result }
        });
        fetch.abort = Some(handle);

        debug!(
            rendition = %fetch.rendition,
            sequence = fetch.sequence(),
            uri = %fetch.chunk.uri,
            timeout_ms = timeout.as_millis(),
            offset = ?fetch.timestamp_offset,
            "Requesting chunk"
        );
        self.events.emit(StreamEvent::ChunkRequested {
            rendition: fetch.rendition.clone(),
            sequence: fetch.sequence(),
            uri: fetch.chunk.uri.to_string(),
        });
        self.state.pending = Some(fetch);
    }

    /// Drop media the playhead has left behind
    fn evict_back_buffer(&mut self) {
        if self.state.sink_busy {
            return;
        }
        let current_time = self.io.clock.current_time();
        let seekable_start = self
            .active_media()
            .and_then(timeline::seekable)
            .map(|window| window.start);

        match seekable_start {
            Some(start) if start > 0.0 && start < current_time => {
                self.io.sink.evict(0.0, start);
            }
            _ => {
                let cutoff = current_time - self.config.back_buffer_length;
                if cutoff > 0.0 {
                    self.io.sink.evict(0.0, cutoff);
                }
            }
        }
    }

    pub(super) fn on_chunk_complete(
        &mut self,
        generation: u64,
        result: std::result::Result<FetchResponse, FetchError>,
    ) {
        let is_current = matches!(
            &self.state.pending,
            Some(p) if p.generation == generation && matches!(p.phase, FetchPhase::Requesting)
        );
        if !is_current {
            debug!(generation, "Discarding stale chunk response");
            return;
        }

        let response = match result {
            Ok(response) => response,
            Err(FetchError::Aborted) => {
                debug!(generation, "Chunk request aborted");
                self.state.pending = None;
                return;
            }
            Err(FetchError::TimedOut) => {
                self.on_chunk_timeout();
                return;
            }
            Err(e) => {
                let Some(pending) = self.state.pending.take() else {
                    return;
                };
                let status = e.status();
                warn!(
                    rendition = %pending.rendition,
                    sequence = pending.sequence(),
                    error = %e,
                    "Chunk request failed"
                );
                let error = Error::ChunkRequest {
                    url: pending.chunk.uri.to_string(),
                    status,
                    class: FailureClass::from_status(status),
                };
                self.blacklist(RenditionFailure::new(Some(pending.rendition), error));
                return;
            }
        };

        self.state.bandwidth.record(response.bandwidth);
        self.events.emit(StreamEvent::BandwidthSample {
            bits_per_second: self.state.bandwidth.bits_per_second(),
        });

        if let Some(pending) = self.state.pending.as_mut() {
            debug!(
                sequence = pending.sequence(),
                bytes = response.bytes.len(),
                round_trip_ms = response.round_trip.as_millis(),
                bandwidth = response.bandwidth,
                "Chunk received"
            );
            let payload = if pending.chunk.key.is_some() {
                Payload::Encrypted(response.bytes)
            } else {
                Payload::Plain(response.bytes)
            };
            pending.phase = FetchPhase::Received(payload);
            pending.abort = None;
            self.state.last_fetched = Some(pending.chunk.clone());
        }

        self.drain_buffer();
        self.reselect(SwitchReason::Bandwidth);
    }

    /// A chunk that takes longer than its timeout means bandwidth collapsed
    fn on_chunk_timeout(&mut self) {
        if let Some(pending) = self.state.pending.take() {
            warn!(
                rendition = %pending.rendition,
                sequence = pending.sequence(),
                "Chunk request timed out, dropping bandwidth estimate"
            );
            let error = Error::ChunkTimeout {
                url: pending.chunk.uri.to_string(),
            };
            self.events.emit(StreamEvent::Error {
                code: error.error_code().to_string(),
                message: error.to_string(),
                fatal: false,
            });
        }
        self.state.bandwidth.drop_to_minimum();
        self.events.emit(StreamEvent::BandwidthSample {
            bits_per_second: self.state.bandwidth.bits_per_second(),
        });
        self.reselect(SwitchReason::Timeout);
    }

    /// Move the pending chunk one step closer to the sink
    pub(super) fn drain_buffer(&mut self) {
        if self.state.sink_busy {
            return;
        }

        let step = match &self.state.pending {
            None => DrainStep::Wait,
            Some(pending) => match &pending.phase {
                FetchPhase::Requesting
                | FetchPhase::Decrypting { .. }
                | FetchPhase::Appending { .. } => DrainStep::Wait,
                FetchPhase::Received(Payload::Plain(bytes)) => DrainStep::Append(bytes.clone()),
                FetchPhase::Received(Payload::Encrypted(cipher)) => match &pending.chunk.key {
                    None => DrainStep::Append(cipher.clone()),
                    Some(key) => match self.state.keys.status(&key.uri) {
                        KeyStatus::Failed => DrainStep::KeyFailed {
                            rendition: pending.rendition.clone(),
                            url: key.uri.to_string(),
                        },
                        KeyStatus::Missing => DrainStep::FetchKey(key.uri.clone()),
                        KeyStatus::Ready(bytes) => DrainStep::Decrypt {
                            cipher: cipher.clone(),
                            key: bytes,
                            iv: derive_iv(key, pending.sequence()),
                        },
                    },
                },
            },
        };

        match step {
            DrainStep::Wait => {}
            DrainStep::FetchKey(uri) => self.fetch_key(uri),
            DrainStep::KeyFailed { rendition, url } => {
                self.state.pending = None;
                self.blacklist(RenditionFailure::new(
                    Some(rendition),
                    Error::KeyUnavailable { url },
                ));
            }
            DrainStep::Decrypt { cipher, key, iv } => self.start_decrypt(cipher, key, iv),
            DrainStep::Append(bytes) => self.append_pending(bytes),
        }
    }

    fn start_decrypt(&mut self, cipher: Bytes, key: [u8; 16], iv: [u8; 16]) {
        let Some(pending) = self.state.pending.as_mut() else {
            return;
        };
        pending.phase = FetchPhase::Decrypting {
            cipher: cipher.clone(),
        };
        let generation = pending.generation;
        let decryptor = self.io.decryptor.clone();
        self.tasks.spawn(async move {
            let result = decryptor.decrypt(cipher, key, iv).await;
            Completion::Decrypt { generation, result }
        });
    }

    pub(super) fn on_decrypt_complete(&mut self, generation: u64, result: Result<Bytes>) {
        let Some(pending) = self
            .state
            .pending
            .as_mut()
            .filter(|p| p.generation == generation)
        else {
            debug!(generation, "Discarding stale decryption result");
            return;
        };
        let FetchPhase::Decrypting { cipher } = &pending.phase else {
            return;
        };

        let plain = match result {
            Ok(plain) => plain,
            Err(e) => {
                warn!(
                    sequence = pending.sequence(),
                    error = %e,
                    "Decryption failed, appending cipher bytes"
                );
                let bytes = cipher.clone();
                let error = Error::Decryption(e.to_string());
                self.events.emit(StreamEvent::Error {
                    code: error.error_code().to_string(),
                    message: error.to_string(),
                    fatal: false,
                });
                bytes
            }
        };

        if let Some(pending) = self.state.pending.as_mut() {
            pending.phase = FetchPhase::Received(Payload::Plain(plain));
        }
        self.drain_buffer();
    }

    /// Snapshot the buffer, apply the offset and hand the bytes to the sink
    fn append_pending(&mut self, bytes: Bytes) {
        let Some(pending) = self.state.pending.as_mut() else {
            return;
        };
        let before = self.io.sink.buffered();
        if let Some(offset) = pending.timestamp_offset {
            self.io.sink.set_timestamp_offset(offset);
        }
        pending.phase = FetchPhase::Appending { before };
        let generation = pending.generation;

        debug!(
            rendition = %pending.rendition,
            sequence = pending.sequence(),
            bytes = bytes.len(),
            "Appending chunk"
        );

        self.state.sink_busy = true;
        let sink = self.io.sink.clone();
        self.tasks.spawn(async move {
            let result = sink.append(bytes).await;
            Completion::Append { generation, result }
        });
    }
}
