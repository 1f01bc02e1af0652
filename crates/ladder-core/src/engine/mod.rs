//! Streaming engine
//!
//! The [`Engine`] owns all per-session state and is driven by a single tokio
//! task. Network requests, decryption and sink appends run as tasks in a
//! [`JoinSet`]; their completions come back through the same loop as consumer
//! commands and the periodic buffer check, so every decision runs with
//! exclusive access to [`SessionState`].
//!
//! The work is split by concern:
//! - `scheduler`: deciding whether, and which chunk, to fetch
//! - `pipeline`: fetching, decrypting and appending the pending chunk
//! - `failover`: excluding failing renditions and fatal errors
//! - `reconcile`: learning real chunk timing from appends
//! - `key_fetch`: downloading key material

mod failover;
mod key_fetch;
mod pipeline;
mod reconcile;
mod scheduler;

use crate::{
    abr::{AbrAlgorithm, AbrContext, BandwidthEstimate, VarianceSelector},
    config::EngineConfig,
    decrypt::Decryptor,
    error::RenditionFailure,
    events::{EventEmitter, StreamEvent, StreamEventRecord, SwitchReason},
    keys::KeyStore,
    playlist::{merge_refresh, PlaylistEvent, PlaylistLoader, SwitchStatus},
    sink::{MediaSink, PlaybackClock},
    time_ranges::TimeRanges,
    timeline,
    transport::{FetchError, FetchResponse, Transport},
    types::*,
    Error, Result,
};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::{AbortHandle, JoinSet};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};
use url::Url;

/// External collaborators the engine drives
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub decryptor: Arc<dyn Decryptor>,
    pub sink: Arc<dyn MediaSink>,
    pub clock: Arc<dyn PlaybackClock>,
    pub loader: Arc<dyn PlaylistLoader>,
}

/// Requests sent to a running engine
#[derive(Debug, Clone)]
pub enum Command {
    /// Notification from the playlist source
    Playlist(PlaylistEvent),
    /// The consumer asked to play
    Play,
    /// The playhead was moved to the given position
    Seek(f64),
    SetPreload(PreloadPolicy),
    Stop,
}

/// Chunk bytes, either still encrypted or ready for the sink
#[derive(Debug, Clone)]
pub enum Payload {
    Encrypted(Bytes),
    Plain(Bytes),
}

/// Where the pending chunk is in its journey to the sink
#[derive(Debug, Clone)]
pub enum FetchPhase {
    Requesting,
    Received(Payload),
    Decrypting { cipher: Bytes },
    /// Handed to the sink; `before` is the buffered state at append time
    Appending { before: TimeRanges },
}

/// The one chunk currently being fetched or processed
#[derive(Debug)]
pub struct InFlightFetch {
    pub generation: u64,
    /// Rendition the chunk was requested from
    pub rendition: String,
    /// Media sequence of the chunk list at request time
    pub media_sequence: u64,
    pub index: usize,
    pub chunk: Chunk,
    /// Offset to apply before appending; `None` continues the current timeline
    pub timestamp_offset: Option<f64>,
    pub phase: FetchPhase,
    abort: Option<AbortHandle>,
}

impl InFlightFetch {
    /// Absolute sequence number of the chunk
    pub fn sequence(&self) -> u64 {
        self.media_sequence + self.index as u64
    }
}

/// The one key download currently running
#[derive(Debug)]
pub struct KeyFetch {
    pub generation: u64,
    pub uri: Url,
    abort: AbortHandle,
}

/// All mutable per-session state
#[derive(Debug)]
pub struct SessionState {
    pub phase: SessionPhase,
    pub loading: LoadingPermission,
    pub preload: PreloadPolicy,
    pub master: Option<MasterPlaylist>,
    /// Identifier of the active rendition
    pub active: Option<String>,
    pub bandwidth: BandwidthEstimate,
    pub pending: Option<InFlightFetch>,
    /// Last chunk fetched successfully
    pub last_fetched: Option<Chunk>,
    pub keys: KeyStore,
    pub key_fetch: Option<KeyFetch>,
    /// An append is running in the sink
    pub sink_busy: bool,
    /// Terminal error, once the session failed
    pub error: Option<Error>,
    metadata_announced: bool,
    live_started: bool,
    next_generation: u64,
}

impl SessionState {
    fn new(config: &EngineConfig) -> Self {
        Self {
            phase: SessionPhase::Idle,
            loading: config.preload.initial_permission(),
            preload: config.preload,
            master: None,
            active: None,
            bandwidth: BandwidthEstimate::new(config.initial_bandwidth),
            pending: None,
            last_fetched: None,
            keys: KeyStore::new(config.max_key_retries),
            key_fetch: None,
            sink_busy: false,
            error: None,
            metadata_announced: false,
            live_started: false,
            next_generation: 0,
        }
    }

    fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }
}

/// Outcome of a task spawned by the engine
pub(crate) enum Completion {
    Chunk {
        generation: u64,
        result: std::result::Result<FetchResponse, FetchError>,
    },
    Key {
        generation: u64,
        uri: Url,
        result: std::result::Result<FetchResponse, FetchError>,
    },
    Decrypt {
        generation: u64,
        result: Result<Bytes>,
    },
    Append {
        generation: u64,
        result: Result<()>,
    },
}

/// Buffering and selection control engine for one session
pub struct Engine {
    config: EngineConfig,
    state: SessionState,
    selector: Box<dyn AbrAlgorithm>,
    io: Collaborators,
    tasks: JoinSet<Completion>,
    events: EventEmitter,
    phase_tx: watch::Sender<SessionPhase>,
}

impl Engine {
    /// Create an engine with the default selector
    pub fn new(config: EngineConfig, io: Collaborators, session_id: SessionId) -> Result<Self> {
        config.validate()?;
        let selector = Box::new(VarianceSelector::new(config.bandwidth_variance));
        let (phase_tx, _) = watch::channel(SessionPhase::Idle);

        Ok(Self {
            state: SessionState::new(&config),
            config,
            selector,
            io,
            tasks: JoinSet::new(),
            events: EventEmitter::new(session_id),
            phase_tx,
        })
    }

    /// Replace the rendition selector
    pub fn with_selector(mut self, selector: Box<dyn AbrAlgorithm>) -> Self {
        self.selector = selector;
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn phase(&self) -> &SessionPhase {
        &self.state.phase
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<SessionPhase> {
        self.phase_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<StreamEventRecord> {
        self.events.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<StreamEventRecord> {
        self.events.sender()
    }

    /// Drive the engine until `Stop` is received or every sender is dropped
    #[instrument(skip_all)]
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let mut ticker = interval(self.config.check_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Stop) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => match joined {
                    Ok(completion) => self.handle_completion(completion),
                    Err(e) if e.is_cancelled() => {}
                    Err(e) => error!(error = %e, "Engine task panicked"),
                },
                _ = ticker.tick() => self.check_buffer(),
            }
        }

        self.shutdown();
    }

    /// Apply one command
    pub fn handle_command(&mut self, command: Command) {
        if self.state.phase == SessionPhase::Failed && !matches!(command, Command::Stop) {
            debug!(?command, "Ignoring command on failed session");
            return;
        }
        match command {
            Command::Playlist(event) => self.on_playlist_event(event),
            Command::Play => self.on_play(),
            Command::Seek(time) => self.on_seek(time),
            Command::SetPreload(policy) => self.on_set_preload(policy),
            Command::Stop => self.shutdown(),
        }
    }

    pub(crate) fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Chunk { generation, result } => self.on_chunk_complete(generation, result),
            Completion::Key {
                generation,
                uri,
                result,
            } => self.on_key_complete(generation, uri, result),
            Completion::Decrypt { generation, result } => {
                self.on_decrypt_complete(generation, result)
            }
            Completion::Append { generation, result } => {
                self.on_append_complete(generation, result)
            }
        }
    }

    fn shutdown(&mut self) {
        self.cancel_pending();
        self.cancel_key_fetch();
        self.tasks.abort_all();
        let _ = self.set_phase(SessionPhase::Idle);
        info!("Engine stopped");
    }

    /// Transition to a new phase
    fn set_phase(&mut self, next: SessionPhase) -> Result<()> {
        let current = self.state.phase.clone();
        if current == next {
            return Ok(());
        }
        if !current.can_transition_to(&next) {
            warn!(from = %current, to = %next, "Rejected session phase transition");
            return Err(Error::InvalidStateTransition {
                from: current.to_string(),
                to: next.to_string(),
            });
        }

        info!(from = %current, to = %next, "Session phase transition");
        self.state.phase = next.clone();
        self.phase_tx.send_replace(next.clone());
        self.events.emit(StreamEvent::PhaseChange {
            from: current.to_string(),
            to: next.to_string(),
        });
        Ok(())
    }

    fn active_rendition(&self) -> Option<&Rendition> {
        let id = self.state.active.as_deref()?;
        self.state.master.as_ref()?.get(id)
    }

    fn active_media(&self) -> Option<&MediaPlaylist> {
        self.active_rendition()?.media.as_ref()
    }

    /// Run the selector against the current estimate and exclusions
    fn select(&self) -> Option<String> {
        let master = self.state.master.as_ref()?;
        let context = AbrContext {
            bandwidth: self.state.bandwidth.bits_per_second(),
            surface: self.io.clock.surface(),
            now: Instant::now(),
        };
        self.selector
            .select_rendition(&master.renditions, &context)
            .map(|r| r.id.clone())
    }

    /// Switch to whatever the selector prefers now
    fn reselect(&mut self, reason: SwitchReason) {
        if let Some(id) = self.select() {
            self.switch_to(id, reason);
        }
    }

    /// Make `id` the active rendition
    fn switch_to(&mut self, id: String, reason: SwitchReason) {
        if self.state.active.as_deref() == Some(id.as_str()) {
            return;
        }
        let Some(rendition) = self.state.master.as_ref().and_then(|m| m.get(&id)) else {
            return;
        };
        let status = self.io.loader.switch_to(rendition);

        info!(
            from = ?self.state.active,
            to = %id,
            bandwidth = ?rendition.bandwidth,
            reason = ?reason,
            "Switching rendition"
        );
        let from = self.state.active.replace(id.clone());
        self.events.emit(StreamEvent::RenditionSwitch {
            from,
            to: id.clone(),
            reason,
        });

        match status {
            SwitchStatus::Settled => self.settle_switch(),
            SwitchStatus::Pending => {
                let _ = self.set_phase(SessionPhase::Switching { to: id });
            }
        }
    }

    fn settle_switch(&mut self) {
        if matches!(
            self.state.phase,
            SessionPhase::Idle | SessionPhase::Switching { .. }
        ) {
            let _ = self.set_phase(SessionPhase::Ready);
        }
        self.on_metadata_ready();
        self.fill(None);
    }

    fn on_playlist_event(&mut self, event: PlaylistEvent) {
        match event {
            PlaylistEvent::MasterLoaded(master) => self.on_master_loaded(master),
            PlaylistEvent::RenditionUpdated { id, media } => self.on_rendition_updated(id, media),
            PlaylistEvent::RenditionChanged { id } => self.on_rendition_changed(id),
            PlaylistEvent::LoadError { rendition, message } => {
                if self.state.master.is_none() {
                    self.fatal(Error::MasterLoad(message));
                    return;
                }
                let error = Error::PlaylistLoad {
                    rendition: rendition.clone().unwrap_or_default(),
                    message,
                };
                self.blacklist(RenditionFailure::new(rendition, error));
            }
        }
    }

    #[instrument(skip(self, master), fields(renditions = master.renditions.len()))]
    fn on_master_loaded(&mut self, master: MasterPlaylist) {
        if master.is_empty() {
            self.fatal(Error::MasterLoad("no renditions listed".into()));
            return;
        }
        self.state.master = Some(master);
        self.state.active = None;
        self.state.metadata_announced = false;

        match self.select() {
            Some(id) => self.switch_to(id, SwitchReason::Initial),
            None => self.fatal(Error::NoSuitableRendition),
        }
    }

    fn on_rendition_updated(&mut self, id: String, media: MediaPlaylist) {
        let Some(rendition) = self.state.master.as_mut().and_then(|m| m.get_mut(&id)) else {
            warn!(rendition = %id, "Chunk list for unknown rendition");
            return;
        };
        let merged = match rendition.media.as_ref() {
            Some(previous) => merge_refresh(previous, media),
            None => media,
        };
        debug!(
            rendition = %id,
            chunks = merged.len(),
            complete = merged.is_complete(),
            "Chunk list updated"
        );
        rendition.media = Some(merged);

        if self.state.active.as_deref() == Some(id.as_str()) {
            self.on_metadata_ready();
            self.fill(None);
        }
    }

    fn on_rendition_changed(&mut self, id: String) {
        match &self.state.phase {
            SessionPhase::Switching { to } if *to == id => self.settle_switch(),
            _ => debug!(rendition = %id, "Ignoring unexpected rendition change"),
        }
    }

    /// First time the active chunk list is known
    fn on_metadata_ready(&mut self) {
        if self.state.metadata_announced {
            return;
        }
        let Some(media) = self.active_media() else {
            return;
        };
        let is_live = !media.is_complete();
        let duration = media.is_complete().then(|| timeline::total_duration(media));
        let renditions = self
            .state
            .master
            .as_ref()
            .map(|m| m.renditions.len())
            .unwrap_or(0);
        self.state.metadata_announced = true;

        if let Some(duration) = duration {
            self.io.sink.set_duration(duration);
        }
        if self.state.preload == PreloadPolicy::Auto && !is_live {
            self.state.loading = LoadingPermission::Segments;
        }

        info!(renditions, is_live, duration = ?duration, "Metadata loaded");
        self.events.emit(StreamEvent::MetadataLoaded {
            renditions,
            is_live,
            duration,
        });
        self.maybe_start_live();
    }

    /// Jump to the live point the first time a growing program may load
    fn maybe_start_live(&mut self) {
        if self.state.live_started || self.state.loading != LoadingPermission::Segments {
            return;
        }
        let Some(media) = self.active_media() else {
            return;
        };
        if media.is_complete() {
            return;
        }
        let Some(window) = timeline::seekable(media) else {
            return;
        };
        self.state.live_started = true;
        info!(position = window.end, "Starting at live point");
        self.io.clock.set_current_time(window.end);
    }

    #[instrument(skip(self))]
    fn on_play(&mut self) {
        self.state.loading = LoadingPermission::Segments;
        self.maybe_start_live();
        self.check_buffer();
    }

    #[instrument(skip(self))]
    fn on_seek(&mut self, time: f64) {
        if self.state.phase == SessionPhase::Ended {
            let _ = self.set_phase(SessionPhase::Ready);
        }

        let buffered = self.io.sink.buffered();
        if buffered.range_for(time).is_some() {
            debug!("Seek target already buffered");
            self.check_buffer();
            return;
        }

        self.cancel_pending();
        self.cancel_key_fetch();
        let target = self
            .active_media()
            .map(|media| timeline::index_for_time(media, time));
        info!(target = ?target, "Seek outside buffered data, restarting fill");
        self.fill(target);
    }

    fn on_set_preload(&mut self, policy: PreloadPolicy) {
        self.state.preload = policy;
        if self.state.loading != LoadingPermission::Segments {
            self.state.loading = policy.initial_permission();
            let complete = self.active_media().is_some_and(|m| m.is_complete());
            if policy == PreloadPolicy::Auto && complete {
                self.state.loading = LoadingPermission::Segments;
            }
        }
        self.check_buffer();
    }

    /// Drop the pending chunk, aborting its request
    fn cancel_pending(&mut self) {
        if let Some(pending) = self.state.pending.take() {
            debug!(sequence = pending.sequence(), "Cancelling pending chunk");
            if let Some(handle) = pending.abort {
                handle.abort();
            }
        }
    }

    fn cancel_key_fetch(&mut self) {
        if let Some(fetch) = self.state.key_fetch.take() {
            debug!(uri = %fetch.uri, "Cancelling key request");
            fetch.abort.abort();
        }
    }

    /// Process task completions until nothing is running
    #[cfg(test)]
    pub(crate) async fn settle(&mut self) {
        while let Some(joined) = self.tasks.join_next().await {
            if let Ok(completion) = joined {
                self.handle_completion(completion);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn running_tasks(&self) -> usize {
        self.tasks.len()
    }
}
