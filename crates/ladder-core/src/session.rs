//! Player Session - handle to a running engine
//!
//! Spawns the [`Engine`] on its own task and talks to it through a command
//! channel. Phase changes are observed through a watch channel and stream
//! events through a broadcast channel.

use crate::{
    engine::{Collaborators, Command, Engine},
    events::StreamEventRecord,
    playlist::PlaylistEvent,
    types::*,
    EngineConfig, Error, Result,
};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

/// Commands buffered before senders wait on the engine
pub const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Player session driving a single program
pub struct PlayerSession {
    /// Unique session ID
    id: SessionId,
    /// Command channel into the engine task
    commands: mpsc::Sender<Command>,
    /// Latest engine phase
    phase_rx: watch::Receiver<SessionPhase>,
    /// Stream event broadcaster
    events_tx: broadcast::Sender<StreamEventRecord>,
    /// Engine task
    task: Option<JoinHandle<()>>,
}

impl PlayerSession {
    /// Create an engine and start driving it on the current runtime
    pub fn spawn(config: EngineConfig, io: Collaborators) -> Result<Self> {
        let id = SessionId::new();
        let engine = Engine::new(config, io, id)?;
        let phase_rx = engine.subscribe_phase();
        let events_tx = engine.event_sender();
        let (commands, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);

        let task = tokio::spawn(engine.run(rx));
        info!(session_id = %id, "Session started");

        Ok(Self {
            id,
            commands,
            phase_rx,
            events_tx,
            task: Some(task),
        })
    }

    /// Get session ID
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current engine phase
    pub fn phase(&self) -> SessionPhase {
        self.phase_rx.borrow().clone()
    }

    /// Subscribe to phase changes
    pub fn subscribe_phase(&self) -> watch::Receiver<SessionPhase> {
        self.phase_rx.clone()
    }

    /// Subscribe to stream events
    pub fn subscribe_events(&self) -> broadcast::Receiver<StreamEventRecord> {
        self.events_tx.subscribe()
    }

    /// Wait until the engine reaches a phase matching `predicate`
    pub async fn wait_for_phase(
        &self,
        predicate: impl FnMut(&SessionPhase) -> bool,
    ) -> Result<SessionPhase> {
        let mut rx = self.phase_rx.clone();
        let phase = rx
            .wait_for(predicate)
            .await
            .map_err(|_| Error::Internal("engine task stopped".into()))?;
        Ok(phase.clone())
    }

    /// Hand the rendition list to the engine
    pub async fn load_master(&self, master: MasterPlaylist) -> Result<()> {
        self.playlist_event(PlaylistEvent::MasterLoaded(master)).await
    }

    /// Forward a notification from the playlist source
    pub async fn playlist_event(&self, event: PlaylistEvent) -> Result<()> {
        self.send(Command::Playlist(event)).await
    }

    /// Allow chunk loading and start filling the buffer
    #[instrument(skip(self))]
    pub async fn play(&self) -> Result<()> {
        self.send(Command::Play).await
    }

    /// Tell the engine the playhead moved to `time`
    #[instrument(skip(self))]
    pub async fn seek(&self, time: f64) -> Result<()> {
        self.send(Command::Seek(time)).await
    }

    pub async fn set_preload(&self, policy: PreloadPolicy) -> Result<()> {
        self.send(Command::SetPreload(policy)).await
    }

    /// Stop the engine and wait for its task to finish
    pub async fn stop(mut self) -> Result<()> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        // A closed channel means the engine already exited
        let _ = self.commands.send(Command::Stop).await;
        task.await
            .map_err(|e| Error::Internal(format!("engine task failed: {}", e)))?;
        info!(session_id = %self.id, "Session stopped");
        Ok(())
    }

    async fn send(&self, command: Command) -> Result<()> {
        debug!(?command, "Sending command");
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::Internal("engine task stopped".into()))
    }
}

impl Drop for PlayerSession {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
