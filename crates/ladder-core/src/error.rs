//! Error types for Ladder Core

use std::fmt;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Engine error types
#[derive(Error, Debug)]
pub enum Error {
    // Playlist errors
    #[error("Failed to load master playlist: {0}")]
    MasterLoad(String),

    #[error("Failed to load playlist for rendition {rendition}: {message}")]
    PlaylistLoad { rendition: String, message: String },

    #[error("No suitable rendition found")]
    NoSuitableRendition,

    // Chunk errors
    #[error("Chunk request failed ({class}) for {url}")]
    ChunkRequest {
        url: String,
        status: Option<u16>,
        class: FailureClass,
    },

    #[error("Chunk timeout: {url}")]
    ChunkTimeout { url: String },

    #[error("Decryption key unavailable: {url}")]
    KeyUnavailable { url: String },

    #[error("Chunk decryption failed: {0}")]
    Decryption(String),

    // Sink errors
    #[error("Buffer append failed: {0}")]
    SinkAppend(String),

    // Engine state errors
    #[error("Invalid session state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns true if the engine can keep streaming after this error,
    /// possibly on another rendition
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::PlaylistLoad { .. }
                | Error::ChunkRequest { .. }
                | Error::ChunkTimeout { .. }
                | Error::KeyUnavailable { .. }
                | Error::Decryption(_)
        )
    }

    /// Returns the error code used in emitted events
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::MasterLoad(_) => "MASTER_LOAD",
            Error::PlaylistLoad { .. } => "PLAYLIST_LOAD",
            Error::NoSuitableRendition => "NO_RENDITION",
            Error::ChunkRequest {
                class: FailureClass::Server,
                ..
            } => "CHUNK_SERVER",
            Error::ChunkRequest {
                class: FailureClass::Client,
                ..
            } => "CHUNK_CLIENT",
            Error::ChunkTimeout { .. } => "CHUNK_TIMEOUT",
            Error::KeyUnavailable { .. } => "KEY_UNAVAILABLE",
            Error::Decryption(_) => "DECRYPT",
            Error::SinkAppend(_) => "SINK_APPEND",
            Error::InvalidStateTransition { .. } => "INVALID_STATE",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::Internal(_) => "INTERNAL",
        }
    }
}

/// Which side of the connection a failed request is blamed on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The server answered with a 5xx status
    Server,
    /// Anything else, including failures that never produced a status
    Client,
}

impl FailureClass {
    pub fn from_status(status: Option<u16>) -> Self {
        match status {
            Some(s) if s >= 500 => FailureClass::Server,
            _ => FailureClass::Client,
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureClass::Server => write!(f, "server"),
            FailureClass::Client => write!(f, "client"),
        }
    }
}

/// A failure attributed to a rendition, handed to the failover logic.
///
/// When `rendition` is `None` the currently active rendition is blamed.
#[derive(Debug)]
pub struct RenditionFailure {
    pub rendition: Option<String>,
    pub error: Error,
}

impl RenditionFailure {
    pub fn new(rendition: Option<String>, error: Error) -> Self {
        Self { rendition, error }
    }

    /// Failure blamed on whichever rendition is active
    pub fn active(error: Error) -> Self {
        Self {
            rendition: None,
            error,
        }
    }
}
