//! Ladder Core - Adaptive Bitrate Streaming Engine
//!
//! This crate provides the control core of an adaptive-bitrate streaming
//! client:
//! - Rendition selection from bandwidth and display surface
//! - Buffer filling, one chunk at a time
//! - Chunk fetch pipeline with optional decryption
//! - Failover by time-limited rendition exclusion
//! - Timeline reconciliation from observed buffered ranges
//! - Key fetching with bounded retries
//!
//! Playlist parsing, media decoding and the network stack stay outside the
//! engine and are reached through the traits in [`transport`], [`sink`],
//! [`decrypt`] and [`playlist`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Ladder Core                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐          │
//! │  │  Rendition   │  │ Buffer-Fill  │  │   Failover   │          │
//! │  │   Selector   │  │  Scheduler   │  │   Manager    │          │
//! │  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘          │
//! │         │                 │                 │                   │
//! │         └─────────────────┼─────────────────┘                   │
//! │                           │                                     │
//! │                    ┌──────┴──────┐                              │
//! │                    │   Engine    │◄──── Commands (PlayerSession)│
//! │                    └──────┬──────┘                              │
//! │                           │                                     │
//! │  ┌──────────────┐  ┌──────┴──────┐  ┌──────────────┐           │
//! │  │  Key Fetch   │  │ Chunk Fetch │  │   Timeline   │           │
//! │  │   Manager    │  │  Pipeline   │  │  Reconciler  │           │
//! │  └──────────────┘  └──────┬──────┘  └──────────────┘           │
//! │                           │                                     │
//! │          Transport ── Decryptor ── MediaSink                    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod types;
pub mod config;
pub mod time_ranges;
pub mod timeline;
pub mod abr;
pub mod keys;
pub mod transport;
pub mod decrypt;
pub mod sink;
pub mod playlist;
pub mod events;
pub mod engine;
pub mod session;

#[cfg(test)]
mod testing;

pub use error::{Error, FailureClass, RenditionFailure, Result};
pub use types::*;
pub use config::EngineConfig;
pub use time_ranges::{TimeRange, TimeRanges};
pub use abr::{AbrAlgorithm, AbrContext, BandwidthEstimate, VarianceSelector};
pub use transport::{FetchError, FetchRequest, FetchResponse, Transport};
#[cfg(feature = "http")]
pub use transport::HttpTransport;
pub use decrypt::Decryptor;
pub use sink::{EndOfStreamReason, MediaSink, PlaybackClock, SinkState};
pub use playlist::{PlaylistEvent, PlaylistLoader, StaticPlaylistLoader, SwitchStatus};
pub use events::{StreamEvent, StreamEventRecord, SwitchReason};
pub use engine::{Collaborators, Command, Engine};
pub use session::PlayerSession;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the engine library
pub fn init() {
    tracing::info!(version = VERSION, "Ladder Core initialized");
}
