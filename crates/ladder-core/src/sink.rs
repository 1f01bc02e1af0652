//! Media buffer sink and playback clock
//!
//! Both are owned by the embedding player. The engine reads their state,
//! appends to the sink, and moves the playhead only to unstick a seek.

use crate::time_ranges::TimeRanges;
use crate::types::Resolution;
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;

/// Media source ready state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SinkState {
    #[default]
    Closed,
    Open,
    Ended,
}

/// Reason given when the sink is finalized early
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndOfStreamReason {
    Network,
    Decode,
}

impl fmt::Display for EndOfStreamReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndOfStreamReason::Network => write!(f, "network"),
            EndOfStreamReason::Decode => write!(f, "decode"),
        }
    }
}

/// Append-only destination for media bytes
#[async_trait]
pub trait MediaSink: Send + Sync {
    fn ready_state(&self) -> SinkState;

    /// Time ranges currently held
    fn buffered(&self) -> TimeRanges;

    /// Append bytes; resolves once the sink has processed them
    async fn append(&self, data: Bytes) -> Result<()>;

    /// Drop media between `start` and `end`
    fn evict(&self, start: f64, end: f64);

    /// Offset applied to timestamps of subsequent appends
    fn set_timestamp_offset(&self, offset: f64);

    fn set_duration(&self, duration: f64);

    /// Signal end of stream; a reason marks an abnormal end
    fn finalize(&self, reason: Option<EndOfStreamReason>);
}

/// Read access to the playback element
pub trait PlaybackClock: Send + Sync {
    /// Playhead position in seconds
    fn current_time(&self) -> f64;

    fn is_seeking(&self) -> bool;

    fn set_current_time(&self, time: f64);

    /// Size of the playback surface, if known
    fn surface(&self) -> Option<Resolution>;
}
