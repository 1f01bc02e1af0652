//! Outgoing stream events
//!
//! Every notable engine decision is published as a [`StreamEventRecord`] on a
//! broadcast channel. Subscribers that fall behind lose the oldest records;
//! the engine never waits on them.

use crate::types::SessionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// Capacity of the event broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Stream event types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Rendition list known and a rendition chosen
    MetadataLoaded {
        renditions: usize,
        is_live: bool,
        duration: Option<f64>,
    },

    /// Active rendition changed
    RenditionSwitch {
        from: Option<String>,
        to: String,
        reason: SwitchReason,
    },

    /// Chunk request issued
    ChunkRequested {
        rendition: String,
        sequence: u64,
        uri: String,
    },

    /// Chunk bytes handed to the sink and processed
    ChunkAppended {
        rendition: String,
        sequence: u64,
        end: Option<f64>,
    },

    /// New bandwidth estimate
    BandwidthSample { bits_per_second: f64 },

    /// Rendition taken out of selection
    RenditionExcluded {
        rendition: String,
        code: String,
        window_ms: u64,
    },

    /// Key request failed
    KeyFailed {
        uri: String,
        retries: u32,
        permanent: bool,
    },

    /// Sink finalized
    EndOfStream { reason: Option<String> },

    /// Session phase changed
    PhaseChange { from: String, to: String },

    /// Error occurred
    Error {
        code: String,
        message: String,
        fatal: bool,
    },
}

/// Reason for a rendition switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchReason {
    /// First rendition chosen after metadata
    Initial,
    /// New bandwidth sample
    Bandwidth,
    /// Chunk request timed out
    Timeout,
    /// Previous rendition excluded
    Failover,
}

/// Stream event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEventRecord {
    /// Unique event ID
    pub id: Uuid,
    /// Session ID
    pub session_id: SessionId,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
    /// Sequence number
    pub sequence: u64,
    /// The event
    #[serde(flatten)]
    pub event: StreamEvent,
}

/// Stream event emitter
#[derive(Debug)]
pub struct EventEmitter {
    session_id: SessionId,
    sequence: u64,
    tx: broadcast::Sender<StreamEventRecord>,
}

impl EventEmitter {
    pub fn new(session_id: SessionId) -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            session_id,
            sequence: 0,
            tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEventRecord> {
        self.tx.subscribe()
    }

    /// Handle for subscribing from outside the emitting task
    pub fn sender(&self) -> broadcast::Sender<StreamEventRecord> {
        self.tx.clone()
    }

    /// Emit a stream event
    pub fn emit(&mut self, event: StreamEvent) {
        self.sequence += 1;

        let record = StreamEventRecord {
            id: Uuid::new_v4(),
            session_id: self.session_id,
            timestamp: Utc::now(),
            sequence: self.sequence,
            event,
        };

        debug!(
            event_id = %record.id,
            sequence = record.sequence,
            event = ?record.event,
            "Stream event"
        );

        // No subscribers is fine
        let _ = self.tx.send(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_sequences_records() {
        let mut emitter = EventEmitter::new(SessionId::new());
        let mut rx = emitter.subscribe();

        emitter.emit(StreamEvent::BandwidthSample {
            bits_per_second: 1e6,
        });
        emitter.emit(StreamEvent::EndOfStream { reason: None });

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(second.event, StreamEvent::EndOfStream { reason: None });
    }

    #[test]
    fn test_record_serializes_flat() {
        let record = StreamEventRecord {
            id: Uuid::new_v4(),
            session_id: SessionId::new(),
            timestamp: Utc::now(),
            sequence: 7,
            event: StreamEvent::RenditionSwitch {
                from: Some("low".into()),
                to: "high".into(),
                reason: SwitchReason::Bandwidth,
            },
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["event"], "rendition_switch");
        assert_eq!(json["reason"], "bandwidth");
        assert_eq!(json["sequence"], 7);
    }

    #[test]
    fn test_emit_without_subscribers() {
        let mut emitter = EventEmitter::new(SessionId::new());
        emitter.emit(StreamEvent::EndOfStream { reason: None });
    }
}
