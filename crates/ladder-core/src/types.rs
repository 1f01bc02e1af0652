//! Core types for Ladder

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use url::Url;
use uuid::Uuid;

/// Unique identifier for a streaming session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Returns quality tier name
    pub fn quality_name(&self) -> &'static str {
        match self.height {
            0..=240 => "240p",
            241..=360 => "360p",
            361..=480 => "480p",
            481..=720 => "720p",
            721..=1080 => "1080p",
            1081..=1440 => "1440p",
            _ => "4K",
        }
    }

    /// True when both dimensions fit inside `other`
    pub fn fits_within(&self, other: &Resolution) -> bool {
        self.width <= other.width && self.height <= other.height
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Byte range for partial chunk requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub length: u64,
}

impl ByteRange {
    pub fn new(start: u64, length: u64) -> Self {
        Self { start, length }
    }

    /// Inclusive last byte offset
    pub fn end(&self) -> u64 {
        (self.start + self.length).saturating_sub(1)
    }
}

/// Encryption key descriptor referenced by a chunk.
///
/// The downloaded key material lives in the engine's key store, keyed by `uri`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    pub uri: Url,
    /// Explicit initialization vector; derived from the sequence number when absent
    pub iv: Option<[u8; 16]>,
}

impl KeyInfo {
    pub fn new(uri: Url) -> Self {
        Self { uri, iv: None }
    }

    pub fn with_iv(mut self, iv: [u8; 16]) -> Self {
        self.iv = Some(iv);
        self
    }
}

/// One fetchable unit of media
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// URI to fetch the chunk
    pub uri: Url,
    /// Duration in seconds; nominal until refined by the reconciler
    pub duration: f64,
    /// Byte range (if applicable)
    #[serde(default)]
    pub byte_range: Option<ByteRange>,
    /// Encryption key (if encrypted)
    #[serde(default)]
    pub key: Option<KeyInfo>,
    /// Timestamps restart at this chunk
    #[serde(default)]
    pub discontinuity: bool,
    /// Observed end time in the buffer timeline, set once an append is reconciled
    #[serde(default)]
    pub end: Option<f64>,
}

impl Chunk {
    pub fn new(uri: Url, duration: f64) -> Self {
        Self {
            uri,
            duration,
            byte_range: None,
            key: None,
            discontinuity: false,
            end: None,
        }
    }

    pub fn with_byte_range(mut self, range: ByteRange) -> Self {
        self.byte_range = Some(range);
        self
    }

    pub fn with_key(mut self, key: KeyInfo) -> Self {
        self.key = Some(key);
        self
    }

    pub fn with_discontinuity(mut self) -> Self {
        self.discontinuity = true;
        self
    }

    /// Same resource and same byte range
    pub fn same_resource(&self, other: &Chunk) -> bool {
        self.uri == other.uri && self.byte_range == other.byte_range
    }
}

/// Ordered chunk list of one rendition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaPlaylist {
    /// Sequence number of the first chunk
    #[serde(default)]
    pub media_sequence: u64,
    /// Maximum chunk duration in seconds
    pub target_duration: f64,
    /// The list is complete (VOD) rather than growing (live)
    #[serde(default)]
    pub end_list: bool,
    /// Timeline position of the first listed chunk.
    ///
    /// Grows as a live list drops chunks from its front.
    #[serde(default)]
    pub start_time: f64,
    pub chunks: Vec<Chunk>,
}

impl MediaPlaylist {
    pub fn new(target_duration: f64, chunks: Vec<Chunk>) -> Self {
        Self {
            media_sequence: 0,
            target_duration,
            end_list: true,
            start_time: 0.0,
            chunks,
        }
    }

    /// Build a growing (live) playlist starting at `media_sequence`
    pub fn live(media_sequence: u64, target_duration: f64, chunks: Vec<Chunk>) -> Self {
        Self {
            media_sequence,
            target_duration,
            end_list: false,
            start_time: 0.0,
            chunks,
        }
    }

    pub fn with_start_time(mut self, start_time: f64) -> Self {
        self.start_time = start_time;
        self
    }

    pub fn is_complete(&self) -> bool {
        self.end_list
    }

    pub fn has_discontinuities(&self) -> bool {
        self.chunks.iter().any(|c| c.discontinuity)
    }

    /// Absolute sequence number of the chunk at `index`
    pub fn sequence_of(&self, index: usize) -> u64 {
        self.media_sequence + index as u64
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// One alternative encoding of the program
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rendition {
    /// Unique identifier for this rendition
    pub id: String,
    /// Declared peak bitrate in bits per second
    #[serde(default)]
    pub bandwidth: Option<u64>,
    /// Video resolution (if declared)
    #[serde(default)]
    pub resolution: Option<Resolution>,
    /// Codec string (if declared)
    #[serde(default)]
    pub codecs: Option<String>,
    /// URI to the rendition playlist
    pub uri: Url,
    /// Excluded from selection until this instant
    #[serde(skip)]
    pub excluded_until: Option<Instant>,
    /// Chunk list, once loaded
    #[serde(default)]
    pub media: Option<MediaPlaylist>,
}

impl Rendition {
    pub fn new(id: impl Into<String>, uri: Url) -> Self {
        Self {
            id: id.into(),
            bandwidth: None,
            resolution: None,
            codecs: None,
            uri,
            excluded_until: None,
            media: None,
        }
    }

    pub fn with_bandwidth(mut self, bandwidth: u64) -> Self {
        self.bandwidth = Some(bandwidth);
        self
    }

    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = Some(resolution);
        self
    }

    pub fn with_media(mut self, media: MediaPlaylist) -> Self {
        self.media = Some(media);
        self
    }

    /// Excluded while `excluded_until` lies strictly in the future
    pub fn is_excluded(&self, now: Instant) -> bool {
        matches!(self.excluded_until, Some(until) if until > now)
    }

    /// Declared bitrate scaled by the variance margin
    pub fn effective_bitrate(&self, variance: f64) -> Option<f64> {
        self.bandwidth.map(|b| b as f64 * variance)
    }
}

/// The set of renditions of one program, sorted by ascending bandwidth
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MasterPlaylist {
    pub renditions: Vec<Rendition>,
}

impl MasterPlaylist {
    pub fn new(mut renditions: Vec<Rendition>) -> Self {
        // Stable: equal bitrates keep declaration order
        renditions.sort_by_key(|r| r.bandwidth.unwrap_or(0));
        Self { renditions }
    }

    pub fn get(&self, id: &str) -> Option<&Rendition> {
        self.renditions.iter().find(|r| r.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Rendition> {
        self.renditions.iter_mut().find(|r| r.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.renditions.is_empty()
    }
}

/// Engine lifecycle states
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    /// No rendition list known yet
    Idle,
    /// An active rendition is settled; filling may proceed
    Ready,
    /// Waiting for the playlist loader to settle a switch
    Switching { to: String },
    /// The sink was finalized after the last chunk
    Ended,
    /// A session-terminal error occurred
    Failed,
}

impl SessionPhase {
    /// Check if transition to target state is valid
    pub fn can_transition_to(&self, target: &SessionPhase) -> bool {
        use SessionPhase::*;
        matches!(
            (self, target),
            // From Idle
            (Idle, Ready) | (Idle, Switching { .. }) | (Idle, Failed) |
            // From Ready
            (Ready, Switching { .. }) | (Ready, Ended) | (Ready, Failed) | (Ready, Idle) |
            // From Switching
            (Switching { .. }, Ready) | (Switching { .. }, Switching { .. }) |
            (Switching { .. }, Ended) | (Switching { .. }, Failed) | (Switching { .. }, Idle) |
            // From Ended
            (Ended, Ready) | (Ended, Switching { .. }) | (Ended, Failed) | (Ended, Idle) |
            // From Failed
            (Failed, Idle)
        )
    }

    /// True while the periodic check has work to do
    pub fn is_streaming(&self) -> bool {
        matches!(self, SessionPhase::Ready | SessionPhase::Switching { .. })
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionPhase::Idle => write!(f, "idle"),
            SessionPhase::Ready => write!(f, "ready"),
            SessionPhase::Switching { to } => write!(f, "switching({})", to),
            SessionPhase::Ended => write!(f, "ended"),
            SessionPhase::Failed => write!(f, "failed"),
        }
    }
}

/// What the engine is currently allowed to download
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadingPermission {
    None,
    MetadataOnly,
    Segments,
}

/// Consumer preload preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreloadPolicy {
    None,
    Metadata,
    #[default]
    Auto,
}

impl PreloadPolicy {
    /// Permission granted before anything is known about the program
    pub fn initial_permission(&self) -> LoadingPermission {
        match self {
            PreloadPolicy::None => LoadingPermission::None,
            PreloadPolicy::Metadata | PreloadPolicy::Auto => LoadingPermission::MetadataOnly,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_master_sorted_by_bandwidth() {
        let master = MasterPlaylist::new(vec![
            Rendition::new("hi", url("https://cdn.test/hi.m3u8")).with_bandwidth(2_000_000),
            Rendition::new("lo", url("https://cdn.test/lo.m3u8")).with_bandwidth(500_000),
        ]);
        let ids: Vec<_> = master.renditions.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["lo", "hi"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exclusion_boundary() {
        let now = Instant::now();
        let mut rendition = Rendition::new("a", url("https://cdn.test/a.m3u8"));
        rendition.excluded_until = Some(now + Duration::from_secs(300));

        assert!(rendition.is_excluded(now));
        assert!(rendition.is_excluded(now + Duration::from_secs(299)));
        assert!(!rendition.is_excluded(now + Duration::from_secs(300)));
    }

    #[test]
    fn test_phase_transitions() {
        let switching = SessionPhase::Switching { to: "b".into() };
        assert!(SessionPhase::Idle.can_transition_to(&SessionPhase::Ready));
        assert!(SessionPhase::Ready.can_transition_to(&switching));
        assert!(switching.can_transition_to(&SessionPhase::Ready));
        assert!(SessionPhase::Ended.can_transition_to(&SessionPhase::Ready));
        assert!(!SessionPhase::Failed.can_transition_to(&SessionPhase::Ready));
        assert!(!SessionPhase::Idle.can_transition_to(&SessionPhase::Ended));
    }

    #[test]
    fn test_byte_range_end() {
        assert_eq!(ByteRange::new(100, 50).end(), 149);
    }

    #[test]
    fn test_same_resource() {
        let a = Chunk::new(url("https://cdn.test/a.ts"), 10.0).with_byte_range(ByteRange::new(0, 10));
        let b = Chunk::new(url("https://cdn.test/a.ts"), 10.0).with_byte_range(ByteRange::new(10, 10));
        assert!(!a.same_resource(&b));
        assert!(a.same_resource(&a.clone()));
    }
}
