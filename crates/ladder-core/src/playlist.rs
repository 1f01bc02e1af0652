//! Playlist source integration
//!
//! Parsing and refresh polling happen outside the engine. The loader is told
//! which rendition to follow and reports back through [`PlaylistEvent`]s.

use crate::timeline;
use crate::types::{MasterPlaylist, MediaPlaylist, Rendition};

/// Outcome of asking the loader to follow another rendition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchStatus {
    /// The chunk list is already known; filling can continue right away
    Settled,
    /// A `RenditionChanged` event will follow once the list is loaded
    Pending,
}

/// Switches the rendition the playlist source follows
pub trait PlaylistLoader: Send + Sync {
    fn switch_to(&self, rendition: &Rendition) -> SwitchStatus;
}

/// Loader for programs whose chunk lists are all known upfront
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticPlaylistLoader;

impl PlaylistLoader for StaticPlaylistLoader {
    fn switch_to(&self, rendition: &Rendition) -> SwitchStatus {
        if rendition.media.is_some() {
            SwitchStatus::Settled
        } else {
            SwitchStatus::Pending
        }
    }
}

/// Notifications coming from the playlist source
#[derive(Debug, Clone)]
pub enum PlaylistEvent {
    /// The rendition list became known
    MasterLoaded(MasterPlaylist),
    /// A rendition's chunk list was loaded or refreshed
    RenditionUpdated { id: String, media: MediaPlaylist },
    /// The loader finished switching to `id`
    RenditionChanged { id: String },
    /// A playlist could not be loaded; `None` means the master itself
    LoadError {
        rendition: Option<String>,
        message: String,
    },
}

/// Fold a refreshed chunk list into the one already held.
///
/// Chunks still listed keep the end times and durations learned from
/// appends, matched by absolute sequence number and resource. The refreshed
/// list starts where its first chunk sat in the previous one.
pub fn merge_refresh(previous: &MediaPlaylist, mut refreshed: MediaPlaylist) -> MediaPlaylist {
    refreshed.start_time = refreshed.start_time.max(carried_start(previous, &refreshed));

    let first = refreshed.media_sequence;
    for (offset, chunk) in refreshed.chunks.iter_mut().enumerate() {
        let sequence = first + offset as u64;
        let Some(index) = sequence.checked_sub(previous.media_sequence) else {
            continue;
        };
        let Some(known) = previous.chunks.get(index as usize) else {
            break;
        };
        if known.end.is_some() && known.same_resource(chunk) {
            chunk.end = known.end;
            chunk.duration = known.duration;
        }
    }
    refreshed
}

/// Timeline position of the refreshed list's first chunk
fn carried_start(previous: &MediaPlaylist, refreshed: &MediaPlaylist) -> f64 {
    let Some(dropped) = refreshed.media_sequence.checked_sub(previous.media_sequence) else {
        return previous.start_time;
    };
    let dropped = dropped as usize;
    match dropped.checked_sub(previous.len()) {
        None | Some(0) => timeline::chunk_start(previous, dropped),
        // Chunks listed and dropped between two refreshes
        Some(unseen) => timeline::listed_end(previous) + unseen as f64 * refreshed.target_duration,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Chunk;
    use url::Url;

    fn chunks(range: std::ops::Range<u64>) -> Vec<Chunk> {
        range
            .map(|i| Chunk::new(Url::parse(&format!("https://cdn.test/{}.ts", i)).unwrap(), 4.0))
            .collect()
    }

    #[test]
    fn test_merge_keeps_reconciled_ends() {
        let mut previous = MediaPlaylist::live(10, 4.0, chunks(10..14));
        previous.chunks[2].end = Some(11.9);
        previous.chunks[2].duration = 3.9;
        previous.chunks[3].end = Some(15.9);

        let refreshed = MediaPlaylist::live(12, 4.0, chunks(12..16));
        let merged = merge_refresh(&previous, refreshed);

        assert_eq!(merged.chunks[0].end, Some(11.9));
        assert_eq!(merged.chunks[0].duration, 3.9);
        assert_eq!(merged.chunks[1].end, Some(15.9));
        assert_eq!(merged.chunks[2].end, None);
        assert_eq!(merged.len(), 4);
        assert_eq!(merged.start_time, 8.0);
    }

    #[test]
    fn test_merge_carries_start_past_dropped_chunks() {
        let mut previous = MediaPlaylist::live(0, 4.0, chunks(0..2));
        previous.chunks[0].end = Some(4.0);
        previous.chunks[1].end = Some(8.0);

        let refreshed = MediaPlaylist::live(1, 4.0, chunks(1..4));
        assert_eq!(merge_refresh(&previous, refreshed).start_time, 4.0);

        // Three chunks came and went unseen
        let refreshed = MediaPlaylist::live(5, 4.0, chunks(5..8));
        assert_eq!(merge_refresh(&previous, refreshed).start_time, 20.0);
    }

    #[test]
    fn test_merge_ignores_replaced_resources() {
        let mut previous = MediaPlaylist::live(0, 4.0, chunks(0..2));
        previous.chunks[1].end = Some(8.0);

        let mut refreshed = MediaPlaylist::live(0, 4.0, chunks(0..2));
        refreshed.chunks[1].uri = Url::parse("https://cdn.test/other.ts").unwrap();
        let merged = merge_refresh(&previous, refreshed);
        assert_eq!(merged.chunks[1].end, None);
    }

    #[test]
    fn test_static_loader() {
        let uri = Url::parse("https://cdn.test/a.m3u8").unwrap();
        let bare = Rendition::new("a", uri);
        assert_eq!(StaticPlaylistLoader.switch_to(&bare), SwitchStatus::Pending);

        let loaded = bare.with_media(MediaPlaylist::new(4.0, chunks(0..1)));
        assert_eq!(StaticPlaylistLoader.switch_to(&loaded), SwitchStatus::Settled);
    }
}
