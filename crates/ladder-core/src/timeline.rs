//! Timeline arithmetic over a rendition's chunk list
//!
//! Chunk positions start out as sums of nominal durations. Once appends are
//! reconciled, observed `end` values anchor the arithmetic so later lookups use
//! real timestamps instead of accumulating drift.

use crate::sink::SinkState;
use crate::time_ranges::TimeRange;
use crate::types::MediaPlaylist;

/// Number of target durations kept back from the live edge
const LIVE_EDGE_TARGET_DURATIONS: f64 = 3.0;

/// Start time of the chunk at `index`, anchored on the closest earlier known end
pub fn chunk_start(playlist: &MediaPlaylist, index: usize) -> f64 {
    let mut i = index.min(playlist.chunks.len());
    let mut offset = 0.0;
    while i > 0 {
        let previous = &playlist.chunks[i - 1];
        if let Some(end) = previous.end {
            return end + offset;
        }
        offset += previous.duration;
        i -= 1;
    }
    playlist.start_time + offset
}

/// End time of the chunk at `index`; observed when known, estimated otherwise
pub fn chunk_end(playlist: &MediaPlaylist, index: usize) -> Option<f64> {
    let chunk = playlist.chunks.get(index)?;
    Some(
        chunk
            .end
            .unwrap_or_else(|| chunk_start(playlist, index) + chunk.duration),
    )
}

/// Index of the chunk covering `time`.
///
/// Returns `playlist.len()` when `time` lies past the last chunk.
pub fn index_for_time(playlist: &MediaPlaylist, time: f64) -> usize {
    let mut start = playlist.start_time;
    for (i, chunk) in playlist.chunks.iter().enumerate() {
        let end = chunk.end.unwrap_or(start + chunk.duration);
        if time < end {
            return i;
        }
        start = end;
    }
    playlist.chunks.len()
}

/// Timeline position where the listed chunks end
pub fn listed_end(playlist: &MediaPlaylist) -> f64 {
    match playlist.chunks.len() {
        0 => playlist.start_time,
        n => chunk_end(playlist, n - 1).unwrap_or(playlist.start_time),
    }
}

/// Program duration: finite for complete lists, infinite for growing ones
pub fn total_duration(playlist: &MediaPlaylist) -> f64 {
    if playlist.is_complete() {
        listed_end(playlist)
    } else {
        f64::INFINITY
    }
}

/// Window the playhead may be placed in.
///
/// Starts at the first listed chunk, so time a live list has dropped falls
/// outside of it.
pub fn seekable(playlist: &MediaPlaylist) -> Option<TimeRange> {
    if playlist.is_empty() {
        return None;
    }
    let start = playlist.start_time;
    let end = listed_end(playlist);
    if playlist.is_complete() {
        return Some(TimeRange::new(start, end));
    }
    let live_end = (end - LIVE_EDGE_TARGET_DURATIONS * playlist.target_duration).max(start);
    Some(TimeRange::new(start, live_end))
}

/// Translate an index taken against an earlier copy of the list.
///
/// Growing lists drop chunks from the front on refresh, so the absolute
/// sequence number is what stays stable. Returns `None` when the chunk has
/// already scrolled out of the list.
pub fn rebase_index(fetched_sequence: u64, playlist: &MediaPlaylist) -> Option<usize> {
    let index = fetched_sequence.checked_sub(playlist.media_sequence)? as usize;
    (index < playlist.chunks.len()).then_some(index)
}

/// Record the observed end of the chunk at `index` and refine its duration.
///
/// Ends never move backwards. Returns true when the stored metadata changed.
pub fn update_chunk_metadata(playlist: &mut MediaPlaylist, index: usize, end: f64) -> bool {
    let Some(chunk) = playlist.chunks.get(index) else {
        return false;
    };
    if let Some(known) = chunk.end {
        if end <= known {
            return false;
        }
    }

    let previous_end = match index {
        0 => Some(playlist.start_time),
        _ => playlist.chunks.get(index - 1).and_then(|c| c.end),
    };

    let chunk = &mut playlist.chunks[index];
    chunk.end = Some(end);
    if let Some(previous_end) = previous_end.filter(|p| *p < end) {
        chunk.duration = end - previous_end;
    }
    true
}

/// Decide whether the sink should be finalized after the chunk at `index` landed
pub fn is_end_of_stream(
    playlist: &MediaPlaylist,
    sink_state: SinkState,
    index: usize,
    current_range: Option<TimeRange>,
) -> bool {
    let Some(last) = playlist.chunks.last() else {
        return false;
    };
    let appended_last = index + 1 == playlist.chunks.len();
    let buffered_to_end = match (current_range, last.end) {
        (Some(range), Some(end)) => end <= range.end,
        _ => false,
    };
    playlist.is_complete() && sink_state == SinkState::Open && (appended_last || buffered_to_end)
}
