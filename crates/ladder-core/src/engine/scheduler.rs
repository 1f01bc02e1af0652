//! Buffer-fill scheduling
//!
//! Every trigger (periodic tick, play, seek, fetch completion, key arrival,
//! append completion) funnels through [`Engine::fill`]. Its guards make
//! repeated calls collapse into a single outstanding request.

use super::{Engine, FetchPhase, InFlightFetch};
use crate::{
    sink::SinkState,
    time_ranges::{TimeRanges, TIME_FUDGE_FACTOR},
    timeline,
    types::{LoadingPermission, MediaPlaylist, SessionPhase},
};
use tracing::{debug, trace};

impl Engine {
    /// Periodic check: start a request if one is due and feed the sink
    pub(super) fn check_buffer(&mut self) {
        self.fill(None);
        self.drain_buffer();
    }

    /// Start fetching the next chunk if the buffer needs one.
    ///
    /// With `target` set the given chunk index is fetched; otherwise the index
    /// is derived from the buffered range around the playhead.
    pub(super) fn fill(&mut self, target: Option<usize>) {
        if self.state.loading != LoadingPermission::Segments
            || self.state.phase != SessionPhase::Ready
            || self.state.pending.is_some()
            || self.io.sink.ready_state() == SinkState::Closed
        {
            return;
        }
        let Some(rendition) = self.active_rendition() else {
            return;
        };
        let Some(media) = rendition.media.as_ref() else {
            return;
        };

        let current_time = self.io.clock.current_time();
        let buffered = self.io.sink.buffered();

        let mut index = match target {
            Some(index) => index,
            None => match buffered.range_for(current_time) {
                Some(range) => {
                    if range.end - current_time >= self.config.goal_buffer_length {
                        trace!(buffered_to = range.end, "Buffer goal reached");
                        return;
                    }
                    timeline::index_for_time(media, range.end)
                }
                None => timeline::index_for_time(media, current_time),
            },
        };

        if let (Some(last), Some(chunk)) = (&self.state.last_fetched, media.chunks.get(index)) {
            if chunk.same_resource(last) {
                debug!(index, "Resolved chunk was just fetched, moving to the next one");
                index += 1;
            }
        }
        let Some(chunk) = media.chunks.get(index) else {
            trace!(index, chunks = media.len(), "No chunk left to fetch");
            return;
        };

        let timestamp_offset = self.timestamp_offset_for(media, index, &buffered, current_time);
        let fetch = InFlightFetch {
            generation: 0,
            rendition: rendition.id.clone(),
            media_sequence: media.media_sequence,
            index,
            chunk: chunk.clone(),
            timestamp_offset,
            phase: FetchPhase::Requesting,
            abort: None,
        };

        self.load_segment(fetch);
    }

    /// Decide where the next append lands in the buffer timeline
    fn timestamp_offset_for(
        &self,
        media: &MediaPlaylist,
        index: usize,
        buffered: &TimeRanges,
        current_time: f64,
    ) -> Option<f64> {
        let containing = buffered.range_for(current_time);
        let seeking_outside = self.io.clock.is_seeking() && containing.is_none();

        if seeking_outside && media.has_discontinuities() {
            return Some(timeline::chunk_start(media, index));
        }
        if media.chunks[index].discontinuity {
            if let Some(range) = containing {
                return Some(range.end);
            }
        }
        if buffered.is_empty() && current_time > TIME_FUDGE_FACTOR {
            return Some(timeline::chunk_start(media, index));
        }
        None
    }
}
