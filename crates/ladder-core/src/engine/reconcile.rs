//! Timeline reconciliation after appends
//!
//! Appends are the only moment the engine learns where a chunk really sits in
//! the buffer timeline. Comparing the buffered ranges before and after the
//! append yields the chunk's observed end, which then anchors later index
//! lookups.

use super::{Engine, FetchPhase};
use crate::{
    events::StreamEvent,
    time_ranges::{sole_uncommon_end, TIME_FUDGE_FACTOR},
    timeline,
    types::SessionPhase,
    Error, Result,
};
use tracing::{debug, info, warn};

impl Engine {
    pub(super) fn on_append_complete(&mut self, generation: u64, result: Result<()>) {
        self.state.sink_busy = false;

        let is_current = matches!(
            &self.state.pending,
            Some(p) if p.generation == generation && matches!(p.phase, FetchPhase::Appending { .. })
        );
        if !is_current {
            debug!(generation, "Append finished for a cancelled chunk");
            self.check_buffer();
            return;
        }
        let Some(fetch) = self.state.pending.take() else {
            return;
        };

        if let Err(e) = result {
            warn!(sequence = fetch.sequence(), error = %e, "Sink rejected chunk");
            self.fatal(Error::SinkAppend(e.to_string()));
            return;
        }
        let FetchPhase::Appending { before } = fetch.phase else {
            return;
        };

        let after = self.io.sink.buffered();
        let current_time = self.io.clock.current_time();
        let sequence = fetch.media_sequence + fetch.index as u64;

        let Some(media) = self
            .state
            .master
            .as_mut()
            .and_then(|m| m.get_mut(&fetch.rendition))
            .and_then(|r| r.media.as_mut())
        else {
            self.fill(None);
            return;
        };
        let index = timeline::rebase_index(sequence, media);

        if let Some(index) = index {
            let current_range = after.range_for(current_time);
            if timeline::is_end_of_stream(media, self.io.sink.ready_state(), index, current_range) {
                self.events.emit(StreamEvent::ChunkAppended {
                    rendition: fetch.rendition,
                    sequence,
                    end: None,
                });
                self.end_of_stream();
                return;
            }
        }

        if self.state.active.as_deref() != Some(fetch.rendition.as_str()) {
            debug!(
                rendition = %fetch.rendition,
                "Appended chunk belongs to a previous rendition"
            );
            self.fill(None);
            return;
        }

        if self.io.clock.is_seeking() && after.range_for(current_time).is_none() {
            let seekable_start = timeline::seekable(media).map(|w| w.start);
            if let (Some(start), Some(next)) =
                (seekable_start, after.next_range_after(current_time))
            {
                if current_time < start {
                    let target = next.start + TIME_FUDGE_FACTOR;
                    info!(from = current_time, to = target, "Nudging stalled seek");
                    self.io.clock.set_current_time(target);
                }
            }
        }

        let observed_end = sole_uncommon_end(&before, &after);
        let metadata_changed = match (observed_end, index) {
            (Some(end), Some(index)) => timeline::update_chunk_metadata(media, index, end),
            _ => false,
        };
        if observed_end.is_none() {
            debug!(sequence, "Ambiguous append, chunk timing unchanged");
        }
        let buffered_changed = before != after;
        let duration = media.is_complete().then(|| timeline::total_duration(media));

        self.events.emit(StreamEvent::ChunkAppended {
            rendition: fetch.rendition,
            sequence,
            end: observed_end,
        });

        if metadata_changed || buffered_changed {
            if let Some(duration) = duration {
                self.io.sink.set_duration(duration);
            }
            self.fill(None);
        } else {
            self.fill(index.map(|i| i + 1));
        }
    }

    /// Finalize the sink after the last chunk landed
    fn end_of_stream(&mut self) {
        info!("Last chunk appended, ending stream");
        self.io.sink.finalize(None);
        self.events.emit(StreamEvent::EndOfStream { reason: None });
        let _ = self.set_phase(SessionPhase::Ended);
    }
}
