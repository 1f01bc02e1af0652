//! Rendition exclusion and fatal errors

use super::Engine;
use crate::{
    error::RenditionFailure,
    events::{StreamEvent, SwitchReason},
    sink::{EndOfStreamReason, SinkState},
    types::SessionPhase,
    Error,
};
use tokio::time::Instant;
use tracing::{error, instrument, warn};

impl Engine {
    /// Exclude the rendition blamed for `failure` and move to another one.
    ///
    /// A failure naming no listed rendition is blamed on the active one.
    /// Becomes fatal when no rendition can be blamed or none is left to play.
    #[instrument(skip(self, failure), fields(code = failure.error.error_code()))]
    pub(super) fn blacklist(&mut self, failure: RenditionFailure) {
        let RenditionFailure { rendition, error } = failure;
        let window = self.config.exclusion_window();

        let listed = rendition.filter(|id| {
            self.state
                .master
                .as_ref()
                .is_some_and(|m| m.get(id).is_some())
        });
        let target = listed.or_else(|| self.state.active.clone());
        let excluded = target.and_then(|id| {
            let rendition = self.state.master.as_mut()?.get_mut(&id)?;
            rendition.excluded_until = Some(Instant::now() + window);
            Some(id)
        });
        let Some(id) = excluded else {
            self.fatal(error);
            return;
        };

        warn!(
            rendition = %id,
            error = %error,
            window_ms = window.as_millis(),
            "Excluding rendition"
        );
        self.events.emit(StreamEvent::RenditionExcluded {
            rendition: id.clone(),
            code: error.error_code().to_string(),
            window_ms: self.config.exclusion_window_ms,
        });
        self.events.emit(StreamEvent::Error {
            code: error.error_code().to_string(),
            message: error.to_string(),
            fatal: false,
        });

        match self.select() {
            Some(next) => self.switch_to(next, SwitchReason::Failover),
            None => {
                error!(rendition = %id, "Every rendition is excluded");
                self.fatal(error);
            }
        }
    }

    /// End the session: finalize the sink with an error and stop loading
    pub(super) fn fatal(&mut self, error: Error) {
        if self.state.phase == SessionPhase::Failed {
            return;
        }
        error!(code = error.error_code(), error = %error, "Fatal streaming error");

        self.cancel_pending();
        self.cancel_key_fetch();
        self.events.emit(StreamEvent::Error {
            code: error.error_code().to_string(),
            message: error.to_string(),
            fatal: true,
        });

        if self.io.sink.ready_state() == SinkState::Open {
            let reason = match error {
                Error::SinkAppend(_) => EndOfStreamReason::Decode,
                _ => EndOfStreamReason::Network,
            };
            self.io.sink.finalize(Some(reason));
            self.events.emit(StreamEvent::EndOfStream {
                reason: Some(reason.to_string()),
            });
        }

        self.state.error = Some(error);
        let _ = self.set_phase(SessionPhase::Failed);
    }
}
