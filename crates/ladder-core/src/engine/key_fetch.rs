//! Key downloads
//!
//! At most one key request runs at a time. Failed downloads are retried
//! right away until the key store gives up on the key.

use super::{Completion, Engine, KeyFetch};
use crate::{
    events::StreamEvent,
    keys::KeyStatus,
    transport::{FetchError, FetchRequest, FetchResponse},
};
use tracing::{debug, info, warn};
use url::Url;

impl Engine {
    /// Start downloading the key at `uri` unless it is known or already on its way
    pub(super) fn fetch_key(&mut self, uri: Url) {
        if self.state.key_fetch.is_some() || self.state.keys.status(&uri) != KeyStatus::Missing {
            return;
        }

        let generation = self.state.next_generation();
        let transport = self.io.transport.clone();
        let request = FetchRequest::key(uri.clone());
        let task_uri = uri.clone();
        let abort = self.tasks.spawn(async move {
            let result = transport.fetch(request).await;
            Completion::Key {
                generation,
                uri: task_uri,
                result,
            }
        });

        debug!(uri = %uri, attempt = self.state.keys.retries(&uri) + 1, "Requesting key");
        self.state.key_fetch = Some(KeyFetch {
            generation,
            uri,
            abort,
        });
    }

    pub(super) fn on_key_complete(
        &mut self,
        generation: u64,
        uri: Url,
        result: std::result::Result<FetchResponse, FetchError>,
    ) {
        match &self.state.key_fetch {
            Some(fetch) if fetch.generation == generation => {}
            _ => {
                debug!(uri = %uri, "Discarding stale key response");
                return;
            }
        }
        self.state.key_fetch = None;

        let stored = match result {
            Ok(response) => self.state.keys.store(&uri, &response.bytes),
            Err(FetchError::Aborted) => {
                debug!(uri = %uri, "Key request aborted");
                return;
            }
            Err(e) => {
                debug!(uri = %uri, error = %e, "Key request failed");
                self.state.keys.record_failure(&uri);
                false
            }
        };

        if stored {
            info!(uri = %uri, "Key ready");
            self.check_buffer();
            return;
        }

        let retries = self.state.keys.retries(&uri);
        let permanent = !self.state.keys.can_retry(&uri);
        warn!(uri = %uri, retries, permanent, "Key unavailable");
        self.events.emit(StreamEvent::KeyFailed {
            uri: uri.to_string(),
            retries,
            permanent,
        });

        if permanent {
            // The pending chunk sees the failed key and fails over
            self.drain_buffer();
        } else {
            self.fetch_key(uri);
        }
    }
}
