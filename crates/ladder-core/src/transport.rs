//! Network transport
//!
//! The engine never talks to sockets itself. Every chunk and key request goes
//! through a [`Transport`], which reports the outcome together with the
//! throughput it measured.

use crate::abr::BandwidthEstimate;
use crate::types::ByteRange;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// What the response body will be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Chunk,
    Key,
}

/// One outgoing request
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub uri: Url,
    pub kind: ResponseKind,
    /// Give up after this long; `None` waits indefinitely
    pub timeout: Option<Duration>,
    pub byte_range: Option<ByteRange>,
}

impl FetchRequest {
    pub fn chunk(uri: Url, timeout: Duration, byte_range: Option<ByteRange>) -> Self {
        Self {
            uri,
            kind: ResponseKind::Chunk,
            timeout: Some(timeout),
            byte_range,
        }
    }

    pub fn key(uri: Url) -> Self {
        Self {
            uri,
            kind: ResponseKind::Key,
            timeout: None,
            byte_range: None,
        }
    }

    /// Value for the HTTP `Range` header, if the request is partial
    pub fn range_header(&self) -> Option<String> {
        self.byte_range
            .map(|range| format!("bytes={}-{}", range.start, range.end()))
    }
}

/// A successful response
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub bytes: Bytes,
    /// Measured throughput in bits per second
    pub bandwidth: f64,
    pub round_trip: Duration,
}

/// Why a request produced no usable body
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("request timed out")]
    TimedOut,

    #[error("request aborted")]
    Aborted,

    #[error("unexpected status {status}")]
    Status { status: u16 },

    #[error("network error: {0}")]
    Network(String),
}

impl FetchError {
    /// HTTP status, when the server answered
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status } => Some(*status),
            _ => None,
        }
    }
}

/// Performs one request and reports its outcome exactly once
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError>;
}

#[cfg(feature = "http")]
pub use http::HttpTransport;

#[cfg(feature = "http")]
mod http {
    use super::*;
    use reqwest::{header::RANGE, Client};
    use tokio::time::Instant;
    use tracing::debug;

    impl From<reqwest::Error> for FetchError {
        fn from(err: reqwest::Error) -> Self {
            if err.is_timeout() {
                FetchError::TimedOut
            } else if let Some(status) = err.status() {
                FetchError::Status {
                    status: status.as_u16(),
                }
            } else {
                FetchError::Network(err.to_string())
            }
        }
    }

    /// [`Transport`] backed by a shared reqwest client
    #[derive(Debug, Clone, Default)]
    pub struct HttpTransport {
        client: Client,
    }

    impl HttpTransport {
        pub fn new(client: Client) -> Self {
            Self { client }
        }
    }

    #[async_trait]
    impl Transport for HttpTransport {
        async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
            let start = Instant::now();

            let mut builder = self.client.get(request.uri.clone());
            if let Some(timeout) = request.timeout {
                builder = builder.timeout(timeout);
            }
            if let Some(range) = request.range_header() {
                builder = builder.header(RANGE, range);
            }

            let response = builder.send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::Status {
                    status: status.as_u16(),
                });
            }

            let bytes = response.bytes().await?;
            let round_trip = start.elapsed();

            debug!(
                url = %request.uri,
                kind = ?request.kind,
                bytes = bytes.len(),
                duration_ms = round_trip.as_millis(),
                "Request completed"
            );

            Ok(FetchResponse {
                status: status.as_u16(),
                bandwidth: BandwidthEstimate::throughput(bytes.len(), round_trip),
                bytes,
                round_trip,
            })
        }
    }
}
