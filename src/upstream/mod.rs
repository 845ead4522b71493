//! Upstream access - snapshot metadata and image payloads
//!
//! [`TrafficSource`] is the seam between the poll loop and the network.
//! [`TrafficClient`] is the production implementation over `reqwest`; tests
//! plug in in-process fakes.

pub mod client;

pub use client::{ClientBuildError, TrafficClient};

use crate::snapshot::CameraSnapshotEntry;
use async_trait::async_trait;
use chrono::NaiveDateTime;

/// Failure to obtain the camera list. Aborts the current cycle only.
#[derive(Debug, thiserror::Error)]
pub enum MetadataFetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Snapshot endpoint returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("Malformed snapshot body: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Failure to download one image. Drops that entry for this cycle only.
#[derive(Debug, thiserror::Error)]
pub enum PayloadFetchError {
    #[error("timed out fetching {url}")]
    Timeout { url: String },
    #[error("HTTP error fetching {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
}

/// Where snapshots and images come from.
#[async_trait]
pub trait TrafficSource: Send + Sync + 'static {
    /// Fetch the camera list. `at` requests a historical snapshot instead of
    /// the live one.
    async fn fetch_snapshot(
        &self,
        at: Option<NaiveDateTime>,
    ) -> Result<Vec<CameraSnapshotEntry>, MetadataFetchError>;

    /// Download the image behind `url`.
    async fn fetch_payload(&self, url: &str) -> Result<Vec<u8>, PayloadFetchError>;

    /// Human-readable name for logging.
    fn source_name(&self) -> &str;
}
