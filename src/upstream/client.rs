//! Traffic Client - HTTP client for the snapshot API and image hosts

use super::{MetadataFetchError, PayloadFetchError, TrafficSource};
use crate::config::defaults::{DATE_TIME_FORMAT, DATE_TIME_PARAM};
use crate::config::UpstreamConfig;
use crate::snapshot::{parse_snapshot, CameraSnapshotEntry};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, warn};

/// Errors building the HTTP client from configuration.
#[derive(Debug, thiserror::Error)]
pub enum ClientBuildError {
    #[error("Invalid header '{0}'")]
    InvalidHeader(String),
    #[error("Failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// HTTP access to the snapshot endpoint and the image URLs it lists.
///
/// Cheap to clone; clones share one connection pool.
#[derive(Clone)]
pub struct TrafficClient {
    http: reqwest::Client,
    snapshot_url: String,
    snapshot_headers: HeaderMap,
}

impl TrafficClient {
    /// Create a client from upstream configuration
    pub fn new(config: &UpstreamConfig) -> Result<Self, ClientBuildError> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .user_agent(config.user_agent.as_str())
            .build()?;

        let mut snapshot_headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ClientBuildError::InvalidHeader(name.clone()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| ClientBuildError::InvalidHeader(name.to_string()))?;
            snapshot_headers.insert(name, value);
        }

        Ok(Self {
            http,
            snapshot_url: config.snapshot_url.clone(),
            snapshot_headers,
        })
    }

    /// Snapshot endpoint, for logging
    pub fn snapshot_url(&self) -> &str {
        &self.snapshot_url
    }
}

#[async_trait]
impl TrafficSource for TrafficClient {
    async fn fetch_snapshot(
        &self,
        at: Option<NaiveDateTime>,
    ) -> Result<Vec<CameraSnapshotEntry>, MetadataFetchError> {
        let mut req = self
            .http
            .get(&self.snapshot_url)
            .headers(self.snapshot_headers.clone());

        if let Some(at) = at {
            req = req.query(&[(DATE_TIME_PARAM, at.format(DATE_TIME_FORMAT).to_string())]);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(MetadataFetchError::Status(status));
        }

        let body = resp.bytes().await?;
        let snapshot = parse_snapshot(&body)?;

        if let Some(status) = snapshot.status() {
            if status != "healthy" {
                warn!(api_status = %status, "Snapshot endpoint reports degraded status");
            }
        }

        let entries = snapshot.into_entries();
        debug!(cameras = entries.len(), historical = at.is_some(), "Snapshot fetched");
        Ok(entries)
    }

    async fn fetch_payload(&self, url: &str) -> Result<Vec<u8>, PayloadFetchError> {
        let classify = |e: reqwest::Error| {
            if e.is_timeout() {
                PayloadFetchError::Timeout {
                    url: url.to_string(),
                }
            } else {
                PayloadFetchError::Http {
                    url: url.to_string(),
                    source: e,
                }
            }
        };

        let resp = self.http.get(url).send().await.map_err(classify)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(PayloadFetchError::Status {
                url: url.to_string(),
                status,
            });
        }

        let bytes = resp.bytes().await.map_err(classify)?;
        Ok(bytes.to_vec())
    }

    fn source_name(&self) -> &str {
        "traffic-api"
    }
}
