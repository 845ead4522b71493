//! Camera snapshot data model
//!
//! - [`CameraSnapshotEntry`]: one camera's current image, as reported by the
//!   upstream snapshot endpoint. Lives for a single poll cycle.
//! - [`FetchedRecord`]: an entry plus its downloaded image bytes.
//! - [`PersistedImageRecord`]: a row in the image store.
//!
//! The upstream wire format is decoded by [`parse_snapshot`].

use crate::config::defaults::{CAMERA_ID_MAX_LEN, FINGERPRINT_MAX_LEN, IMAGE_URL_MAX_LEN};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// One camera's image as advertised in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraSnapshotEntry {
    pub camera_id: String,
    /// Capture time, with the upstream's UTC offset preserved
    pub timestamp: DateTime<FixedOffset>,
    pub image_url: String,
    pub latitude: f64,
    pub longitude: f64,
    pub width: i32,
    pub height: i32,
    /// Content hash (upstream `md5`, 32 hex chars). Global dedup key.
    pub fingerprint: String,
}

/// Why an entry cannot be stored.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntryRejection {
    #[error("fingerprint has {len} characters, expected 1 to {max}")]
    Fingerprint { len: usize, max: usize },
    #[error("image URL has {len} characters, limit is {max}")]
    ImageUrl { len: usize, max: usize },
    #[error("camera id has {len} characters, expected 1 to {max}")]
    CameraId { len: usize, max: usize },
}

impl CameraSnapshotEntry {
    /// Check the entry fits the image store's columns.
    ///
    /// An entry that does not fit would fail every batch it joins, and since
    /// it never gets stored it would join every batch after that too.
    pub fn check_storable(&self) -> Result<(), EntryRejection> {
        let len = self.fingerprint.chars().count();
        if len == 0 || len > FINGERPRINT_MAX_LEN {
            return Err(EntryRejection::Fingerprint {
                len,
                max: FINGERPRINT_MAX_LEN,
            });
        }
        let len = self.image_url.chars().count();
        if len > IMAGE_URL_MAX_LEN {
            return Err(EntryRejection::ImageUrl {
                len,
                max: IMAGE_URL_MAX_LEN,
            });
        }
        let len = self.camera_id.chars().count();
        if len == 0 || len > CAMERA_ID_MAX_LEN {
            return Err(EntryRejection::CameraId {
                len,
                max: CAMERA_ID_MAX_LEN,
            });
        }
        Ok(())
    }
}

/// A snapshot entry whose image bytes were downloaded this cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedRecord {
    pub entry: CameraSnapshotEntry,
    pub payload: Vec<u8>,
}

impl FetchedRecord {
    pub fn new(entry: CameraSnapshotEntry, payload: Vec<u8>) -> Self {
        Self { entry, payload }
    }

    pub fn fingerprint(&self) -> &str {
        &self.entry.fingerprint
    }
}

/// A durably stored image row.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedImageRecord {
    pub id: i64,
    pub camera_id: String,
    pub timestamp: DateTime<FixedOffset>,
    pub image_url: String,
    pub latitude: f64,
    pub longitude: f64,
    pub width: i32,
    pub height: i32,
    pub fingerprint: String,
    pub payload: Vec<u8>,
    /// Written later by the vehicle detection job
    pub num_vehicles: Option<i32>,
}

impl PersistedImageRecord {
    /// Build the row that ingesting `record` produces, before the store
    /// assigns an id.
    pub fn from_fetched(id: i64, record: &FetchedRecord) -> Self {
        let entry = &record.entry;
        Self {
            id,
            camera_id: entry.camera_id.clone(),
            timestamp: entry.timestamp,
            image_url: entry.image_url.clone(),
            latitude: entry.latitude,
            longitude: entry.longitude,
            width: entry.width,
            height: entry.height,
            fingerprint: entry.fingerprint.clone(),
            payload: record.payload.clone(),
            num_vehicles: None,
        }
    }
}

// ============================================================================
// Wire format
// ============================================================================

/// Top-level snapshot response.
///
/// ```json
/// {"items": [{"timestamp": "...", "cameras": [ ... ]}], "api_info": {"status": "healthy"}}
/// ```
#[derive(Debug, Deserialize)]
pub struct SnapshotResponse {
    #[serde(default)]
    pub items: Vec<SnapshotItem>,
    #[serde(default)]
    pub api_info: Option<ApiInfo>,
}

#[derive(Debug, Deserialize)]
pub struct SnapshotItem {
    #[serde(default)]
    pub cameras: Vec<WireCamera>,
}

#[derive(Debug, Deserialize)]
pub struct ApiInfo {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct WireCamera {
    pub camera_id: String,
    pub timestamp: DateTime<FixedOffset>,
    pub image: String,
    pub location: WireLocation,
    pub image_metadata: WireImageMetadata,
}

#[derive(Debug, Deserialize)]
pub struct WireLocation {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Deserialize)]
pub struct WireImageMetadata {
    pub height: i32,
    pub width: i32,
    pub md5: String,
}

impl From<WireCamera> for CameraSnapshotEntry {
    fn from(cam: WireCamera) -> Self {
        Self {
            camera_id: cam.camera_id,
            timestamp: cam.timestamp,
            image_url: cam.image,
            latitude: cam.location.latitude,
            longitude: cam.location.longitude,
            width: cam.image_metadata.width,
            height: cam.image_metadata.height,
            fingerprint: cam.image_metadata.md5,
        }
    }
}

impl SnapshotResponse {
    /// Upstream health flag, when reported.
    pub fn status(&self) -> Option<&str> {
        self.api_info.as_ref().map(|info| info.status.as_str())
    }

    /// Flatten all items into entries, preserving upstream order.
    pub fn into_entries(self) -> Vec<CameraSnapshotEntry> {
        self.items
            .into_iter()
            .flat_map(|item| item.cameras)
            .map(CameraSnapshotEntry::from)
            .collect()
    }
}

/// Decode a snapshot response body.
pub fn parse_snapshot(body: &[u8]) -> Result<SnapshotResponse, serde_json::Error> {
    serde_json::from_slice(body)
}
