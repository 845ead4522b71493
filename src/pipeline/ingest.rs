//! Batch ingestion
//!
//! Persists one cycle's downloads as a single all-or-nothing write.

use crate::snapshot::FetchedRecord;
use crate::store::{SnapshotStore, StoreError};
use std::collections::HashSet;
use tracing::warn;

/// The cycle's batch was not persisted. None of its records are visible;
/// they come back as new on the next cycle.
#[derive(Debug, thiserror::Error)]
#[error("batch of {records} record(s) not persisted: {source}")]
pub struct IngestionError {
    pub records: usize,
    #[source]
    pub source: StoreError,
}

/// Write `records` in one bulk insert and one commit.
///
/// Empty input is a no-op and never reaches the store. Records sharing a
/// fingerprint with an earlier record of the same batch (one image reported by
/// several cameras) are collapsed to the first, since the store accepts one
/// row per fingerprint.
pub async fn ingest_batch<D>(store: &D, records: Vec<FetchedRecord>) -> Result<u64, IngestionError>
where
    D: SnapshotStore + ?Sized,
{
    if records.is_empty() {
        return Ok(0);
    }

    let (batch, collapsed) = collapse_shared_fingerprints(records);
    for record in &collapsed {
        warn!(
            camera_id = %record.entry.camera_id,
            fingerprint = %record.fingerprint(),
            "Image already in this batch under another camera, not stored twice"
        );
    }

    store
        .insert_batch(&batch)
        .await
        .map_err(|source| IngestionError {
            records: batch.len(),
            source,
        })
}

/// Split into (first record per fingerprint, later duplicates).
fn collapse_shared_fingerprints(
    records: Vec<FetchedRecord>,
) -> (Vec<FetchedRecord>, Vec<FetchedRecord>) {
    let mut seen = HashSet::with_capacity(records.len());
    records
        .into_iter()
        .partition(|r| seen.insert(r.entry.fingerprint.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::CameraSnapshotEntry;
    use crate::store::MemoryStore;

    fn record(camera: &str, fp: &str) -> FetchedRecord {
        FetchedRecord::new(
            CameraSnapshotEntry {
                camera_id: camera.to_string(),
                timestamp: chrono::DateTime::parse_from_rfc3339("2023-11-07T10:00:00+08:00")
                    .unwrap(),
                image_url: format!("http://images/{camera}.jpg"),
                latitude: 1.3,
                longitude: 103.8,
                width: 320,
                height: 240,
                fingerprint: fp.to_string(),
            },
            vec![0xFF, 0xD8, 0xFF],
        )
    }

    #[tokio::test]
    async fn test_empty_batch_never_reaches_store() {
        let store = MemoryStore::new();
        assert_eq!(ingest_batch(&store, Vec::new()).await.unwrap(), 0);
        assert_eq!(store.insert_calls(), 0);
    }

    #[tokio::test]
    async fn test_batch_written_in_one_call() {
        let store = MemoryStore::new();
        let n = ingest_batch(&store, vec![record("A", "x1"), record("B", "x2")])
            .await
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(store.insert_calls(), 1);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_write_failure_leaves_nothing_visible() {
        let store = MemoryStore::new();
        store.fail_next_insert();

        let err = ingest_batch(&store, vec![record("A", "x1"), record("B", "x2")])
            .await
            .unwrap_err();

        assert_eq!(err.records, 2);
        assert!(matches!(err.source, StoreError::Unavailable(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_shared_fingerprint_stored_once() {
        let store = MemoryStore::new();
        let n = ingest_batch(
            &store,
            vec![record("A", "same"), record("B", "x2"), record("C", "same")],
        )
        .await
        .unwrap();

        assert_eq!(n, 2);
        let rows = store.rows();
        assert_eq!(rows[0].camera_id, "A");
        assert_eq!(rows[1].fingerprint, "x2");
    }
}
