//! In-process image store
//!
//! Same contract as the Postgres store, including all-or-nothing batches,
//! fingerprint uniqueness and column limits. Clones share state, so a test can
//! hand one clone to the scheduler and inspect another.

use super::{SnapshotStore, StoreError};
use crate::snapshot::{FetchedRecord, PersistedImageRecord};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Inner {
    rows: Vec<PersistedImageRecord>,
    next_id: i64,
    membership_queries: usize,
    insert_calls: usize,
    fail_next_insert: bool,
    fail_next_query: bool,
    discard_payloads: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that keeps row metadata but drops image bytes, so a
    /// long-running dry run does not grow by one image per row.
    pub fn without_payloads() -> Self {
        let store = Self::default();
        store.lock().discard_payloads = true;
        store
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means a test panicked mid-write; the rows are
        // still consistent because inserts are applied in one push.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed rows directly, bypassing the batch path.
    pub fn seed(&self, records: &[FetchedRecord]) {
        let mut inner = self.lock();
        for record in records {
            inner.next_id += 1;
            let id = inner.next_id;
            inner.rows.push(PersistedImageRecord::from_fetched(id, record));
        }
    }

    /// Make the next `insert_batch` call fail without writing anything.
    pub fn fail_next_insert(&self) {
        self.lock().fail_next_insert = true;
    }

    /// Make the next membership query fail.
    pub fn fail_next_query(&self) {
        self.lock().fail_next_query = true;
    }

    pub fn rows(&self) -> Vec<PersistedImageRecord> {
        self.lock().rows.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        self.lock().rows.iter().any(|r| r.fingerprint == fingerprint)
    }

    /// Number of bulk membership queries answered so far
    pub fn membership_queries(&self) -> usize {
        self.lock().membership_queries
    }

    /// Number of `insert_batch` calls received so far
    pub fn insert_calls(&self) -> usize {
        self.lock().insert_calls
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn existing_fingerprints(
        &self,
        candidates: &[String],
    ) -> Result<HashSet<String>, StoreError> {
        let mut inner = self.lock();
        inner.membership_queries += 1;

        if inner.fail_next_query {
            inner.fail_next_query = false;
            return Err(StoreError::Unavailable("injected read failure".to_string()));
        }

        let wanted: HashSet<&str> = candidates.iter().map(String::as_str).collect();
        Ok(inner
            .rows
            .iter()
            .filter(|r| wanted.contains(r.fingerprint.as_str()))
            .map(|r| r.fingerprint.clone())
            .collect())
    }

    async fn insert_batch(&self, records: &[FetchedRecord]) -> Result<u64, StoreError> {
        let mut inner = self.lock();
        inner.insert_calls += 1;

        if inner.fail_next_insert {
            inner.fail_next_insert = false;
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }

        // Validate the whole batch before touching any row.
        let mut seen: HashSet<&str> = inner.rows.iter().map(|r| r.fingerprint.as_str()).collect();
        for record in records {
            if let Err(reason) = record.entry.check_storable() {
                return Err(StoreError::Unstorable {
                    camera_id: record.entry.camera_id.clone(),
                    reason,
                });
            }
            if !seen.insert(record.fingerprint()) {
                return Err(StoreError::DuplicateFingerprint(record.fingerprint().to_string()));
            }
        }

        let first_id = inner.next_id + 1;
        let discard_payloads = inner.discard_payloads;
        let new_rows: Vec<PersistedImageRecord> = records
            .iter()
            .zip(first_id..)
            .map(|(record, id)| {
                let mut row = PersistedImageRecord::from_fetched(id, record);
                if discard_payloads {
                    row.payload = Vec::new();
                }
                row
            })
            .collect();
        inner.next_id += new_rows.len() as i64;
        inner.rows.extend(new_rows);

        Ok(records.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::CameraSnapshotEntry;

    fn record(camera: &str, fp: &str) -> FetchedRecord {
        FetchedRecord::new(
            CameraSnapshotEntry {
                camera_id: camera.to_string(),
                timestamp: chrono::DateTime::parse_from_rfc3339("2023-11-07T10:00:00+08:00")
                    .unwrap(),
                image_url: format!("http://images/{fp}.jpg"),
                latitude: 1.3,
                longitude: 103.8,
                width: 320,
                height: 240,
                fingerprint: fp.to_string(),
            },
            fp.as_bytes().to_vec(),
        )
    }

    #[tokio::test]
    async fn test_membership_returns_only_stored_subset() {
        let store = MemoryStore::new();
        store.seed(&[record("A", "x1"), record("B", "x2")]);

        let existing = store
            .existing_fingerprints(&["x1".to_string(), "x3".to_string()])
            .await
            .unwrap();

        assert_eq!(existing, HashSet::from(["x1".to_string()]));
        assert_eq!(store.membership_queries(), 1);
    }

    #[tokio::test]
    async fn test_insert_assigns_sequential_ids() {
        let store = MemoryStore::new();
        let n = store
            .insert_batch(&[record("A", "x1"), record("B", "x2")])
            .await
            .unwrap();

        assert_eq!(n, 2);
        let ids: Vec<i64> = store.rows().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_duplicate_against_stored_rejects_whole_batch() {
        let store = MemoryStore::new();
        store.seed(&[record("A", "x1")]);

        let err = store
            .insert_batch(&[record("B", "x2"), record("C", "x1")])
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::DuplicateFingerprint(ref fp) if fp == "x1"));
        assert_eq!(store.len(), 1);
        assert!(!store.contains("x2"));
    }

    #[tokio::test]
    async fn test_duplicate_within_batch_rejected() {
        let store = MemoryStore::new();
        let err = store
            .insert_batch(&[record("A", "x1"), record("B", "x1")])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateFingerprint(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_unstorable_record_rejects_whole_batch() {
        let store = MemoryStore::new();
        let err = store
            .insert_batch(&[record("A", "x1"), record("B", &"f".repeat(40))])
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Unstorable { ref camera_id, .. } if camera_id == "B"));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_injected_query_failure_is_one_shot() {
        let store = MemoryStore::new();
        store.fail_next_query();

        let candidates = ["x1".to_string()];
        assert!(matches!(
            store.existing_fingerprints(&candidates).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.existing_fingerprints(&candidates).await.unwrap().is_empty());
        assert_eq!(store.membership_queries(), 2);
    }

    #[tokio::test]
    async fn test_payloads_discarded_when_asked() {
        let store = MemoryStore::without_payloads();
        store.insert_batch(&[record("A", "x1")]).await.unwrap();

        let rows = store.rows();
        assert_eq!(rows[0].fingerprint, "x1");
        assert!(rows[0].payload.is_empty());
        assert!(store.contains("x1"));
    }

    #[tokio::test]
    async fn test_injected_failure_is_one_shot() {
        let store = MemoryStore::new();
        store.fail_next_insert();

        assert!(store.insert_batch(&[record("A", "x1")]).await.is_err());
        assert!(store.is_empty());

        store.insert_batch(&[record("A", "x1")]).await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.insert_calls(), 2);
    }
}
