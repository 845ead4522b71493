//! Image store - the only durable state in the system
//!
//! ## Modules
//!
//! - `db`       - PostgreSQL connection pool and migration runner
//! - `postgres` - [`PgImageStore`], the production store
//! - `memory`   - [`MemoryStore`], an in-process store for tests and dry runs
//!
//! The poller needs exactly two things from a store: a bulk membership query
//! over fingerprints, and an all-or-nothing bulk insert. Fingerprint
//! uniqueness is enforced by the store itself, never by the caller.

pub mod db;
pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgImageStore;

use crate::snapshot::{EntryRejection, FetchedRecord};
use async_trait::async_trait;
use std::collections::HashSet;

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    /// A fingerprint in the batch is already stored. Carries the conflicting
    /// key when the store reports it, else the violated constraint.
    #[error("Duplicate fingerprint rejected by store ({0})")]
    DuplicateFingerprint(String),
    #[error("Record for camera {camera_id} cannot be stored: {reason}")]
    Unstorable {
        camera_id: String,
        reason: EntryRejection,
    },
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Read and write contracts the poll loop needs from persistent storage.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Return the subset of `candidates` that is already stored.
    ///
    /// Must be answered with a single bulk query, never one per fingerprint.
    async fn existing_fingerprints(
        &self,
        candidates: &[String],
    ) -> Result<HashSet<String>, StoreError>;

    /// Insert all records in one transaction, returning the number of rows
    /// written. Either every record becomes visible or none does.
    async fn insert_batch(&self, records: &[FetchedRecord]) -> Result<u64, StoreError>;
}
