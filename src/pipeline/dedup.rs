//! Deduplication filter
//!
//! Drops snapshot entries whose fingerprint is already stored. Identity is the
//! fingerprint alone: two cameras reporting the same content both pass, since
//! neither fingerprint is in the store yet.
//!
//! Entries that cannot be stored at all (oversized fields) are dropped here
//! too, before they can poison a batch.

use crate::snapshot::CameraSnapshotEntry;
use crate::store::{SnapshotStore, StoreError};
use std::collections::HashSet;
use tracing::warn;

/// Return the storable entries whose fingerprint is not yet stored, in
/// snapshot order.
///
/// Issues exactly one bulk membership query (none when nothing is left to ask
/// about).
pub async fn filter_new<D>(
    store: &D,
    mut entries: Vec<CameraSnapshotEntry>,
) -> Result<Vec<CameraSnapshotEntry>, StoreError>
where
    D: SnapshotStore + ?Sized,
{
    entries.retain(|entry| match entry.check_storable() {
        Ok(()) => true,
        Err(reason) => {
            warn!(
                camera_id = %entry.camera_id,
                image_url = %entry.image_url,
                %reason,
                "Dropping snapshot entry that cannot be stored"
            );
            false
        }
    });

    if entries.is_empty() {
        return Ok(entries);
    }

    let candidates = unique_fingerprints(&entries);
    let existing = store.existing_fingerprints(&candidates).await?;

    Ok(entries
        .into_iter()
        .filter(|entry| !existing.contains(&entry.fingerprint))
        .collect())
}

/// Distinct fingerprints in first-seen order.
fn unique_fingerprints(entries: &[CameraSnapshotEntry]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(entries.len());
    entries
        .iter()
        .filter(|e| seen.insert(e.fingerprint.as_str()))
        .map(|e| e.fingerprint.clone())
        .collect()
}
