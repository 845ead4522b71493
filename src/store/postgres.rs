//! PostgreSQL-backed image store
//!
//! Uses the `images` table created by `migrations/`. The unique index on
//! `md5` is what guarantees one row per fingerprint; a batch that violates it
//! is rolled back as a whole.

use super::{SnapshotStore, StoreError};
use crate::config::defaults::INSERT_CHUNK_ROWS;
use crate::snapshot::{FetchedRecord, PersistedImageRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgDatabaseError;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::HashSet;
use tracing::debug;

/// Image store over a shared connection pool.
#[derive(Clone)]
pub struct PgImageStore {
    pool: PgPool,
}

impl PgImageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Total number of stored images
    pub async fn count(&self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM images")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Look up a stored image by its content fingerprint
    pub async fn find_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<PersistedImageRecord>, StoreError> {
        type Row = (
            i64,
            String,
            DateTime<Utc>,
            String,
            f64,
            f64,
            i32,
            i32,
            String,
            Vec<u8>,
            Option<i32>,
        );

        let row: Option<Row> = sqlx::query_as(
            r#"SELECT id, camera_id, timestamp, image_url, latitude, longitude,
                      width, height, md5, image, num_vehicles
               FROM images WHERE md5 = $1"#,
        )
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(
            |(id, camera_id, ts, image_url, latitude, longitude, width, height, md5, image, num_vehicles)| {
                PersistedImageRecord {
                    id,
                    camera_id,
                    timestamp: ts.fixed_offset(),
                    image_url,
                    latitude,
                    longitude,
                    width,
                    height,
                    fingerprint: md5,
                    payload: image,
                    num_vehicles,
                }
            },
        ))
    }
}

#[async_trait]
impl SnapshotStore for PgImageStore {
    async fn existing_fingerprints(
        &self,
        candidates: &[String],
    ) -> Result<HashSet<String>, StoreError> {
        if candidates.is_empty() {
            return Ok(HashSet::new());
        }

        let existing: Vec<String> =
            sqlx::query_scalar("SELECT md5 FROM images WHERE md5 = ANY($1)")
                .bind(candidates)
                .fetch_all(&self.pool)
                .await?;

        Ok(existing.into_iter().collect())
    }

    async fn insert_batch(&self, records: &[FetchedRecord]) -> Result<u64, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        // Chunks share the transaction, so the batch still commits once.
        for chunk in records.chunks(INSERT_CHUNK_ROWS) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO images \
                 (timestamp, image, image_url, latitude, longitude, camera_id, height, width, md5) ",
            );
            builder.push_values(chunk, |mut row, record| {
                let entry = &record.entry;
                row.push_bind(entry.timestamp)
                    .push_bind(&record.payload)
                    .push_bind(&entry.image_url)
                    .push_bind(entry.latitude)
                    .push_bind(entry.longitude)
                    .push_bind(&entry.camera_id)
                    .push_bind(entry.height)
                    .push_bind(entry.width)
                    .push_bind(&entry.fingerprint);
            });

            let result = builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(map_insert_error)?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        debug!(rows = inserted, "Image batch committed");
        Ok(inserted)
    }
}

fn map_insert_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            let key = db
                .try_downcast_ref::<PgDatabaseError>()
                .and_then(PgDatabaseError::detail)
                .and_then(conflicting_key)
                .map(|fp| format!("md5 {fp}"))
                .or_else(|| db.constraint().map(|c| format!("constraint {c}")))
                .unwrap_or_else(|| "unknown key".to_string());
            StoreError::DuplicateFingerprint(key)
        }
        _ => StoreError::Database(err),
    }
}

/// Pull the key value out of a unique-violation detail such as
/// `Key (md5)=(9a8e...) already exists.`
fn conflicting_key(detail: &str) -> Option<&str> {
    let (_, rest) = detail.split_once(")=(")?;
    let end = rest.rfind(')')?;
    Some(&rest[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflicting_key_from_detail() {
        assert_eq!(
            conflicting_key("Key (md5)=(9a8e4f4b0f1b1c3dd2f1a0b9c8d7e6f5) already exists."),
            Some("9a8e4f4b0f1b1c3dd2f1a0b9c8d7e6f5")
        );
        assert_eq!(conflicting_key("something else entirely"), None);
    }

    #[test]
    fn test_duplicate_message_names_the_key() {
        let err = StoreError::DuplicateFingerprint("md5 9a8e".to_string());
        assert_eq!(err.to_string(), "Duplicate fingerprint rejected by store (md5 9a8e)");
    }
}
