//! Poll scheduler - drives fetch → filter → fetch payloads → ingest forever
//!
//! ```text
//! IDLE → FETCHING_METADATA → FILTERING → FETCHING_PAYLOADS → INGESTING → SLEEPING → IDLE
//! ```
//!
//! Every step returns a `Result`. A step error skips the rest of the cycle,
//! is logged, and the loop carries on to the sleep and the next cycle. Payload
//! errors are per entry and never fail the cycle.
//!
//! The sleep runs from the end of one cycle to the start of the next, so the
//! effective polling period is `interval + cycle duration`.

use super::dedup::filter_new;
use super::ingest::{ingest_batch, IngestionError};
use super::payload::fetch_payloads;
use crate::store::{SnapshotStore, StoreError};
use crate::upstream::{MetadataFetchError, TrafficSource};
use chrono::NaiveDateTime;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Where the scheduler is within its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    FetchingMetadata,
    Filtering,
    FetchingPayloads,
    Ingesting,
    Sleeping,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "IDLE",
            Self::FetchingMetadata => "FETCHING_METADATA",
            Self::Filtering => "FILTERING",
            Self::FetchingPayloads => "FETCHING_PAYLOADS",
            Self::Ingesting => "INGESTING",
            Self::Sleeping => "SLEEPING",
        };
        f.write_str(name)
    }
}

/// A step failure that ended a cycle early.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("metadata fetch failed: {0}")]
    Metadata(#[from] MetadataFetchError),
    #[error("dedup lookup failed: {0}")]
    Dedup(#[source] StoreError),
    #[error("ingestion failed: {0}")]
    Ingestion(#[from] IngestionError),
}

impl CycleError {
    /// The step the cycle was in when it failed.
    pub fn phase(&self) -> CyclePhase {
        match self {
            Self::Metadata(_) => CyclePhase::FetchingMetadata,
            Self::Dedup(_) => CyclePhase::Filtering,
            Self::Ingestion(_) => CyclePhase::Ingesting,
        }
    }
}

/// What one successful cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle: u64,
    /// Cameras in the snapshot
    pub snapshot_size: usize,
    /// Entries whose fingerprint was not stored yet
    pub new_entries: usize,
    /// Images downloaded
    pub fetched: usize,
    /// Downloads that failed or returned nothing
    pub failed: usize,
    /// Rows written
    pub inserted: u64,
    pub elapsed: Duration,
}

/// Owns the handles one poll cycle needs and runs cycles on a fixed delay.
///
/// The upstream and the store are passed in rather than built internally, so
/// a single cycle can be driven against fakes.
pub struct Scheduler<S: TrafficSource + ?Sized, D: SnapshotStore> {
    source: Arc<S>,
    store: D,
    interval: Duration,
    workers: usize,
    cycles: u64,
    phase: CyclePhase,
}

impl<S: TrafficSource + ?Sized, D: SnapshotStore> Scheduler<S, D> {
    pub fn new(source: Arc<S>, store: D, interval: Duration, workers: usize) -> Self {
        Self {
            source,
            store,
            interval,
            workers,
            cycles: 0,
            phase: CyclePhase::Idle,
        }
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    /// Cycles started so far
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    fn enter(&mut self, phase: CyclePhase) {
        debug!(cycle = self.cycles, from = %self.phase, to = %phase, "Phase transition");
        self.phase = phase;
    }

    /// Run one cycle against the live snapshot.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, CycleError> {
        self.run_cycle_at(None).await
    }

    /// Run one cycle; `at` selects a historical snapshot.
    ///
    /// Always returns to [`CyclePhase::Idle`], whatever the outcome.
    pub async fn run_cycle_at(
        &mut self,
        at: Option<NaiveDateTime>,
    ) -> Result<CycleReport, CycleError> {
        self.cycles += 1;
        let result = self.cycle_steps(at).await;
        self.enter(CyclePhase::Idle);
        result
    }

    async fn cycle_steps(&mut self, at: Option<NaiveDateTime>) -> Result<CycleReport, CycleError> {
        let started = Instant::now();
        let cycle = self.cycles;

        self.enter(CyclePhase::FetchingMetadata);
        let snapshot = self.source.fetch_snapshot(at).await?;
        let snapshot_size = snapshot.len();

        self.enter(CyclePhase::Filtering);
        let fresh = filter_new(&self.store, snapshot)
            .await
            .map_err(CycleError::Dedup)?;
        let new_entries = fresh.len();
        debug!(cycle, snapshot_size, new_entries, "Snapshot filtered");

        self.enter(CyclePhase::FetchingPayloads);
        let outcome = fetch_payloads(Arc::clone(&self.source), fresh, self.workers, cycle).await;
        let failed = outcome.failed.len() + outcome.lost;
        let fetched = outcome.fetched.len();

        self.enter(CyclePhase::Ingesting);
        let inserted = ingest_batch(&self.store, outcome.fetched).await?;

        Ok(CycleReport {
            cycle,
            snapshot_size,
            new_entries,
            fetched,
            failed,
            inserted,
            elapsed: started.elapsed(),
        })
    }

    /// Run one cycle and log its outcome at the step boundary.
    pub async fn tick(&mut self, at: Option<NaiveDateTime>) -> Result<CycleReport, CycleError> {
        info!(
            cycle = self.cycles + 1,
            source = self.source.source_name(),
            historical = ?at,
            "Fetching traffic snapshot"
        );
        let result = self.run_cycle_at(at).await;
        log_outcome(self.cycles, &result);
        result
    }

    /// Poll forever. Only process termination stops this loop.
    pub async fn run(mut self) {
        info!(
            interval_secs = self.interval.as_secs(),
            workers = self.workers,
            "Poll loop starting"
        );

        loop {
            // Failures are already logged by tick(); nothing here is fatal.
            let _ = self.tick(None).await;

            self.enter(CyclePhase::Sleeping);
            tokio::time::sleep(self.interval).await;
            self.enter(CyclePhase::Idle);
        }
    }
}

fn log_outcome(cycle: u64, result: &Result<CycleReport, CycleError>) {
    match result {
        Ok(report) => info!(
            cycle,
            snapshot = report.snapshot_size,
            new = report.new_entries,
            fetched = report.fetched,
            failed = report.failed,
            inserted = report.inserted,
            elapsed_ms = elapsed_millis(report.elapsed),
            "Finished fetching traffic data"
        ),
        Err(e) => error!(
            cycle,
            phase = %e.phase(),
            error = %e,
            "Cycle aborted, rest of cycle skipped"
        ),
    }
}

/// Milliseconds for logging, saturating instead of truncating.
fn elapsed_millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_millis_saturates() {
        assert_eq!(elapsed_millis(Duration::from_millis(1_250)), 1_250);
        assert_eq!(elapsed_millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_phase_names_match_state_machine() {
        assert_eq!(CyclePhase::FetchingPayloads.to_string(), "FETCHING_PAYLOADS");
        assert_eq!(CyclePhase::Idle.to_string(), "IDLE");
    }
}
