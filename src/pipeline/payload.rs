//! Payload fetcher - bounded worker pool for image downloads
//!
//! A fixed number of workers pull entries from a shared job queue and push one
//! result per entry (image bytes or error) onto a result channel. The caller
//! collects exactly as many results as it submitted. Workers are spawned per
//! call and exit once the queue is drained, so nothing outlives a cycle.
//!
//! Workers never touch the store; they only talk to the upstream.

use crate::snapshot::{CameraSnapshotEntry, FetchedRecord};
use crate::upstream::{PayloadFetchError, TrafficSource};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

/// One download that did not produce a record.
#[derive(Debug)]
pub struct FailedFetch {
    pub entry: CameraSnapshotEntry,
    pub error: PayloadFetchError,
}

/// Fan-in result of one payload fetch round.
#[derive(Debug, Default)]
pub struct PayloadOutcome {
    /// Successful downloads, in snapshot order
    pub fetched: Vec<FetchedRecord>,
    /// Downloads that failed; retried naturally next cycle
    pub failed: Vec<FailedFetch>,
    /// Submitted entries with no result at all (a worker died mid-fetch)
    pub lost: usize,
}

impl PayloadOutcome {
    pub fn submitted(&self) -> usize {
        self.fetched.len() + self.failed.len() + self.lost
    }
}

struct Job {
    seq: usize,
    entry: CameraSnapshotEntry,
}

struct JobResult {
    seq: usize,
    entry: CameraSnapshotEntry,
    result: Result<Vec<u8>, PayloadFetchError>,
}

/// Download the image for every entry with at most `workers` requests in flight.
///
/// Per-entry failures are logged and returned in [`PayloadOutcome::failed`];
/// they never fail the round as a whole.
pub async fn fetch_payloads<S>(
    source: Arc<S>,
    entries: Vec<CameraSnapshotEntry>,
    workers: usize,
    cycle: u64,
) -> PayloadOutcome
where
    S: TrafficSource + ?Sized,
{
    let submitted = entries.len();
    if submitted == 0 {
        return PayloadOutcome::default();
    }

    // Queue every job up front, then close it so workers stop when it drains.
    let (job_tx, job_rx) = mpsc::channel(submitted);
    for (seq, entry) in entries.into_iter().enumerate() {
        if job_tx.try_send(Job { seq, entry }).is_err() {
            // Capacity equals the job count and the receiver is alive.
            error!(cycle, seq, "Payload job queue rejected a job");
        }
    }
    drop(job_tx);

    let jobs = Arc::new(Mutex::new(job_rx));
    let (result_tx, mut result_rx) = mpsc::channel::<JobResult>(submitted);

    let pool_size = workers.max(1).min(submitted);
    let mut pool = JoinSet::new();
    for worker_id in 0..pool_size {
        pool.spawn(run_worker(
            worker_id,
            Arc::clone(&source),
            Arc::clone(&jobs),
            result_tx.clone(),
        ));
    }
    // Only workers hold senders now; the channel closes when the last exits.
    drop(result_tx);

    debug!(cycle, submitted, workers = pool_size, "Payload fetch started");

    let mut results = Vec::with_capacity(submitted);
    while results.len() < submitted {
        match result_rx.recv().await {
            Some(result) => results.push(result),
            None => break,
        }
    }

    while let Some(joined) = pool.join_next().await {
        if let Err(e) = joined {
            error!(cycle, error = %e, "Payload worker terminated abnormally");
        }
    }

    results.sort_by_key(|r| r.seq);

    let mut outcome = PayloadOutcome {
        lost: submitted - results.len(),
        ..PayloadOutcome::default()
    };
    for JobResult { entry, result, .. } in results {
        match result {
            Ok(payload) => outcome.fetched.push(FetchedRecord::new(entry, payload)),
            Err(error) => {
                warn!(
                    cycle,
                    camera_id = %entry.camera_id,
                    fingerprint = %entry.fingerprint,
                    error = %error,
                    "Image download failed, will retry next cycle"
                );
                outcome.failed.push(FailedFetch { entry, error });
            }
        }
    }

    if outcome.lost > 0 {
        warn!(cycle, lost = outcome.lost, "Some image downloads returned no result");
    }

    outcome
}

async fn run_worker<S>(
    worker_id: usize,
    source: Arc<S>,
    jobs: Arc<Mutex<mpsc::Receiver<Job>>>,
    results: mpsc::Sender<JobResult>,
) where
    S: TrafficSource + ?Sized,
{
    loop {
        // The queue is pre-filled and closed, so this never waits on producers.
        let job = jobs.lock().await.recv().await;
        let Some(Job { seq, entry }) = job else {
            break;
        };

        let result = source.fetch_payload(&entry.image_url).await;
        if results.send(JobResult { seq, entry, result }).await.is_err() {
            debug!(worker_id, "Result channel closed, worker exiting");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::MetadataFetchError;
    use async_trait::async_trait;
    use chrono::NaiveDateTime;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Serves `bytes-of-<url>` for every URL except those marked failing, and
    /// records peak concurrency.
    #[derive(Default)]
    struct FakeImages {
        failing: HashSet<String>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TrafficSource for FakeImages {
        async fn fetch_snapshot(
            &self,
            _at: Option<NaiveDateTime>,
        ) -> Result<Vec<CameraSnapshotEntry>, MetadataFetchError> {
            Ok(Vec::new())
        }

        async fn fetch_payload(&self, url: &str) -> Result<Vec<u8>, PayloadFetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.failing.contains(url) {
                Err(PayloadFetchError::Status {
                    url: url.to_string(),
                    status: reqwest::StatusCode::NOT_FOUND,
                })
            } else {
                Ok(format!("bytes-of-{url}").into_bytes())
            }
        }

        fn source_name(&self) -> &str {
            "fake-images"
        }
    }

    fn entry(i: usize) -> CameraSnapshotEntry {
        CameraSnapshotEntry {
            camera_id: format!("C{i}"),
            timestamp: chrono::DateTime::parse_from_rfc3339("2023-11-07T10:00:00+08:00").unwrap(),
            image_url: format!("http://images/{i}.jpg"),
            latitude: 1.3,
            longitude: 103.8,
            width: 320,
            height: 240,
            fingerprint: format!("fp{i}"),
        }
    }

    #[tokio::test]
    async fn test_all_entries_fetched_in_snapshot_order() {
        let source = Arc::new(FakeImages::default());
        let entries: Vec<_> = (0..12).map(entry).collect();

        let outcome = fetch_payloads(Arc::clone(&source), entries, 4, 1).await;

        assert_eq!(outcome.fetched.len(), 12);
        assert!(outcome.failed.is_empty());
        assert_eq!(outcome.lost, 0);
        let order: Vec<&str> = outcome.fetched.iter().map(|r| r.fingerprint()).collect();
        let expected: Vec<String> = (0..12).map(|i| format!("fp{i}")).collect();
        assert_eq!(order, expected);
        assert_eq!(outcome.fetched[3].payload, b"bytes-of-http://images/3.jpg".to_vec());
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_worker_bound() {
        let source = Arc::new(FakeImages::default());
        let entries: Vec<_> = (0..30).map(entry).collect();

        fetch_payloads(Arc::clone(&source), entries, 3, 1).await;

        assert_eq!(source.calls.load(Ordering::SeqCst), 30);
        assert!(source.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_failure_drops_only_that_entry() {
        let source = Arc::new(FakeImages {
            failing: HashSet::from(["http://images/2.jpg".to_string()]),
            ..FakeImages::default()
        });
        let entries: Vec<_> = (0..5).map(entry).collect();

        let outcome = fetch_payloads(source, entries, 2, 1).await;

        assert_eq!(outcome.fetched.len(), 4);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].entry.fingerprint, "fp2");
        assert!(matches!(
            outcome.failed[0].error,
            PayloadFetchError::Status { status, .. } if status == reqwest::StatusCode::NOT_FOUND
        ));
        assert_eq!(outcome.submitted(), 5);
    }

    #[tokio::test]
    async fn test_empty_input_spawns_nothing() {
        let source = Arc::new(FakeImages::default());
        let outcome = fetch_payloads(Arc::clone(&source), Vec::new(), 8, 1).await;
        assert_eq!(outcome.submitted(), 0);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_zero_workers_still_makes_progress() {
        let source = Arc::new(FakeImages::default());
        let outcome = fetch_payloads(source, vec![entry(0), entry(1)], 0, 1).await;
        assert_eq!(outcome.fetched.len(), 2);
    }
}
