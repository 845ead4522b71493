//! Poll pipeline
//!
//! ```text
//! snapshot ──► dedup ──► payload workers ──► batch ingest ──► sleep
//!  (1 GET)    (1 query)   (≤ N concurrent)    (1 commit)
//! ```
//!
//! - `dedup`     - drops entries whose fingerprint is already stored
//! - `payload`   - bounded worker pool for image downloads
//! - `ingest`    - all-or-nothing batch write
//! - `scheduler` - the cycle state machine and the forever loop
//! - `backfill`  - the same cycle replayed over historical timestamps

pub mod backfill;
pub mod dedup;
pub mod ingest;
pub mod payload;
pub mod scheduler;

pub use backfill::{generate_timestamps, BackfillSummary};
pub use dedup::filter_new;
pub use ingest::{ingest_batch, IngestionError};
pub use payload::{fetch_payloads, FailedFetch, PayloadOutcome};
pub use scheduler::{CycleError, CyclePhase, CycleReport, Scheduler};
