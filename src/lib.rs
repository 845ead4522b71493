//! trafficcam-ingest: traffic camera snapshot poller
//!
//! Periodically pulls the public traffic camera snapshot, downloads every image
//! not already stored, and persists each cycle's new images in one batch.
//!
//! ## Architecture
//!
//! - **config**:   layered settings (defaults, TOML, env, CLI)
//! - **snapshot**: camera entry types and the upstream wire format
//! - **upstream**: [`TrafficSource`] trait and its `reqwest` client
//! - **store**:    [`SnapshotStore`] trait, PostgreSQL and in-memory stores
//! - **pipeline**: dedup, payload worker pool, batch ingest, scheduler

pub mod config;
pub mod pipeline;
pub mod snapshot;
pub mod store;
pub mod upstream;

pub use config::IngestConfig;
pub use pipeline::{CycleError, CyclePhase, CycleReport, Scheduler};
pub use snapshot::{CameraSnapshotEntry, FetchedRecord, PersistedImageRecord};
pub use store::{MemoryStore, PgImageStore, SnapshotStore, StoreError};
pub use upstream::{TrafficClient, TrafficSource};
