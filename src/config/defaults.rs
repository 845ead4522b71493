//! System-wide default constants.
//!
//! Centralises the poller's tunables. Grouped by subsystem for easy discovery.

// ============================================================================
// Upstream
// ============================================================================

/// Live traffic-camera snapshot endpoint.
pub const SNAPSHOT_URL: &str = "https://api.data.gov.sg/v1/transport/traffic-images";

/// HTTP client timeout for both the snapshot and image requests (seconds).
pub const HTTP_TIMEOUT_SECS: u64 = 30;

/// User agent sent with every upstream request.
///
/// The snapshot API throttles clients that do not look like a browser.
pub const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/117.0.0.0 Safari/537.36";

/// Extra headers sent with the snapshot request only.
pub const SNAPSHOT_HEADERS: &[(&str, &str)] = &[
    ("accept", "*/*"),
    ("accept-language", "en-GB,en-US;q=0.9,en;q=0.8"),
    ("origin", "https://beta.data.gov.sg"),
    ("referer", "https://beta.data.gov.sg/"),
];

/// Query parameter used to request a historical snapshot.
pub const DATE_TIME_PARAM: &str = "date_time";

/// Format of the `date_time` query parameter (local time, no offset).
pub const DATE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

// ============================================================================
// Poll loop
// ============================================================================

/// Delay between the end of one cycle and the start of the next (seconds).
pub const POLL_INTERVAL_SECS: u64 = 120;

/// Maximum number of image downloads in flight at once.
pub const PAYLOAD_WORKERS: usize = 50;

/// Default step between historical snapshots during a backfill (seconds).
pub const BACKFILL_STEP_SECS: i64 = 30;

// ============================================================================
// Database
// ============================================================================

/// Connection pool size. The poller itself uses one connection at a time;
/// the headroom is for the migration runner and ad-hoc tooling.
pub const DB_MAX_CONNECTIONS: u32 = 5;

/// How long to wait for a pooled connection before giving up (seconds).
pub const DB_ACQUIRE_TIMEOUT_SECS: u64 = 10;

/// Rows per multi-row `INSERT` statement. Postgres caps a statement at
/// 65 535 bind parameters; nine columns per row keeps us far below that.
pub const INSERT_CHUNK_ROWS: usize = 1_000;

/// Column widths of the `images` table. Entries that do not fit are dropped
/// before they reach a batch.
pub const FINGERPRINT_MAX_LEN: usize = 32;
pub const IMAGE_URL_MAX_LEN: usize = 200;
pub const CAMERA_ID_MAX_LEN: usize = 50;

// ============================================================================
// Configuration file
// ============================================================================

/// Environment variable naming the TOML config file.
pub const CONFIG_PATH_ENV: &str = "TRAFFICCAM_CONFIG";

/// Config file looked up in the working directory when the env var is unset.
pub const CONFIG_FILE_NAME: &str = "trafficcam.toml";
