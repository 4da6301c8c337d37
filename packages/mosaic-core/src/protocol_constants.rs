//! Fixed protocol and defaults constants that should NOT be changed lightly.
//!
//! These values are either defined by the MPEG-TS/HTTP contract this server
//! exposes, or are operational defaults overridable via environment
//! variables (see [`crate::config`]).

// ─────────────────────────────────────────────────────────────────────────────
// Wire Format
// ─────────────────────────────────────────────────────────────────────────────

/// MIME type advertised for the `/stream` response body.
pub const STREAM_CONTENT_TYPE: &str = "video/mp2t";

/// Chunk size used when reading the encoder subprocess's stdout (bytes).
pub const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Bound on each viewer's outbound chunk queue.
///
/// A viewer whose consumer can't keep up accumulates chunks here; once full,
/// the viewer is evicted rather than blocking the fan-out for everyone else.
pub const VIEWER_QUEUE_CAPACITY: usize = 100;

// ─────────────────────────────────────────────────────────────────────────────
// Timing Defaults
// ─────────────────────────────────────────────────────────────────────────────

/// Default idle timeout before the watchdog stops an unwatched encoder (seconds).
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;

/// Interval between watchdog inspection ticks (seconds).
pub const WATCHDOG_TICK_SECS: u64 = 5;

/// Deadline for the encoder to produce its first output chunk after start (seconds).
pub const COLD_START_DEADLINE_SECS: u64 = 30;

/// Grace period granted to the encoder subprocess after a graceful-stop signal
/// before it is forcibly killed (seconds).
pub const STOP_GRACE_PERIOD_SECS: u64 = 3;

/// Default ceiling on cumulative bytes emitted by a single encoder run before
/// the watchdog recycles it (bytes). ~500 MB.
pub const DEFAULT_MAX_STREAM_SIZE_BYTES: u64 = 500 * 1024 * 1024;

/// Timeout applied to each encoder-probe invocation (seconds).
pub const ENCODER_PROBE_TIMEOUT_SECS: u64 = 3;

// ─────────────────────────────────────────────────────────────────────────────
// Application Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Application name used in logging and the `/healthz` response.
pub const APP_NAME: &str = "Mosaic Cast";

/// Service identifier, mirrored in the `/healthz` response body.
pub const SERVICE_ID: &str = "mosaic-cast";
