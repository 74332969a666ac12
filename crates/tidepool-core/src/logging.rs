//! Structured logging field name constants for tidepool.
//!
//! All crates use these constants for consistent structured logging fields
//! so log aggregation tools can query by standardized names across every
//! subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events, operation completions |
//! | DEBUG | Decision points, intermediate values |
//! | TRACE | Per-item iteration (statuses, pages) |

/// Subsystem originating the log event.
/// Values: "server", "db", "fetcher"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "pool", "stream_engine", "reconciler"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "list", "set_read", "fetch", "pick_next"
pub const OPERATION: &str = "op";

/// Stream UUID being operated on.
pub const STREAM_ID: &str = "stream_id";

/// Account UUID driving a fetch.
pub const ACCOUNT_ID: &str = "account_id";

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of items returned or committed.
pub const RESULT_COUNT: &str = "result_count";

/// Fetch page index within a reconciliation call.
pub const PAGE: &str = "page";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
