//! Core data models for tidepool.
//!
//! These types are shared across all tidepool crates and represent the
//! domain entities: users and their remote accounts, the fetched-status
//! pool, and the positioned reading stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::status_id::StatusId;

// =============================================================================
// IDENTITY TYPES
// =============================================================================

/// A tidepool user. Each user owns one default stream and zero or more
/// remote accounts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    /// The user's default reading stream.
    pub default_stream_id: Uuid,
    /// Opaque per-user configuration, see [`crate::settings::UserSettings`].
    pub settings: JsonValue,
    pub created_at: DateTime<Utc>,
}

/// A remote server (Mastodon instance), keyed by its base address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    /// Base URL of the instance; must use the https scheme.
    pub address: String,
    pub created_at: DateTime<Utc>,
}

/// An OAuth app registration against a remote server.
///
/// One registration exists per (server, scope-set, redirect URI); it is
/// created lazily on the first auth attempt against a server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppRegistration {
    pub server_address: String,
    pub scopes: String,
    pub redirect_uri: String,
    pub client_id: String,
    pub client_secret: String,
    pub auth_uri: String,
    pub created_at: DateTime<Utc>,
}

/// A user's binding to one remote identity on one server.
///
/// Holds the bearer credential and the fetch watermark: the most recent
/// remote status id observed for this account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub user_id: Uuid,
    pub server_address: String,
    pub remote_username: String,
    pub access_token: String,
    /// Watermark used as the lower-bound cursor for timeline fetches.
    pub last_status_id: Option<StatusId>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// STREAM TYPES
// =============================================================================

/// Per-stream persisted counters.
///
/// Invariants: `first_position == 0` iff the stream is empty;
/// `last_read <= last_position`; positions are dense, so
/// `last_position - first_position + 1` equals the number of admitted items.
#[derive(Debug, Clone)]
pub struct Stream {
    pub id: Uuid,
    pub user_id: Uuid,
    pub first_position: i64,
    pub last_position: i64,
    pub last_read: i64,
    /// Total admissions over the stream's lifetime. Not reset by a clear;
    /// distinguishes a cleared stream from one that never held items.
    pub lifetime_admitted: i64,
    pub last_fetch_at: Option<DateTime<Utc>>,
    pub notification_state: NotificationState,
    pub notification_count: i64,
}

impl Stream {
    /// Snapshot of the stream counters for API responses.
    pub fn info(&self, remaining_pool: i64) -> StreamInfo {
        StreamInfo {
            stream_id: self.id,
            last_read: self.last_read,
            first_position: self.first_position,
            last_position: self.last_position,
            remaining_pool,
            last_fetch_time: self.last_fetch_at,
            notification_state: self.notification_state,
            notification_count: self.notification_count,
        }
    }
}

/// Reliability of the notification count reported by the remote server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationState {
    /// No snapshot has been taken yet, or the last refresh failed.
    Unknown,
    /// The count is exact.
    Exact,
    /// The remote server truncated the count; at least this many exist.
    Undercounted,
}

impl NotificationState {
    pub fn as_i16(self) -> i16 {
        match self {
            NotificationState::Unknown => 0,
            NotificationState::Exact => 1,
            NotificationState::Undercounted => 2,
        }
    }

    pub fn from_i16(v: i16) -> Self {
        match v {
            1 => NotificationState::Exact,
            2 => NotificationState::Undercounted,
            _ => NotificationState::Unknown,
        }
    }
}

/// Counter snapshot returned with every stream-touching response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamInfo {
    pub stream_id: Uuid,
    pub last_read: i64,
    pub first_position: i64,
    pub last_position: i64,
    /// Number of fetched statuses not yet admitted into the stream.
    pub remaining_pool: i64,
    pub last_fetch_time: Option<DateTime<Utc>>,
    pub notification_state: NotificationState,
    pub notification_count: i64,
}

// =============================================================================
// STATUS POOL TYPES
// =============================================================================

/// A fetched status held in the pool, not yet (necessarily) admitted into
/// a stream.
#[derive(Debug, Clone)]
pub struct PoolStatus {
    /// Internal primary key.
    pub uid: Uuid,
    pub account_id: Uuid,
    /// Remote identifier; unique per account.
    pub status_id: StatusId,
    /// Raw status payload as returned by the remote server.
    pub status: JsonValue,
    /// Remote id of the reblogged source status, when this is a reblog.
    pub reblog_of: Option<StatusId>,
    pub fetched_at: DateTime<Utc>,
}

/// A status admitted into a stream at a stable position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamStatus {
    /// Dense, strictly increasing position within the stream. Immutable
    /// once assigned.
    pub position: i64,
    pub status_id: StatusId,
    pub status: JsonValue,
    /// True when an earlier item of this stream already showed the same
    /// status or the same reblogged source.
    pub already_seen: bool,
    /// Server-side filter results captured from the payload at admission.
    pub filter_state: JsonValue,
}

// =============================================================================
// SERVICE REQUEST/RESPONSE TYPES
// =============================================================================

/// Listing direction for stream pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListDirection {
    /// Window ending at the read marker; admits from the pool when the
    /// stream is empty.
    Initial,
    /// Strictly-greater-than-position items; admits on demand.
    Forward,
    /// Strictly-less-than-position items already admitted; never admits.
    Backward,
}

/// Read-marker update mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadMode {
    /// Set last-read to the requested position unconditionally.
    Absolute,
    /// Set last-read to max(current, requested); regressions are silent
    /// no-ops.
    Advance,
}

/// Whether the remote source is believed to have more history available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    More,
    Done,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListRequest {
    pub stream_id: Uuid,
    pub direction: ListDirection,
    /// Anchor position. 0 means "use last-read" for FORWARD and is invalid
    /// for BACKWARD. Ignored for INITIAL.
    #[serde(default)]
    pub position: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse {
    pub items: Vec<StreamStatus>,
    /// Lowest returned position, for BACKWARD continuation. Equals the
    /// anchor when the window is empty.
    pub backward_position: i64,
    /// Highest returned position, for FORWARD continuation.
    pub forward_position: i64,
    pub stream_info: StreamInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetReadRequest {
    pub stream_id: Uuid,
    pub last_read: i64,
    pub mode: ReadMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResponse {
    pub stream_info: StreamInfo,
    /// Number of newly discovered statuses committed to the pool.
    pub fetched_count: i64,
    pub status: FetchStatus,
}

/// Point lookup result for a status by remote id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub status_id: StatusId,
    pub status: JsonValue,
    /// Stream position when the status has been admitted.
    pub position: Option<i64>,
}

// =============================================================================
// IDENTITY REQUEST TYPES
// =============================================================================

/// Request for registering an OAuth app against a server.
#[derive(Debug, Clone)]
pub struct CreateRegistrationRequest {
    pub server_address: String,
    pub scopes: String,
    pub redirect_uri: String,
    pub client_id: String,
    pub client_secret: String,
    pub auth_uri: String,
}

/// Request for binding a remote identity to a user after token exchange.
#[derive(Debug, Clone)]
pub struct CreateAccountRequest {
    pub user_id: Uuid,
    pub server_address: String,
    pub remote_username: String,
    pub access_token: String,
}
