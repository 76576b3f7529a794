//! Persistence for the session lifecycle.
//!
//! The Session Store proper lives in [`sessions`]: creation, org/entity
//! scoped reads, compare-and-set status transitions, and the one-shot
//! call-details finalization write. [`entities`] and [`invites`] carry the
//! thin collaborator persistence the lifecycle needs (organizations,
//! users, entity templates, invite codes).
//!
//! All operations are free functions over `&rusqlite::Connection`; the
//! caller owns pooling and blocking-task placement.

use chrono::{DateTime, NaiveDateTime, Utc};
use rehearse_types::SessionStatus;
use thiserror::Error;

pub mod entities;
pub mod invites;
pub mod sessions;

pub use entities::{NewEntity, NewUser};
pub use invites::NewInvite;
pub use sessions::{CallDetails, NewSession};

/// Errors from the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested row does not exist — or is outside the caller's
    /// (org, entity) scope, which is deliberately indistinguishable.
    #[error("not found")]
    NotFound,

    /// A status update attempted an illegal regression.
    #[error("invalid status transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    /// A UNIQUE constraint was violated (invite code, user email, ...).
    #[error("duplicate value: {0}")]
    Duplicate(String),

    /// A stored row contains a value the domain enums cannot parse.
    #[error("corrupt row: {0}")]
    CorruptRow(String),

    /// Caller-supplied metadata was not a JSON object.
    #[error("session metadata must be a JSON object")]
    MetadataNotObject,

    /// Session metadata could not be serialized or deserialized.
    #[error("metadata error: {0}")]
    Metadata(#[from] serde_json::Error),

    /// Underlying SQLite failure.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Parses a stored timestamp.
///
/// The schema writes `datetime('now')` (`YYYY-MM-DD HH:MM:SS`) for row
/// creation stamps while call timestamps are written as RFC 3339 by the
/// orchestrator; both forms must round-trip.
pub(crate) fn parse_utc(s: &str) -> Result<DateTime<Utc>, StoreError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|_| StoreError::CorruptRow(format!("unparseable timestamp: {s}")))
}

/// Maps a UNIQUE-constraint failure to [`StoreError::Duplicate`].
pub(crate) fn map_insert_err(err: rusqlite::Error, what: &str) -> StoreError {
    match err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StoreError::Duplicate(what.to_string())
        }
        other => StoreError::Database(other),
    }
}
