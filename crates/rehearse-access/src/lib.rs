//! Access authorization for entities and their sessions.
//!
//! Decides whether a caller may view an entity or a session tied to it,
//! given the entity's visibility and an optionally presented invite code.
//! The check is read-only and is re-evaluated on every access — a token
//! may be presented on session start, on a reload, and on review fetch
//! independently, and nothing here is cached across requests.
//!
//! Denial maps to **Forbidden** at the HTTP layer, never NotFound: the
//! caller is told the entity exists but the code does not grant entry.

use rehearse_types::{Entity, Visibility};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a private entity rejected the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// No token was presented at all.
    MissingToken,
    /// A token was presented but matches no invite for this entity.
    InvalidToken,
}

impl DenyReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::InvalidToken => "invalid_token",
        }
    }
}

/// Outcome of an authorization check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allowed,
    Denied { reason: DenyReason },
}

impl AccessDecision {
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Errors from the authorization layer.
///
/// Note that a *denied* decision is not an error; only infrastructure
/// failures are.
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Pure decision kernel.
///
/// `invite_matches` is the result of the invite lookup for the presented
/// token (meaningless when no token was presented). Split out so the
/// decision table is testable without a database.
pub fn evaluate(
    visibility: Visibility,
    token_presented: bool,
    invite_matches: bool,
) -> AccessDecision {
    if visibility != Visibility::Private {
        return AccessDecision::Allowed;
    }
    if !token_presented {
        return AccessDecision::Denied {
            reason: DenyReason::MissingToken,
        };
    }
    if invite_matches {
        AccessDecision::Allowed
    } else {
        AccessDecision::Denied {
            reason: DenyReason::InvalidToken,
        }
    }
}

/// Authorizes a caller against an entity.
///
/// Non-private entities are always allowed. Private entities require a
/// presented token that matches an invite row for that exact entity —
/// case-sensitive exact match, no expiry, no usage counting.
///
/// # Errors
///
/// Returns `AccessError::Database` if the invite lookup fails. A denied
/// decision is a normal return, not an error.
pub fn authorize(
    conn: &Connection,
    entity: &Entity,
    presented_token: Option<&str>,
) -> Result<AccessDecision, AccessError> {
    if entity.visibility != Visibility::Private {
        return Ok(AccessDecision::Allowed);
    }

    let Some(token) = presented_token else {
        return Ok(AccessDecision::Denied {
            reason: DenyReason::MissingToken,
        });
    };

    let matches = invite_matches(conn, entity.id, token)?;
    if !matches {
        tracing::debug!(entity_id = entity.id, "invite code rejected");
    }
    Ok(evaluate(entity.visibility, true, matches))
}

/// Whether an invite with this exact (entity, code) pair exists.
fn invite_matches(conn: &Connection, entity_id: i64, code: &str) -> Result<bool, AccessError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT id FROM invites WHERE entity_id = ?1 AND code = ?2",
            params![entity_id, code],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}
