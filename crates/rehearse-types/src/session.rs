//! Session record types and the status transition lattice.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a session.
///
/// Transitions are monotonic: `created → in_progress → {completed,
/// cancelled}`. Terminal states never regress; re-asserting a terminal
/// state is permitted so duplicate finalization triggers stay idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Created,
    InProgress,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(Self::Created),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Whether this status accepts no further forward transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Whether a transition from `self` to `next` is allowed.
    ///
    /// Identity transitions on terminal states are allowed (idempotent
    /// re-finalization); all other regressions are not.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        match (self, next) {
            (Self::Created, Self::InProgress) => true,
            (Self::Created, Self::Cancelled) => true,
            (Self::InProgress, Self::Completed) => true,
            (Self::InProgress, Self::Cancelled) => true,
            (a, b) if a.is_terminal() && a == b => true,
            _ => false,
        }
    }

    /// The statuses from which `self` may be reached.
    ///
    /// Used by the store to build compare-and-set updates: an `UPDATE`
    /// guarded by `status IN (...)` only succeeds when the stored status
    /// is a legal predecessor.
    pub fn predecessors(self) -> &'static [SessionStatus] {
        match self {
            Self::Created => &[],
            Self::InProgress => &[Self::Created],
            Self::Completed => &[Self::InProgress],
            Self::Cancelled => &[Self::Created, Self::InProgress],
        }
    }
}

/// One attempt at an entity: the session row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Public-facing identifier.
    pub id: Uuid,
    pub entity_id: i64,
    pub org_id: i64,
    /// Owning user; `None` for anonymous/invited sessions.
    pub user_id: Option<i64>,
    /// The invite token presented at creation, if any.
    pub token: Option<String>,
    pub status: SessionStatus,
    /// Final call transcript; empty until the call is finalized.
    pub transcript: String,
    pub call_started_at: Option<DateTime<Utc>>,
    pub call_ended_at: Option<DateTime<Utc>>,
    pub call_ended_reason: Option<String>,
    /// Free-form JSON: session kind, caller-supplied context, `started_at`.
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
