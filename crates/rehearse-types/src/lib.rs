//! Shared types and constants for the Rehearse platform.
//!
//! This crate provides the foundational types used across all Rehearse
//! crates: the entity/session domain enums, row structs, the review
//! payload shape, and the resolved caller identity.
//!
//! No crate in the workspace depends on anything *except* `rehearse-types`
//! for cross-cutting type definitions. This keeps the dependency graph
//! clean and prevents circular dependencies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod review;
mod session;

pub use review::Review;
pub use session::{Session, SessionStatus};

/// The two kinds of practice entity the platform offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A mock interview with a role, domain, and seniority.
    Interview,
    /// A training exercise with a category and difficulty.
    Training,
}

impl EntityKind {
    /// Returns the canonical string form stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Interview => "interview",
            Self::Training => "training",
        }
    }

    /// Parses the database string form.
    ///
    /// Returns `None` for unrecognized strings.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "interview" => Some(Self::Interview),
            "training" => Some(Self::Training),
            _ => None,
        }
    }
}

/// Publication status of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    /// Being authored; not yet available to candidates.
    Draft,
    /// Generally available per its visibility.
    Published,
    /// Available through an organization license.
    Licensed,
    /// Available only through invites.
    InviteOnly,
}

impl EntityStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Licensed => "licensed",
            Self::InviteOnly => "invite_only",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "published" => Some(Self::Published),
            "licensed" => Some(Self::Licensed),
            "invite_only" => Some(Self::InviteOnly),
            _ => None,
        }
    }
}

/// Who may view an entity and its sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Requires a matching invite code.
    Private,
    /// Open to any caller.
    Public,
    /// Open to licensed organizations.
    Licensed,
}

impl Visibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Public => "public",
            Self::Licensed => "licensed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "private" => Some(Self::Private),
            "public" => Some(Self::Public),
            "licensed" => Some(Self::Licensed),
            _ => None,
        }
    }
}

/// Voice-agent configuration attached to an entity.
///
/// Both fields must be present for a call to start; an entity without a
/// complete configuration cannot go live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Provider-side agent identifier.
    pub agent_id: String,
    /// Credential used to start calls against the provider.
    pub credential: String,
}

/// An interview or training template owned by an organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: i64,
    pub org_id: i64,
    pub kind: EntityKind,
    pub title: String,
    pub description: String,
    pub status: EntityStatus,
    pub visibility: Visibility,
    /// Voice-agent configuration, if one has been linked.
    pub agent: Option<AgentConfig>,
    pub created_at: DateTime<Utc>,
}

impl Entity {
    /// Returns the agent configuration or signals that none is linked.
    pub fn agent_config(&self) -> Option<&AgentConfig> {
        self.agent.as_ref()
    }
}

/// An authorization token bound to one entity.
///
/// Reusable and without expiry: presenting a code that matches an invite
/// row for the exact entity grants access, however many times.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invite {
    pub id: i64,
    /// Opaque, unguessable code presented by the caller.
    pub code: String,
    pub entity_id: i64,
    pub org_id: i64,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The caller resolved by the identity layer.
///
/// Passed explicitly into handlers; there is no process-wide auth
/// singleton.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub user_id: i64,
    pub email: String,
    pub org_id: i64,
}
