//! Organization, user, and entity persistence.
//!
//! These are the thin collaborators of the session lifecycle: enough CRUD
//! to create the rows the lifecycle reads, nothing more.

use crate::{map_insert_err, parse_utc, StoreError};
use rehearse_types::{
    AgentConfig, CallerIdentity, Entity, EntityKind, EntityStatus, Visibility,
};
use rusqlite::{params, Connection, OptionalExtension, Row};

/// Creates an organization and returns its id.
pub fn create_organization(conn: &Connection, slug: &str, label: &str) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT INTO organizations (slug, label) VALUES (?1, ?2)",
        params![slug, label],
    )
    .map_err(|e| map_insert_err(e, "organization slug"))?;
    Ok(conn.last_insert_rowid())
}

/// Input for [`create_user`].
#[derive(Debug, Clone)]
pub struct NewUser {
    pub org_id: i64,
    pub email: String,
    /// Opaque bearer credential the identity middleware matches against.
    pub api_key: String,
}

/// Creates a user and returns its id.
pub fn create_user(conn: &Connection, new: &NewUser) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT INTO users (org_id, email, api_key) VALUES (?1, ?2, ?3)",
        params![new.org_id, new.email, new.api_key],
    )
    .map_err(|e| map_insert_err(e, "user email or api key"))?;
    Ok(conn.last_insert_rowid())
}

/// Resolves an API key to a caller identity.
///
/// Any miss is `StoreError::NotFound`; the middleware maps that to 401
/// without distinguishing unknown keys from disabled ones.
pub fn find_user_by_api_key(conn: &Connection, api_key: &str) -> Result<CallerIdentity, StoreError> {
    conn.query_row(
        "SELECT id, email, org_id FROM users WHERE api_key = ?1",
        params![api_key],
        |row| {
            Ok(CallerIdentity {
                user_id: row.get(0)?,
                email: row.get(1)?,
                org_id: row.get(2)?,
            })
        },
    )
    .optional()?
    .ok_or(StoreError::NotFound)
}

/// Input for [`create_entity`].
#[derive(Debug, Clone)]
pub struct NewEntity {
    pub org_id: i64,
    pub kind: EntityKind,
    pub title: String,
    pub description: String,
    pub status: EntityStatus,
    pub visibility: Visibility,
    pub agent: Option<AgentConfig>,
}

fn map_entity_row(row: &Row<'_>) -> Result<Entity, StoreError> {
    let kind_text: String = row.get(2)?;
    let kind = EntityKind::parse(&kind_text)
        .ok_or_else(|| StoreError::CorruptRow(format!("unknown entity kind: {kind_text}")))?;
    let status_text: String = row.get(5)?;
    let status = EntityStatus::parse(&status_text)
        .ok_or_else(|| StoreError::CorruptRow(format!("unknown entity status: {status_text}")))?;
    let visibility_text: String = row.get(6)?;
    let visibility = Visibility::parse(&visibility_text).ok_or_else(|| {
        StoreError::CorruptRow(format!("unknown entity visibility: {visibility_text}"))
    })?;

    // An agent link is only usable when both columns are present.
    let agent_id: Option<String> = row.get(7)?;
    let agent_credential: Option<String> = row.get(8)?;
    let agent = match (agent_id, agent_credential) {
        (Some(agent_id), Some(credential)) => Some(AgentConfig {
            agent_id,
            credential,
        }),
        _ => None,
    };

    Ok(Entity {
        id: row.get(0)?,
        org_id: row.get(1)?,
        kind,
        title: row.get(3)?,
        description: row.get(4)?,
        status,
        visibility,
        agent,
        created_at: parse_utc(&row.get::<_, String>(9)?)?,
    })
}

const ENTITY_COLUMNS: &str = "id, org_id, kind, title, description, status, visibility,
     agent_id, agent_credential, created_at";

/// Creates an entity and returns the stored row.
pub fn create_entity(conn: &Connection, new: &NewEntity) -> Result<Entity, StoreError> {
    let (agent_id, agent_credential) = match &new.agent {
        Some(agent) => (Some(agent.agent_id.as_str()), Some(agent.credential.as_str())),
        None => (None, None),
    };

    let id: i64 = conn.query_row(
        "INSERT INTO entities (org_id, kind, title, description, status, visibility,
                               agent_id, agent_credential)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         RETURNING id",
        params![
            new.org_id,
            new.kind.as_str(),
            new.title,
            new.description,
            new.status.as_str(),
            new.visibility.as_str(),
            agent_id,
            agent_credential,
        ],
        |row| row.get(0),
    )?;

    get_entity(conn, new.org_id, id)
}

/// Fetches an entity scoped by organization.
///
/// # Errors
///
/// Returns `StoreError::NotFound` when the entity does not exist or
/// belongs to a different organization.
pub fn get_entity(conn: &Connection, org_id: i64, entity_id: i64) -> Result<Entity, StoreError> {
    let sql = format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE id = ?1 AND org_id = ?2");
    conn.query_row(&sql, params![entity_id, org_id], |row| {
        Ok(map_entity_row(row))
    })
    .optional()?
    .unwrap_or(Err(StoreError::NotFound))
}

/// Fetches an entity by id alone.
///
/// The invited-guest path has no organization of its own — the entity's
/// org scopes everything downstream. Access control still applies via the
/// authorizer before anything is returned to a caller.
pub fn get_entity_by_id(conn: &Connection, entity_id: i64) -> Result<Entity, StoreError> {
    let sql = format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE id = ?1");
    conn.query_row(&sql, params![entity_id], |row| Ok(map_entity_row(row)))
        .optional()?
        .unwrap_or(Err(StoreError::NotFound))
}
