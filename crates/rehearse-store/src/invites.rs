//! Invite persistence.
//!
//! An invite binds an opaque code to exactly one entity. The authorizer
//! matches codes read-only; nothing here tracks usage.

use crate::{map_insert_err, parse_utc, StoreError};
use rehearse_types::Invite;
use rusqlite::{params, Connection, OptionalExtension, Row};

/// Input for [`create_invite`].
#[derive(Debug, Clone, Default)]
pub struct NewInvite {
    pub entity_id: i64,
    pub org_id: i64,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

fn map_invite_row(row: &Row<'_>) -> Result<Invite, StoreError> {
    Ok(Invite {
        id: row.get(0)?,
        code: row.get(1)?,
        entity_id: row.get(2)?,
        org_id: row.get(3)?,
        name: row.get(4)?,
        email: row.get(5)?,
        phone: row.get(6)?,
        created_at: parse_utc(&row.get::<_, String>(7)?)?,
    })
}

/// Creates an invite with the given code.
///
/// Code generation is the caller's concern; the store only enforces
/// uniqueness.
pub fn create_invite(conn: &Connection, code: &str, new: &NewInvite) -> Result<Invite, StoreError> {
    conn.execute(
        "INSERT INTO invites (code, entity_id, org_id, name, email, phone)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![code, new.entity_id, new.org_id, new.name, new.email, new.phone],
    )
    .map_err(|e| map_insert_err(e, "invite code"))?;

    let id = conn.last_insert_rowid();
    conn.query_row(
        "SELECT id, code, entity_id, org_id, name, email, phone, created_at
         FROM invites WHERE id = ?1",
        params![id],
        |row| Ok(map_invite_row(row)),
    )?
}

/// Looks up an invite by (entity, code) — the exact pair the authorizer
/// requires.
pub fn find_invite(conn: &Connection, entity_id: i64, code: &str) -> Result<Invite, StoreError> {
    conn.query_row(
        "SELECT id, code, entity_id, org_id, name, email, phone, created_at
         FROM invites WHERE entity_id = ?1 AND code = ?2",
        params![entity_id, code],
        |row| Ok(map_invite_row(row)),
    )
    .optional()?
    .unwrap_or(Err(StoreError::NotFound))
}
