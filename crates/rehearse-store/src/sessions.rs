//! The Session Store: one row per call attempt.
//!
//! Writes follow the lifecycle discipline: `create_session` always inserts
//! a fresh row (sessions are never resumed), `update_status` is a
//! compare-and-set guarded by the transition lattice, and
//! `record_call_details` is the single finalization write at call end —
//! partial transcripts are never persisted.

use crate::{map_insert_err, parse_utc, StoreError};
use chrono::{DateTime, Utc};
use rehearse_types::{Session, SessionStatus};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

/// Input for [`create_session`].
#[derive(Debug, Clone, Default)]
pub struct NewSession {
    pub entity_id: i64,
    pub org_id: i64,
    /// `None` for anonymous/invited sessions.
    pub user_id: Option<i64>,
    /// The invite token presented at creation, if any.
    pub token: Option<String>,
    /// Caller-supplied context merged into the metadata object.
    pub metadata: Option<serde_json::Value>,
}

/// Final call details written exactly once when a call ends.
#[derive(Debug, Clone)]
pub struct CallDetails {
    pub transcript: String,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: DateTime<Utc>,
    pub ended_reason: String,
}

fn map_session_row(row: &Row<'_>) -> Result<Session, StoreError> {
    let id_text: String = row.get(0)?;
    let id = Uuid::parse_str(&id_text)
        .map_err(|_| StoreError::CorruptRow(format!("bad session id: {id_text}")))?;

    let status_text: String = row.get(5)?;
    let status = SessionStatus::parse(&status_text)
        .ok_or_else(|| StoreError::CorruptRow(format!("unknown session status: {status_text}")))?;

    let metadata_text: String = row.get(10)?;
    let metadata = serde_json::from_str(&metadata_text)?;

    let call_started_at = row
        .get::<_, Option<String>>(7)?
        .map(|s| parse_utc(&s))
        .transpose()?;
    let call_ended_at = row
        .get::<_, Option<String>>(8)?
        .map(|s| parse_utc(&s))
        .transpose()?;
    let created_at = parse_utc(&row.get::<_, String>(11)?)?;

    Ok(Session {
        id,
        entity_id: row.get(1)?,
        org_id: row.get(2)?,
        user_id: row.get(3)?,
        token: row.get(4)?,
        status,
        transcript: row.get(6)?,
        call_started_at,
        call_ended_at,
        call_ended_reason: row.get(9)?,
        metadata,
        created_at,
    })
}

const SESSION_COLUMNS: &str = "id, entity_id, org_id, user_id, token, status, transcript,
     call_started_at, call_ended_at, call_ended_reason, metadata_json, created_at";

/// Creates a new session row.
///
/// Always inserts — prior sessions for the same entity are never reused.
/// The id is a fresh UUID v4, status starts at `created`, and
/// `metadata.started_at` is stamped with the creation instant.
///
/// # Errors
///
/// Returns `StoreError::Database` on SQL failure or `StoreError::Metadata`
/// if the caller-supplied metadata is not a JSON object.
pub fn create_session(conn: &Connection, new: NewSession) -> Result<Session, StoreError> {
    let id = Uuid::new_v4();
    let now = Utc::now();

    // Merge the caller's context into a metadata object and stamp it.
    let mut metadata = match new.metadata {
        Some(serde_json::Value::Object(map)) => map,
        Some(_) => return Err(StoreError::MetadataNotObject),
        None => serde_json::Map::new(),
    };
    metadata.insert(
        "started_at".to_string(),
        serde_json::Value::String(now.to_rfc3339()),
    );
    let metadata_json = serde_json::to_string(&metadata)?;

    let created_at: String = conn
        .query_row(
            "INSERT INTO sessions (id, entity_id, org_id, user_id, token, status, metadata_json)
             VALUES (?1, ?2, ?3, ?4, ?5, 'created', ?6)
             RETURNING created_at",
            params![
                id.to_string(),
                new.entity_id,
                new.org_id,
                new.user_id,
                new.token,
                metadata_json,
            ],
            |row| row.get(0),
        )
        .map_err(|e| map_insert_err(e, "session id"))?;

    tracing::info!(session_id = %id, entity_id = new.entity_id, "created session");

    Ok(Session {
        id,
        entity_id: new.entity_id,
        org_id: new.org_id,
        user_id: new.user_id,
        token: new.token,
        status: SessionStatus::Created,
        transcript: String::new(),
        call_started_at: None,
        call_ended_at: None,
        call_ended_reason: None,
        metadata: serde_json::Value::Object(metadata),
        created_at: parse_utc(&created_at)?,
    })
}

/// Fetches a session scoped by organization AND entity AND id.
///
/// All three keys participate in the WHERE clause so a cross-tenant or
/// cross-entity probe is indistinguishable from a missing row.
///
/// # Errors
///
/// Returns `StoreError::NotFound` when no row matches the full scope.
pub fn get_session(
    conn: &Connection,
    org_id: i64,
    entity_id: i64,
    session_id: Uuid,
) -> Result<Session, StoreError> {
    let sql = format!(
        "SELECT {SESSION_COLUMNS} FROM sessions
         WHERE id = ?1 AND org_id = ?2 AND entity_id = ?3"
    );
    conn.query_row(
        &sql,
        params![session_id.to_string(), org_id, entity_id],
        |row| Ok(map_session_row(row)),
    )
    .optional()?
    .unwrap_or(Err(StoreError::NotFound))
}

/// Fetches a session by id alone.
///
/// Used by the orchestrator, which already holds a session it created;
/// HTTP reads go through the scoped [`get_session`].
pub fn get_session_by_id(conn: &Connection, session_id: Uuid) -> Result<Session, StoreError> {
    let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1");
    conn.query_row(&sql, params![session_id.to_string()], |row| {
        Ok(map_session_row(row))
    })
    .optional()?
    .unwrap_or(Err(StoreError::NotFound))
}

/// Advances a session's status with a compare-and-set update.
///
/// The `UPDATE` is guarded by `status IN (<legal predecessors>)`, so a
/// concurrent duplicate of the same transition loses the race harmlessly.
/// Re-asserting the current terminal state is an idempotent no-op that
/// returns the unchanged status; any other regression is
/// `StoreError::InvalidTransition`.
///
/// # Errors
///
/// `StoreError::NotFound` if the session does not exist;
/// `StoreError::InvalidTransition` on an illegal regression.
pub fn update_status(
    conn: &Connection,
    session_id: Uuid,
    next: SessionStatus,
) -> Result<SessionStatus, StoreError> {
    let predecessors = next.predecessors();
    if !predecessors.is_empty() {
        // Build the IN (...) guard from the lattice, values bound as params.
        let placeholders: Vec<String> = (0..predecessors.len())
            .map(|i| format!("?{}", i + 3))
            .collect();
        let sql = format!(
            "UPDATE sessions SET status = ?1 WHERE id = ?2 AND status IN ({})",
            placeholders.join(", ")
        );

        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = vec![
            Box::new(next.as_str().to_string()),
            Box::new(session_id.to_string()),
        ];
        for p in predecessors {
            param_values.push(Box::new(p.as_str().to_string()));
        }
        let params_refs: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| &**p).collect();

        let changed = conn.execute(&sql, params_refs.as_slice())?;
        if changed == 1 {
            tracing::debug!(session_id = %session_id, status = next.as_str(), "status advanced");
            return Ok(next);
        }
    }

    // CAS failed: distinguish absence, idempotent rewrite, and regression.
    let current: Option<String> = conn
        .query_row(
            "SELECT status FROM sessions WHERE id = ?1",
            params![session_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;

    let Some(current) = current else {
        return Err(StoreError::NotFound);
    };
    let current = SessionStatus::parse(&current)
        .ok_or_else(|| StoreError::CorruptRow(format!("unknown session status: {current}")))?;

    if current == next && current.is_terminal() {
        return Ok(current);
    }
    Err(StoreError::InvalidTransition {
        from: current,
        to: next,
    })
}

/// Writes the final call details. Called once, at call end.
///
/// # Errors
///
/// Returns `StoreError::NotFound` if the session does not exist.
pub fn record_call_details(
    conn: &Connection,
    session_id: Uuid,
    details: &CallDetails,
) -> Result<(), StoreError> {
    let changed = conn.execute(
        "UPDATE sessions
         SET transcript = ?1, call_started_at = ?2, call_ended_at = ?3, call_ended_reason = ?4
         WHERE id = ?5",
        params![
            details.transcript,
            details.started_at.map(|t| t.to_rfc3339()),
            details.ended_at.to_rfc3339(),
            details.ended_reason,
            session_id.to_string(),
        ],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

/// Lists sessions for an entity, newest first.
pub fn list_entity_sessions(
    conn: &Connection,
    org_id: i64,
    entity_id: i64,
) -> Result<Vec<Session>, StoreError> {
    let sql = format!(
        "SELECT {SESSION_COLUMNS} FROM sessions
         WHERE org_id = ?1 AND entity_id = ?2
         ORDER BY created_at DESC, id DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![org_id, entity_id], |row| Ok(map_session_row(row)))?;

    let mut sessions = Vec::new();
    for row in rows {
        sessions.push(row??);
    }
    Ok(sessions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::conn_with_org;

    fn seed_entity(conn: &Connection) -> i64 {
        conn.execute(
            "INSERT INTO entities (org_id, kind, title, description, status, visibility)
             VALUES (1, 'interview', 'Backend', '', 'published', 'public')",
            [],
        )
        .unwrap();
        conn.last_insert_rowid()
    }

    #[test]
    fn create_then_get_round_trips() {
        let conn = conn_with_org();
        let entity_id = seed_entity(&conn);

        let session = create_session(
            &conn,
            NewSession {
                entity_id,
                org_id: 1,
                metadata: Some(serde_json::json!({"kind": "interview", "domain": "backend"})),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(session.status, SessionStatus::Created);
        assert!(session.metadata.get("started_at").is_some());
        assert_eq!(session.metadata["domain"], "backend");

        let fetched = get_session(&conn, 1, entity_id, session.id).unwrap();
        assert_eq!(fetched.id, session.id);
        assert_eq!(fetched.status, SessionStatus::Created);
        assert_eq!(fetched.metadata, session.metadata);
    }

    #[test]
    fn get_session_scopes_by_org_and_entity() {
        let conn = conn_with_org();
        let entity_id = seed_entity(&conn);
        conn.execute(
            "INSERT INTO organizations (slug, label) VALUES ('other', 'Other')",
            [],
        )
        .unwrap();

        let session = create_session(
            &conn,
            NewSession {
                entity_id,
                org_id: 1,
                ..Default::default()
            },
        )
        .unwrap();

        // Wrong org.
        assert!(matches!(
            get_session(&conn, 2, entity_id, session.id),
            Err(StoreError::NotFound)
        ));
        // Wrong entity.
        assert!(matches!(
            get_session(&conn, 1, entity_id + 1, session.id),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn status_walks_the_lattice() {
        let conn = conn_with_org();
        let entity_id = seed_entity(&conn);
        let session = create_session(
            &conn,
            NewSession {
                entity_id,
                org_id: 1,
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(
            update_status(&conn, session.id, SessionStatus::InProgress).unwrap(),
            SessionStatus::InProgress
        );
        assert_eq!(
            update_status(&conn, session.id, SessionStatus::Completed).unwrap(),
            SessionStatus::Completed
        );
    }

    #[test]
    fn terminal_rewrite_is_idempotent() {
        let conn = conn_with_org();
        let entity_id = seed_entity(&conn);
        let session = create_session(
            &conn,
            NewSession {
                entity_id,
                org_id: 1,
                ..Default::default()
            },
        )
        .unwrap();

        update_status(&conn, session.id, SessionStatus::InProgress).unwrap();
        update_status(&conn, session.id, SessionStatus::Completed).unwrap();

        // Duplicate terminal trigger: no-op, still completed.
        assert_eq!(
            update_status(&conn, session.id, SessionStatus::Completed).unwrap(),
            SessionStatus::Completed
        );
        let row = get_session(&conn, 1, entity_id, session.id).unwrap();
        assert_eq!(row.status, SessionStatus::Completed);
    }

    #[test]
    fn regressions_are_rejected() {
        let conn = conn_with_org();
        let entity_id = seed_entity(&conn);
        let session = create_session(
            &conn,
            NewSession {
                entity_id,
                org_id: 1,
                ..Default::default()
            },
        )
        .unwrap();

        update_status(&conn, session.id, SessionStatus::InProgress).unwrap();
        update_status(&conn, session.id, SessionStatus::Completed).unwrap();

        let err = update_status(&conn, session.id, SessionStatus::InProgress).unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidTransition {
                from: SessionStatus::Completed,
                to: SessionStatus::InProgress,
            }
        ));

        // Skipping created -> completed is also illegal.
        let fresh = create_session(
            &conn,
            NewSession {
                entity_id,
                org_id: 1,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(matches!(
            update_status(&conn, fresh.id, SessionStatus::Completed),
            Err(StoreError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn update_status_missing_session() {
        let conn = conn_with_org();
        assert!(matches!(
            update_status(&conn, Uuid::new_v4(), SessionStatus::InProgress),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn call_details_finalize_once() {
        let conn = conn_with_org();
        let entity_id = seed_entity(&conn);
        let session = create_session(
            &conn,
            NewSession {
                entity_id,
                org_id: 1,
                ..Default::default()
            },
        )
        .unwrap();

        let started = Utc::now();
        let ended = started + chrono::Duration::seconds(90);
        record_call_details(
            &conn,
            session.id,
            &CallDetails {
                transcript: "Interviewer: Hello\nCandidate: Hi".to_string(),
                started_at: Some(started),
                ended_at: ended,
                ended_reason: "agent_hangup".to_string(),
            },
        )
        .unwrap();

        let row = get_session(&conn, 1, entity_id, session.id).unwrap();
        assert!(row.transcript.contains("Candidate: Hi"));
        assert_eq!(row.call_ended_reason.as_deref(), Some("agent_hangup"));
        assert_eq!(row.call_ended_at.unwrap().timestamp(), ended.timestamp());
    }

    #[test]
    fn rejects_non_object_metadata() {
        let conn = conn_with_org();
        let entity_id = seed_entity(&conn);
        let err = create_session(
            &conn,
            NewSession {
                entity_id,
                org_id: 1,
                metadata: Some(serde_json::json!(["not", "an", "object"])),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::MetadataNotObject));
    }

    #[test]
    fn list_is_newest_first() {
        let conn = conn_with_org();
        let entity_id = seed_entity(&conn);
        let first = create_session(
            &conn,
            NewSession {
                entity_id,
                org_id: 1,
                ..Default::default()
            },
        )
        .unwrap();
        let second = create_session(
            &conn,
            NewSession {
                entity_id,
                org_id: 1,
                ..Default::default()
            },
        )
        .unwrap();

        let listed = list_entity_sessions(&conn, 1, entity_id).unwrap();
        assert_eq!(listed.len(), 2);
        let ids: Vec<Uuid> = listed.iter().map(|s| s.id).collect();
        assert!(ids.contains(&first.id));
        assert!(ids.contains(&second.id));
    }
}
