//! Session lifecycle handlers: start, read, end, list.

use crate::api::{resolve_entity_access, with_conn, ApiError};
use crate::api_entities::TokenQuery;
use crate::middleware::CallerContext;
use crate::AppState;
use axum::{
    extract::{Extension, Path, Query},
    Json,
};
use rehearse_call::CallState;
use rehearse_store::sessions::{self, CallDetails, NewSession};
use rehearse_types::{CallerIdentity, Entity, Session, SessionStatus};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Resolves a session and enforces access through its entity.
///
/// The access check is re-evaluated on every call: session read, end, and
/// review fetch each present their own token. The final read is the
/// triple-scoped store lookup, so a session outside the resolved
/// (org, entity) scope reads as absent.
pub(crate) fn resolve_session_access(
    conn: &rusqlite::Connection,
    identity: Option<&CallerIdentity>,
    session_id: Uuid,
    token: Option<&str>,
) -> Result<(Session, Entity), ApiError> {
    let session = sessions::get_session_by_id(conn, session_id).map_err(ApiError::from)?;
    let entity = resolve_entity_access(conn, identity, session.entity_id, token)?;
    let session =
        sessions::get_session(conn, entity.org_id, entity.id, session_id).map_err(ApiError::from)?;
    Ok((session, entity))
}

/// Request body for session start.
#[derive(Debug, Default, Deserialize)]
pub struct StartSessionRequest {
    /// Caller-supplied context (domain, seniority, category, ...).
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// Handler for `POST /api/entities/{entityId}/sessions/start`.
///
/// Always creates a fresh session row — sessions are never resumed — and
/// starts its voice call. A missing agent configuration is fatal and
/// surfaces as 503 without retry.
pub async fn start_session_handler(
    Extension(state): Extension<Arc<AppState>>,
    caller: Option<Extension<CallerContext>>,
    Path(entity_id): Path<i64>,
    Query(query): Query<TokenQuery>,
    payload: Option<Json<StartSessionRequest>>,
) -> Result<Json<Value>, ApiError> {
    let identity = caller.map(|Extension(ctx)| ctx.0);
    let token = query.token.clone();
    let payload = payload.map(|Json(p)| p).unwrap_or_default();

    // The session's kind tag rides in its metadata alongside whatever
    // context the caller supplied.
    let mut metadata = match payload.metadata {
        Some(Value::Object(map)) => map,
        Some(_) => return Err(ApiError::BadRequest("metadata must be a JSON object".to_string())),
        None => serde_json::Map::new(),
    };

    let user_id = identity.as_ref().map(|caller| caller.user_id);
    let (entity, session) = with_conn(&state, {
        let token = token.clone();
        move |conn| {
            let entity =
                resolve_entity_access(conn, identity.as_ref(), entity_id, token.as_deref())?;
            metadata.insert(
                "kind".to_string(),
                Value::String(entity.kind.as_str().to_string()),
            );
            let session = sessions::create_session(
                conn,
                NewSession {
                    entity_id: entity.id,
                    org_id: entity.org_id,
                    user_id,
                    token,
                    metadata: Some(Value::Object(metadata)),
                },
            )
            .map_err(ApiError::from)?;
            Ok((entity, session))
        }
    })
    .await?;

    state
        .calls
        .start(&state.pool, state.connector.as_ref(), &entity, &session)
        .await?;

    Ok(Json(json!({
        "success": true,
        "session": session,
        "call_state": CallState::Connecting,
    })))
}

/// Handler for `GET /api/sessions/{sessionId}`.
pub async fn get_session_handler(
    Extension(state): Extension<Arc<AppState>>,
    caller: Option<Extension<CallerContext>>,
    Path(session_id): Path<Uuid>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<Value>, ApiError> {
    let identity = caller.map(|Extension(ctx)| ctx.0);
    let (session, _entity) = with_conn(&state, move |conn| {
        resolve_session_access(conn, identity.as_ref(), session_id, query.token.as_deref())
    })
    .await?;

    let call_state = state.calls.state(session_id);
    Ok(Json(json!({
        "success": true,
        "session": session,
        "call_state": call_state,
    })))
}

/// Handler for `POST /api/sessions/{sessionId}/end`.
///
/// The user-triggered terminal path. With a live call this routes through
/// the orchestrator's completion token, so a race with the provider's own
/// call-end performs exactly one finalization. Without a live call a
/// non-terminal session is closed out as cancelled; terminal sessions are
/// an idempotent no-op.
pub async fn end_session_handler(
    Extension(state): Extension<Arc<AppState>>,
    caller: Option<Extension<CallerContext>>,
    Path(session_id): Path<Uuid>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<Value>, ApiError> {
    let identity = caller.map(|Extension(ctx)| ctx.0);
    let (session, _entity) = with_conn(&state, {
        let token = query.token.clone();
        move |conn| resolve_session_access(conn, identity.as_ref(), session_id, token.as_deref())
    })
    .await?;

    if state.calls.end(session_id) {
        return Ok(Json(json!({ "success": true, "status": "ending" })));
    }

    if session.status.is_terminal() {
        return Ok(Json(json!({ "success": true, "status": session.status })));
    }

    // No live call to wind down (e.g. the server restarted mid-session):
    // close the row out directly.
    let status = with_conn(&state, move |conn| {
        let status = sessions::update_status(conn, session_id, SessionStatus::Cancelled)
            .map_err(ApiError::from)?;
        sessions::record_call_details(
            conn,
            session_id,
            &CallDetails {
                transcript: String::new(),
                started_at: None,
                ended_at: Utc::now(),
                ended_reason: "user_ended".to_string(),
            },
        )
        .map_err(ApiError::from)?;
        Ok(status)
    })
    .await?;

    Ok(Json(json!({ "success": true, "status": status })))
}

/// Handler for `GET /api/entities/{entityId}/sessions`.
///
/// Org members only; scoped to their own organization.
pub async fn list_sessions_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(caller): Extension<CallerContext>,
    Path(entity_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let org_id = caller.0.org_id;
    let sessions = with_conn(&state, move |conn| {
        // Scoped entity fetch first, so another org's entity reads as
        // absent rather than leaking an empty list.
        rehearse_store::entities::get_entity(conn, org_id, entity_id).map_err(ApiError::from)?;
        sessions::list_entity_sessions(conn, org_id, entity_id).map_err(ApiError::from)
    })
    .await?;

    Ok(Json(json!({ "success": true, "sessions": sessions })))
}
