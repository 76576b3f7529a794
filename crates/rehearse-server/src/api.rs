//! Shared API plumbing: the error taxonomy and access resolution.

use crate::AppState;
use axum::{
    extract::Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rehearse_access::{AccessDecision, DenyReason};
use rehearse_call::CallError;
use rehearse_store::{entities, StoreError};
use rehearse_types::{CallerIdentity, Entity};
use std::sync::Arc;
use thiserror::Error;

/// API error type mapping to HTTP status codes.
///
/// Every failure serializes as `{"success": false, "error": "<message>"}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("voice agent unavailable: {0}")]
    AgentUnavailable(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::AgentUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(serde_json::json!({
            "success": false,
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ApiError::NotFound("resource not found".to_string()),
            StoreError::InvalidTransition { from, to } => ApiError::Conflict(format!(
                "illegal status transition: {} -> {}",
                from.as_str(),
                to.as_str()
            )),
            StoreError::Duplicate(what) => ApiError::Conflict(format!("duplicate {what}")),
            StoreError::MetadataNotObject => {
                ApiError::BadRequest("metadata must be a JSON object".to_string())
            }
            other => ApiError::InternalServerError(other.to_string()),
        }
    }
}

impl From<CallError> for ApiError {
    fn from(err: CallError) -> Self {
        match err {
            CallError::AgentUnavailable => {
                ApiError::AgentUnavailable("no voice agent configured for this entity".to_string())
            }
            CallError::Connect(msg) => {
                ApiError::AgentUnavailable(format!("agent connection failed: {msg}"))
            }
            CallError::Store(store) => store.into(),
            CallError::Pool(msg) => ApiError::InternalServerError(msg),
        }
    }
}

/// Runs a closure against a pooled connection on the blocking pool.
pub(crate) async fn with_conn<T, F>(state: &Arc<AppState>, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&rusqlite::Connection) -> Result<T, ApiError> + Send + 'static,
{
    let pool = state.pool.clone();
    tokio::task::spawn_blocking(move || {
        let conn = pool
            .get()
            .map_err(|e| ApiError::InternalServerError(format!("db connection failed: {e}")))?;
        f(&conn)
    })
    .await
    .map_err(|e| ApiError::InternalServerError(format!("task join error: {e}")))?
}

/// Resolves an entity and enforces access for the caller.
///
/// Access is granted to members of the entity's own organization
/// (org-scoped), and otherwise by the authorizer: non-private visibility
/// passes, private requires a matching invite token. The check is
/// re-evaluated on every call — nothing is cached across requests.
///
/// Denial is 403 with the denial reason, never 404: the authorizer's
/// verdict must not masquerade as absence.
pub(crate) fn resolve_entity_access(
    conn: &rusqlite::Connection,
    identity: Option<&CallerIdentity>,
    entity_id: i64,
    token: Option<&str>,
) -> Result<Entity, ApiError> {
    let entity = entities::get_entity_by_id(conn, entity_id).map_err(ApiError::from)?;

    if identity.is_some_and(|caller| caller.org_id == entity.org_id) {
        return Ok(entity);
    }

    let decision = rehearse_access::authorize(conn, &entity, token)
        .map_err(|e| ApiError::InternalServerError(e.to_string()))?;
    match decision {
        AccessDecision::Allowed => Ok(entity),
        AccessDecision::Denied { reason } => {
            let message = match reason {
                DenyReason::MissingToken => "invite token required",
                DenyReason::InvalidToken => "invalid invite token",
            };
            Err(ApiError::Forbidden(message.to_string()))
        }
    }
}
