//! Review retrieval handler.
//!
//! The retriever runs server-side with a single in-flight cycle per
//! session; this endpoint reports the cycle's state instead of holding
//! the request open across up to a minute and a half of backoff.

use crate::api::{with_conn, ApiError};
use crate::api_entities::TokenQuery;
use crate::api_sessions::resolve_session_access;
use crate::middleware::CallerContext;
use crate::AppState;
use axum::{
    extract::{Extension, Path, Query},
    Json,
};
use rehearse_review::{ReviewFetchState, ReviewRequest};
use rehearse_types::SessionStatus;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Handler for `GET /api/sessions/{sessionId}/review`.
///
/// Access is re-checked on every call — the token presented at session
/// start does not carry over. The first call after completion starts a
/// fetch cycle; subsequent calls observe it: `pending` (with progress for
/// an indicator), `ready` (with the review), or `unavailable` once the
/// retry ceiling is exhausted.
pub async fn get_review_handler(
    Extension(state): Extension<Arc<AppState>>,
    caller: Option<Extension<CallerContext>>,
    Path(session_id): Path<Uuid>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<Value>, ApiError> {
    let identity = caller.map(|Extension(ctx)| ctx.0);
    let (session, entity) = with_conn(&state, move |conn| {
        resolve_session_access(conn, identity.as_ref(), session_id, query.token.as_deref())
    })
    .await?;

    if session.status != SessionStatus::Completed {
        return Err(ApiError::Conflict(format!(
            "no review for a session in status '{}'",
            session.status.as_str()
        )));
    }

    let fetch_state = match state.reviews.state(session_id) {
        Some(fetch_state) => fetch_state,
        None => {
            state.reviews.spawn(
                state.score_source.clone(),
                state.review_policy,
                ReviewRequest {
                    session_id,
                    entity_id: entity.id,
                    org_id: entity.org_id,
                },
            );
            ReviewFetchState::Pending
        }
    };

    let body = match fetch_state {
        ReviewFetchState::Pending => {
            let progress = state.reviews.progress(session_id);
            json!({
                "success": true,
                "review_status": "pending",
                "progress": progress,
            })
        }
        ReviewFetchState::Ready { review } => json!({
            "success": true,
            "review_status": "ready",
            "review": review,
        }),
        ReviewFetchState::Unavailable { attempts } => json!({
            "success": false,
            "review_status": "unavailable",
            "error": format!("no review available after {attempts} attempts"),
        }),
    };

    Ok(Json(body))
}
