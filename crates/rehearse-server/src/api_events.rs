//! SSE stream of live call events for a session.
//!
//! Streams state transitions, final utterances, and ephemeral
//! volume/speech activity while a call is live. Subscribers who attach
//! mid-call receive a state snapshot first so they can render without
//! replaying history.

use crate::api::{with_conn, ApiError};
use crate::api_entities::TokenQuery;
use crate::api_sessions::resolve_session_access;
use crate::middleware::CallerContext;
use crate::AppState;
use axum::{
    extract::{Extension, Path, Query},
    response::{sse::Event, Sse},
};
use futures_util::{stream, Stream, StreamExt};
use rehearse_call::CallEvent;
use std::{convert::Infallible, sync::Arc};
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

/// Handler for `GET /api/sessions/{sessionId}/events`.
pub async fn get_session_events_handler(
    Extension(state): Extension<Arc<AppState>>,
    caller: Option<Extension<CallerContext>>,
    Path(session_id): Path<Uuid>,
    Query(query): Query<TokenQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let identity = caller.map(|Extension(ctx)| ctx.0);
    with_conn(&state, move |conn| {
        resolve_session_access(conn, identity.as_ref(), session_id, query.token.as_deref())
            .map(|_| ())
    })
    .await?;

    let (state_rx, events_rx) = state
        .calls
        .subscribe(session_id)
        .ok_or_else(|| ApiError::NotFound("no live call for this session".to_string()))?;

    let snapshot = CallEvent::State {
        state: *state_rx.borrow(),
    };

    let live = BroadcastStream::new(events_rx).filter_map(|result| async move {
        match result {
            Ok(event) => serialize_event(&event),
            Err(lag) => {
                tracing::warn!(
                    error = %lag,
                    "call SSE stream lagged; events were dropped for this subscriber"
                );
                None
            }
        }
    });

    let stream = stream::iter(serialize_event(&snapshot)).chain(live);

    Ok(Sse::new(stream).keep_alive(axum::response::sse::KeepAlive::default()))
}

fn serialize_event(event: &CallEvent) -> Option<Result<Event, Infallible>> {
    match serde_json::to_string(event) {
        Ok(data) => Some(Ok(Event::default().data(data))),
        Err(e) => {
            tracing::error!("failed to serialize call event: {}", e);
            None
        }
    }
}
