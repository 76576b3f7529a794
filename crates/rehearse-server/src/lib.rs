//! Rehearse server library logic.
//!
//! Wires the session lifecycle together: the access authorizer gates
//! entry, the session store tracks rows, the call registry runs the live
//! voice call, and the review registry retrieves scored feedback once a
//! call completes.

pub mod api;
pub mod api_entities;
pub mod api_events;
pub mod api_review;
pub mod api_sessions;
pub mod config;
pub mod middleware;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Json, Router,
};
use rehearse_call::{AgentConnector, CallRegistry};
use rehearse_db::DbPool;
use rehearse_review::{RetryPolicy, ReviewFetchRegistry, ScoreSource};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use api::ApiError;

/// Maximum request body size (256 KiB). Session-start payloads are small;
/// anything larger is hostile.
const MAX_REQUEST_BODY_BYTES: usize = 256 * 1024;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    /// Live voice-call instances, one per session at most.
    pub calls: CallRegistry,
    /// In-flight review fetch cycles, one per session at most.
    pub reviews: ReviewFetchRegistry,
    /// Voice-agent provider.
    pub connector: Arc<dyn AgentConnector>,
    /// Scoring service client.
    pub score_source: Arc<dyn ScoreSource>,
    /// Retry profile for review fetch cycles.
    pub review_policy: RetryPolicy,
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    // Routes reserved for authenticated org members.
    let org_routes = Router::new()
        .route("/api/entities", post(api_entities::create_entity_handler))
        .route(
            "/api/entities/{entityId}/invites",
            post(api_entities::create_invite_handler),
        )
        .route(
            "/api/entities/{entityId}/sessions",
            get(api_sessions::list_sessions_handler),
        )
        .layer(axum::middleware::from_fn(middleware::auth_middleware));

    // Session-lifecycle routes: invited guests arrive anonymously with a
    // `token` query parameter; org members arrive with their credential.
    let session_routes = Router::new()
        .route(
            "/api/entities/{entityId}",
            get(api_entities::get_entity_handler),
        )
        .route(
            "/api/entities/{entityId}/sessions/start",
            post(api_sessions::start_session_handler),
        )
        .route(
            "/api/sessions/{sessionId}",
            get(api_sessions::get_session_handler),
        )
        .route(
            "/api/sessions/{sessionId}/end",
            post(api_sessions::end_session_handler),
        )
        .route(
            "/api/sessions/{sessionId}/review",
            get(api_review::get_review_handler),
        )
        .route(
            "/api/sessions/{sessionId}/events",
            get(api_events::get_session_events_handler),
        )
        .layer(axum::middleware::from_fn(
            middleware::optional_auth_middleware,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(org_routes)
        .merge(session_routes)
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
