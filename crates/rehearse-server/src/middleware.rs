//! Request authentication middleware.
//!
//! Identity is an explicitly passed dependency: the middleware resolves
//! the bearer credential to a [`CallerIdentity`], inserts it into request
//! extensions, and handlers receive it from there. There is no
//! process-wide auth client.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use rehearse_store::entities;
use rehearse_types::CallerIdentity;
use std::sync::Arc;

use crate::AppState;

/// Wrapper for [`CallerIdentity`] stored in request extensions.
#[derive(Clone, Debug)]
pub struct CallerContext(pub CallerIdentity);

fn bearer_token(req: &Request<Body>) -> Result<Option<String>, StatusCode> {
    let Some(value) = req.headers().get("Authorization") else {
        return Ok(None);
    };
    let value = value.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?;
    match value.strip_prefix("Bearer ") {
        Some(token) => Ok(Some(token.to_string())),
        None => Err(StatusCode::UNAUTHORIZED),
    }
}

async fn resolve_identity(
    state: Arc<AppState>,
    api_key: String,
) -> Result<CallerIdentity, StatusCode> {
    tokio::task::spawn_blocking(move || {
        let conn = state
            .pool
            .get()
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        // Any lookup failure (including "not found") is Unauthorized.
        entities::find_user_by_api_key(&conn, &api_key).map_err(|_| StatusCode::UNAUTHORIZED)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
}

/// Middleware for routes that require an authenticated org member.
pub async fn auth_middleware(mut req: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    let token = bearer_token(&req)?.ok_or(StatusCode::UNAUTHORIZED)?;

    let state = req
        .extensions()
        .get::<Arc<AppState>>()
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?
        .clone();

    let identity = resolve_identity(state, token).await?;
    req.extensions_mut().insert(CallerContext(identity));

    Ok(next.run(req).await)
}

/// Middleware for session routes, which invited guests reach anonymously.
///
/// A missing Authorization header is fine; a presented-but-invalid
/// credential is still rejected rather than downgraded to anonymous.
pub async fn optional_auth_middleware(
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    if let Some(token) = bearer_token(&req)? {
        let state = req
            .extensions()
            .get::<Arc<AppState>>()
            .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?
            .clone();
        let identity = resolve_identity(state, token).await?;
        req.extensions_mut().insert(CallerContext(identity));
    }
    Ok(next.run(req).await)
}
