//! Entity and invite handlers — the thin CRUD the lifecycle needs.

use crate::api::{resolve_entity_access, with_conn, ApiError};
use crate::middleware::CallerContext;
use crate::AppState;
use axum::{
    extract::{Extension, Path, Query},
    Json,
};
use rehearse_store::{entities, invites, NewEntity, NewInvite};
use rehearse_types::{AgentConfig, EntityKind, EntityStatus, Visibility};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Request body for entity creation.
#[derive(Debug, Deserialize)]
pub struct CreateEntityRequest {
    pub kind: EntityKind,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_visibility")]
    pub visibility: Visibility,
    #[serde(default = "default_status")]
    pub status: EntityStatus,
    #[serde(default)]
    pub agent: Option<AgentConfig>,
}

fn default_visibility() -> Visibility {
    Visibility::Private
}

fn default_status() -> EntityStatus {
    EntityStatus::Draft
}

/// Handler for `POST /api/entities`.
pub async fn create_entity_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(caller): Extension<CallerContext>,
    Json(payload): Json<CreateEntityRequest>,
) -> Result<Json<Value>, ApiError> {
    if payload.title.trim().is_empty() {
        return Err(ApiError::BadRequest("title must not be empty".to_string()));
    }

    let org_id = caller.0.org_id;
    let entity = with_conn(&state, move |conn| {
        entities::create_entity(
            conn,
            &NewEntity {
                org_id,
                kind: payload.kind,
                title: payload.title,
                description: payload.description,
                status: payload.status,
                visibility: payload.visibility,
                agent: payload.agent,
            },
        )
        .map_err(ApiError::from)
    })
    .await?;

    Ok(Json(json!({ "success": true, "entity": entity })))
}

/// Query parameters carrying the optional invite token.
#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

/// Handler for `GET /api/entities/{entityId}`.
///
/// Authorizer-gated: org members see their own entities, everyone else
/// needs the entity to be non-private or a matching invite token.
pub async fn get_entity_handler(
    Extension(state): Extension<Arc<AppState>>,
    caller: Option<Extension<CallerContext>>,
    Path(entity_id): Path<i64>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<Value>, ApiError> {
    let identity = caller.map(|Extension(ctx)| ctx.0);
    let entity = with_conn(&state, move |conn| {
        resolve_entity_access(conn, identity.as_ref(), entity_id, query.token.as_deref())
    })
    .await?;

    // The credential never leaves the server.
    let mut value = serde_json::to_value(&entity)
        .map_err(|e| ApiError::InternalServerError(e.to_string()))?;
    if let Some(agent) = value.get_mut("agent").and_then(|a| a.as_object_mut()) {
        agent.remove("credential");
    }

    Ok(Json(json!({ "success": true, "entity": value })))
}

/// Request body for invite creation.
#[derive(Debug, Default, Deserialize)]
pub struct CreateInviteRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

/// Handler for `POST /api/entities/{entityId}/invites`.
///
/// Scoped to the caller's organization: inviting to another org's entity
/// reads as absence.
pub async fn create_invite_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(caller): Extension<CallerContext>,
    Path(entity_id): Path<i64>,
    Json(payload): Json<CreateInviteRequest>,
) -> Result<Json<Value>, ApiError> {
    let org_id = caller.0.org_id;
    // Opaque and unguessable; uniqueness enforced by the store.
    let code = Uuid::new_v4().simple().to_string();

    let invite = with_conn(&state, move |conn| {
        let entity = entities::get_entity(conn, org_id, entity_id).map_err(ApiError::from)?;
        invites::create_invite(
            conn,
            &code,
            &NewInvite {
                entity_id: entity.id,
                org_id,
                name: payload.name,
                email: payload.email,
                phone: payload.phone,
            },
        )
        .map_err(ApiError::from)
    })
    .await?;

    Ok(Json(json!({ "success": true, "invite": invite })))
}
