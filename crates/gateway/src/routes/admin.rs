//! Admin-only endpoints (spec §6, gated by `require_admin` middleware in
//! `server.rs` rather than per-handler, same split as the teacher's
//! `auth_middleware::require_admin` layer).

use axum::extract::{Path, State};
use axum::Json;
use flowise_proxy_auth::UserSyncReport;
use flowise_proxy_chatflows::{Chatflow, CleanupAction, SyncReport};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{error::ApiError, state::AppState};

pub async fn sync_chatflows(State(state): State<AppState>) -> Result<Json<SyncReport>, ApiError> {
    Ok(Json(state.chatflows.sync().await?))
}

pub async fn list_all_chatflows(State(state): State<AppState>) -> Result<Json<Vec<Chatflow>>, ApiError> {
    Ok(Json(state.chatflows.list_active().await?))
}

#[derive(Debug, Deserialize)]
pub struct AssignUserRequest {
    pub email: String,
}

pub async fn assign_user(
    State(state): State<AppState>,
    Path(flowise_id): Path<String>,
    Json(body): Json<AssignUserRequest>,
) -> Result<Json<Value>, ApiError> {
    let user = state
        .auth
        .principals()
        .find_by_email(&body.email)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("user {:?} not found", body.email)))?;
    state.chatflows.assign(&user.user_id, &flowise_id).await?;
    Ok(Json(json!({ "assigned": true, "user_id": user.user_id, "flowise_id": flowise_id })))
}

pub async fn revoke_user(
    State(state): State<AppState>,
    Path((flowise_id, user_id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    state.chatflows.revoke(&user_id, &flowise_id).await?;
    Ok(Json(json!({ "revoked": true, "user_id": user_id, "flowise_id": flowise_id })))
}

pub async fn audit_dangling_users(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let dangling = state.chatflows.audit_dangling_assignments().await?;
    let entries: Vec<Value> = dangling
        .iter()
        .map(|(user_id, flowise_id)| json!({ "user_id": user_id, "flowise_id": flowise_id }))
        .collect();
    Ok(Json(json!({ "count": entries.len(), "dangling": entries })))
}

#[derive(Debug, Deserialize)]
pub struct CleanupUsersRequest {
    #[serde(default)]
    pub action: CleanupAction,
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,
    #[serde(default)]
    pub force: bool,
}

fn default_dry_run() -> bool {
    true
}

pub async fn cleanup_dangling_users(
    State(state): State<AppState>,
    Json(body): Json<CleanupUsersRequest>,
) -> Result<Json<Value>, ApiError> {
    let affected = state
        .chatflows
        .cleanup_dangling_assignments(body.action, body.dry_run, body.force)
        .await?;
    Ok(Json(json!({
        "affected": affected,
        "action": body.action,
        "dry_run": body.dry_run,
        "force": body.force,
    })))
}

pub async fn sync_users(State(state): State<AppState>) -> Result<Json<UserSyncReport>, ApiError> {
    Ok(Json(state.auth.sync_all_users().await?))
}

#[derive(Debug, Deserialize)]
pub struct SyncByEmailRequest {
    pub email: String,
}

pub async fn sync_user_by_email(
    State(state): State<AppState>,
    Json(body): Json<SyncByEmailRequest>,
) -> Result<Json<UserSyncReport>, ApiError> {
    Ok(Json(state.auth.sync_user_by_email(&body.email).await?))
}
