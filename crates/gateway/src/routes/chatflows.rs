//! Catalog read endpoints (spec §6: `/chatflows`, `/chatflows/{id}`,
//! `/chatflows/{id}/config`), gated on the caller's own per-chatflow grant.

use axum::extract::{Path, State};
use axum::Json;
use flowise_proxy_auth::AuthenticatedPrincipal;
use flowise_proxy_chatflows::Chatflow;
use serde::Serialize;
use serde_json::Value;

use crate::{error::ApiError, state::AppState};

#[derive(Debug, Serialize)]
pub struct ChatflowSummary {
    pub flowise_id: String,
    pub name: String,
    pub description: Option<String>,
    pub deployed: bool,
    pub is_public: bool,
    pub category: Option<String>,
    pub flow_type: Option<String>,
    pub sync_status: &'static str,
}

impl From<Chatflow> for ChatflowSummary {
    fn from(chatflow: Chatflow) -> Self {
        ChatflowSummary {
            flowise_id: chatflow.flowise_id,
            name: chatflow.name,
            description: chatflow.description,
            deployed: chatflow.deployed,
            is_public: chatflow.is_public,
            category: chatflow.category,
            flow_type: chatflow.flow_type,
            sync_status: chatflow.sync_status.as_str(),
        }
    }
}

pub async fn list_chatflows(
    State(state): State<AppState>,
    principal: AuthenticatedPrincipal,
) -> Result<Json<Vec<ChatflowSummary>>, ApiError> {
    let flows = state.chatflows.list_for_user(&principal.user_id).await?;
    Ok(Json(flows.into_iter().map(Into::into).collect()))
}

async fn accessible_chatflow(
    state: &AppState,
    principal: &AuthenticatedPrincipal,
    flowise_id: &str,
) -> Result<Chatflow, ApiError> {
    if !state.chatflows.has_access(&principal.user_id, flowise_id).await? {
        return Err(ApiError::Forbidden(format!(
            "no access to chatflow {flowise_id:?}"
        )));
    }
    state
        .chatflows
        .find_by_id(flowise_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("chatflow {flowise_id:?} not found")))
}

pub async fn get_chatflow(
    State(state): State<AppState>,
    principal: AuthenticatedPrincipal,
    Path(flowise_id): Path<String>,
) -> Result<Json<ChatflowSummary>, ApiError> {
    let chatflow = accessible_chatflow(&state, &principal, &flowise_id).await?;
    Ok(Json(chatflow.into()))
}

pub async fn get_chatflow_config(
    State(state): State<AppState>,
    principal: AuthenticatedPrincipal,
    Path(flowise_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let chatflow = accessible_chatflow(&state, &principal, &flowise_id).await?;
    let config = chatflow
        .chatbot_config
        .as_deref()
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or(Value::Null);
    Ok(Json(config))
}
