//! Unauthenticated + bearer-gated identity endpoints (spec §6: `/chat/authenticate`,
//! `/chat/refresh`, `/chat/revoke`).

use axum::{
    extract::{ConnectInfo, State},
    http::HeaderMap,
    Json,
};
use flowise_proxy_auth::AuthenticatedPrincipal;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::{error::ApiError, state::AppState};

#[derive(Debug, Deserialize)]
pub struct AuthenticateRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct UserSummary {
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub role: String,
    pub credits: i64,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub user: UserSummary,
}

pub async fn authenticate(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<AuthenticateRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok());
    let ip_address = addr.ip().to_string();

    let (principal, pair) = state
        .auth
        .authenticate(&body.username, &body.password, user_agent, Some(&ip_address))
        .await?;

    Ok(Json(TokenResponse {
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
        token_type: "bearer",
        user: UserSummary {
            user_id: principal.user_id,
            username: principal.username,
            email: principal.email,
            role: principal.role.to_string(),
            credits: principal.credits,
        },
    }))
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
}

pub async fn refresh(
    State(state): State<AppState>,
    Json(body): Json<RefreshRequest>,
) -> Result<Json<RefreshResponse>, ApiError> {
    let (_principal, pair) = state.auth.refresh(&body.refresh_token).await?;
    Ok(Json(RefreshResponse {
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
        token_type: "bearer",
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct RevokeRequest {
    #[serde(default)]
    pub token_id: Option<String>,
    #[serde(default)]
    pub all_tokens: bool,
}

pub async fn revoke(
    State(state): State<AppState>,
    principal: AuthenticatedPrincipal,
    Json(body): Json<RevokeRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if body.all_tokens {
        state.auth.revoke_all(&principal.user_id).await?;
    } else if let Some(token_id) = body.token_id.as_deref() {
        state.auth.revoke_token_id(&principal.user_id, token_id).await?;
    } else {
        return Err(ApiError::BadRequest(
            "request body must set either token_id or all_tokens".to_string(),
        ));
    }
    Ok(Json(serde_json::json!({ "revoked": true })))
}
