//! Authorization middleware (spec §4.C4), grounded on
//! `moltis-gateway::auth_middleware::AuthSession`'s extractor pattern,
//! adapted from a session cookie to an `Authorization: Bearer <jwt>` header.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};

use crate::{jwt::TokenService, role::Role};

/// The principal attached to the request context after a successful bearer
/// token check (spec: `{user_id, username, role, raw_token}`).
#[derive(Debug, Clone)]
pub struct AuthenticatedPrincipal {
    pub user_id: String,
    pub username: String,
    pub role: Role,
    pub raw_token: String,
}

impl<S> FromRequestParts<S> for AuthenticatedPrincipal
where
    S: Send + Sync,
    Arc<TokenService>: FromRef<S>,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let tokens = Arc::<TokenService>::from_ref(state);

        let raw_token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or((StatusCode::UNAUTHORIZED, "missing bearer token"))?
            .to_string();

        let claims = tokens
            .verify_access_token(&raw_token)
            .map_err(|_| (StatusCode::UNAUTHORIZED, "invalid or expired token"))?;

        Ok(AuthenticatedPrincipal {
            user_id: claims.user_id,
            username: claims.username,
            role: claims.role,
            raw_token,
        })
    }
}

/// Route-layer middleware gating admin-only endpoints (spec §6 "Admin
/// endpoints require Admin role"). Returns 403 on mismatch rather than the
/// 401 an auth failure would produce — the caller is authenticated, just
/// not authorized.
pub async fn require_admin(
    principal: AuthenticatedPrincipal,
    request: Request<Body>,
    next: Next,
) -> Response {
    if principal.role != Role::Admin {
        return (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({ "error": "admin role required" })),
        )
            .into_response();
    }
    next.run(request).await
}
