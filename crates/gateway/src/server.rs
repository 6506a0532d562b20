//! Router assembly and middleware stack (spec §6 prefix `/api/v1`), grounded
//! on the teacher's `apply_middleware_stack`/`build_cors_layer` shape in
//! `crates/gateway/src/server.rs`, trimmed to what this service needs: no
//! compression layer (not a workspace dependency here), no sensitive-header
//! redaction list beyond `Authorization` (this proxy has no cookie auth).

use axum::http::{header, HeaderValue};
use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::trace::TraceLayer;

use crate::routes::{admin, auth, chat, chatflows, health};
use crate::state::AppState;

fn build_cors_layer(cors_origin: &str) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if cors_origin == "*" {
        layer.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = cors_origin
            .split(',')
            .filter_map(|origin| HeaderValue::from_str(origin.trim()).ok())
            .collect();
        layer.allow_origin(AllowOrigin::list(origins))
    }
}

fn unauthenticated_routes() -> Router<AppState> {
    Router::new()
        .route("/chat/authenticate", post(auth::authenticate))
        .route("/chat/refresh", post(auth::refresh))
        .route("/health", get(health::health))
}

fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/chat/revoke", post(auth::revoke))
        .route("/chat/credits", get(chat::credits))
        .route("/chatflows", get(chatflows::list_chatflows))
        .route("/chatflows/{flowise_id}", get(chatflows::get_chatflow))
        .route(
            "/chatflows/{flowise_id}/config",
            get(chatflows::get_chatflow_config),
        )
        .route("/chat/predict", post(chat::predict))
        .route(
            "/chat/predict/stream/store",
            post(chat::predict_stream_store),
        )
        .route("/chat/sessions", get(chat::list_sessions))
        .route(
            "/chat/sessions/{session_id}/history",
            get(chat::session_history),
        )
        .route("/chat/files/{file_id}", get(chat::get_file))
        .route(
            "/chat/files/{file_id}/thumbnail",
            get(chat::get_thumbnail),
        )
        .route(
            "/chat/files/session/{session_id}",
            get(chat::files_for_session),
        )
}

fn admin_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/chatflows/sync", post(admin::sync_chatflows))
        .route("/admin/chatflows", get(admin::list_all_chatflows))
        .route("/admin/chatflows/{flowise_id}/users", post(admin::assign_user))
        .route(
            "/admin/chatflows/{flowise_id}/users/{user_id}",
            delete(admin::revoke_user),
        )
        .route(
            "/admin/chatflows/audit-users",
            get(admin::audit_dangling_users),
        )
        .route(
            "/admin/chatflows/cleanup-users",
            post(admin::cleanup_dangling_users),
        )
        .route("/admin/users/sync", post(admin::sync_users))
        .route("/admin/users/sync-by-email", post(admin::sync_user_by_email))
        .layer(middleware::from_fn_with_state(state, flowise_proxy_auth::require_admin))
}

/// Floor for the request body ceiling on ordinary JSON endpoints (spec §7
/// `PayloadTooLarge`) when no upload is anywhere near the configured max.
const MIN_REQUEST_BODY_LIMIT: usize = 2 * 1024 * 1024;

/// Slack added on top of the base64-inflated upload max to cover the
/// surrounding JSON (`question`, `name`, `mime`, multiple `uploads[]`
/// entries, etc.) — the boundary test requires a size-`= MAX` upload to
/// succeed, so the ceiling must comfortably clear base64's 4/3 inflation
/// plus that envelope, not just the raw byte max.
const REQUEST_BODY_OVERHEAD: usize = 64 * 1024;

/// Request body ceiling, derived from the configured upload max (spec
/// §4.C7: "default 25 MiB", boundary test "= MAX succeeds; MAX+1 returns
/// 413"). A base64-encoded payload is ~4/3 the size of its decoded bytes,
/// and it travels inside a JSON envelope — uploads share this one limit
/// with ordinary JSON endpoints since this proxy accepts uploads as base64
/// in the same request body rather than multipart.
fn request_body_limit(max_upload_bytes: u64) -> usize {
    let inflated = (max_upload_bytes as usize)
        .saturating_mul(4)
        .saturating_add(2)
        / 3;
    inflated
        .saturating_add(REQUEST_BODY_OVERHEAD)
        .max(MIN_REQUEST_BODY_LIMIT)
}

/// Build the fully layered router (spec §6 prefix `/api/v1`). Layer order,
/// outermost to innermost for an inbound request:
/// 1. `CatchPanicLayer` — converts handler panics to 500s
/// 2. `SetSensitiveHeadersLayer` — redacts `Authorization` from trace logs
/// 3. `SetRequestIdLayer` — generates `x-request-id` before tracing
/// 4. `TraceLayer` — structured request/response logging
/// 5. `CorsLayer`
/// 6. `PropagateRequestIdLayer` — copies `x-request-id` to the response
/// 7. `RequestBodyLimitLayer`
pub fn build_router(state: AppState, cors_origin: &str) -> Router {
    let body_limit = request_body_limit(state.max_upload_bytes);
    let api = unauthenticated_routes()
        .merge(user_routes())
        .merge(admin_routes(state.clone()))
        .with_state(state);

    let cors = build_cors_layer(cors_origin);

    Router::new()
        .nest("/api/v1", api)
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(cors)
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-")
                    .to_owned();
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                )
            }),
        )
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(SetSensitiveHeadersLayer::new([
            header::AUTHORIZATION,
            header::SET_COOKIE,
        ]))
        .layer(CatchPanicLayer::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_limit_clears_base64_inflation_of_the_configured_max() {
        let max_upload_bytes = 25 * 1024 * 1024;
        let limit = request_body_limit(max_upload_bytes);
        let base64_size = (max_upload_bytes * 4).div_ceil(3);
        assert!(limit as u64 > base64_size, "limit must clear base64 inflation");
    }

    #[test]
    fn body_limit_never_drops_below_the_floor_for_a_small_upload_max() {
        assert_eq!(request_body_limit(0), MIN_REQUEST_BODY_LIMIT);
        assert_eq!(request_body_limit(1024), MIN_REQUEST_BODY_LIMIT);
    }
}
