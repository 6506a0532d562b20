//! The HTTP-edge error taxonomy (spec §7). Every crate below the gateway
//! returns its own `thiserror` enum; this type is where those all collapse
//! into the handful of status codes the spec's error table names, via
//! `From` impls rather than per-handler matching.
//!
//! `BadRequest` is an ambient addition (§1 "Error handling" of SPEC_FULL.md)
//! for malformed client input that the spec's table doesn't name explicitly
//! (e.g. non-base64 upload payloads) — every production HTTP surface needs
//! a 400 bucket even when the spec's own taxonomy only enumerates the
//! domain-specific kinds.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use flowise_proxy_accounting::AccountingError;
use flowise_proxy_auth::AuthError;
use flowise_proxy_chatflows::ChatflowError;
use flowise_proxy_relay::RelayError;
use flowise_proxy_sessions::SessionError;
use flowise_proxy_uploads::UploadError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    PaymentRequired(String),
    #[error("{0}")]
    PayloadTooLarge(String),
    #[error("{0}")]
    UnsupportedMediaType(String),
    #[error("{0}")]
    UpstreamUnavailable(String),
    #[error("{0}")]
    UpstreamTimeout(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::PaymentRequired(_) => StatusCode::PAYMENT_REQUIRED,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if matches!(self, ApiError::Internal(_)) {
            tracing::error!(error = %self, "internal error");
        }
        (self.status(), Json(serde_json::json!({ "detail": self.to_string() }))).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials
            | AuthError::PrincipalInactive
            | AuthError::TokenExpired
            | AuthError::TokenInvalid
            | AuthError::TokenRevoked
            | AuthError::TokenTheftDetected
            | AuthError::AccessTokenInvalid => ApiError::Unauthorized(err.to_string()),
            AuthError::TokenNotOwned => ApiError::Forbidden(err.to_string()),
            AuthError::ExternalProviderUnavailable | AuthError::Http(_) => {
                ApiError::UpstreamUnavailable(err.to_string())
            }
            AuthError::UnknownRole(_) | AuthError::Hash(_) | AuthError::Jwt(_) | AuthError::Store(_) => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl From<ChatflowError> for ApiError {
    fn from(err: ChatflowError) -> Self {
        match err {
            ChatflowError::NotFound(_) => ApiError::NotFound(err.to_string()),
            ChatflowError::Upstream(_) => ApiError::UpstreamUnavailable(err.to_string()),
            ChatflowError::Store(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<AccountingError> for ApiError {
    fn from(err: AccountingError) -> Self {
        match err {
            AccountingError::InsufficientCredits => ApiError::PaymentRequired(err.to_string()),
            AccountingError::UnknownUser(_) => ApiError::NotFound(err.to_string()),
            AccountingError::Remote(_) => ApiError::UpstreamUnavailable(err.to_string()),
            AccountingError::Store(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::InvalidBase64 => ApiError::BadRequest(err.to_string()),
            UploadError::TooLarge => ApiError::PayloadTooLarge(err.to_string()),
            UploadError::NotFound(_) => ApiError::NotFound(err.to_string()),
            UploadError::Forbidden => ApiError::Forbidden(err.to_string()),
            UploadError::UnsupportedMediaType => ApiError::UnsupportedMediaType(err.to_string()),
            UploadError::Image(_) | UploadError::Store(_) | UploadError::Blob(_) => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound(_) => ApiError::NotFound(err.to_string()),
            SessionError::Upload(upload_err) => upload_err.into(),
            SessionError::Store(_) | SessionError::Json(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::Forbidden => ApiError::Forbidden(err.to_string()),
            RelayError::PaymentRequired => ApiError::PaymentRequired(err.to_string()),
            RelayError::Conflict => ApiError::Conflict(err.to_string()),
            RelayError::UpstreamUnavailable(_) => ApiError::UpstreamUnavailable(err.to_string()),
            RelayError::Chatflow(chatflow_err) => chatflow_err.into(),
            RelayError::Accounting(accounting_err) => accounting_err.into(),
            RelayError::Upload(upload_err) => upload_err.into(),
            RelayError::Session(session_err) => session_err.into(),
            RelayError::Internal(_) => ApiError::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_the_spec_table() {
        assert_eq!(ApiError::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::Unauthorized("x".into()).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::Forbidden("x".into()).status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::Conflict("x".into()).status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::PaymentRequired("x".into()).status(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(ApiError::PayloadTooLarge("x".into()).status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(
            ApiError::UnsupportedMediaType("x".into()).status(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(ApiError::UpstreamUnavailable("x".into()).status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(ApiError::UpstreamTimeout("x".into()).status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(ApiError::Internal("x".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn relay_conflict_maps_to_409() {
        let mapped: ApiError = RelayError::Conflict.into();
        assert_eq!(mapped.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn relay_payment_required_maps_to_402() {
        let mapped: ApiError = RelayError::PaymentRequired.into();
        assert_eq!(mapped.status(), StatusCode::PAYMENT_REQUIRED);
    }

    #[test]
    fn upload_too_large_maps_to_413() {
        let mapped: ApiError = UploadError::TooLarge.into();
        assert_eq!(mapped.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn auth_token_not_owned_maps_to_403_not_401() {
        let mapped: ApiError = AuthError::TokenNotOwned.into();
        assert_eq!(mapped.status(), StatusCode::FORBIDDEN);
    }
}
