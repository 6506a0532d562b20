#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("principal is not active")]
    PrincipalInactive,
    #[error("refresh token expired")]
    TokenExpired,
    #[error("refresh token is invalid")]
    TokenInvalid,
    #[error("refresh token has been revoked")]
    TokenRevoked,
    #[error("refresh token reuse detected, all sessions revoked")]
    TokenTheftDetected,
    #[error("access token is invalid or expired")]
    AccessTokenInvalid,
    #[error("unknown role {0:?}")]
    UnknownRole(String),
    #[error("external identity provider unavailable")]
    ExternalProviderUnavailable,
    #[error("refresh token does not belong to this user")]
    TokenNotOwned,
    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),
    #[error("token error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}
