//! The relay's slice of the spec's error taxonomy (§7). Kinds that only
//! ever arise before a precondition check (NotFound, Unauthorized,
//! PayloadTooLarge, UnsupportedMediaType) belong to their owning crates;
//! this enum covers only what `predict_stream_store` itself can fail with.

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("user does not have access to this chatflow")]
    Forbidden,
    #[error("insufficient credits")]
    PaymentRequired,
    #[error("a stream is already in flight for this session")]
    Conflict,
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("chatflow error: {0}")]
    Chatflow(#[from] flowise_proxy_chatflows::ChatflowError),
    #[error("accounting error: {0}")]
    Accounting(#[from] flowise_proxy_accounting::AccountingError),
    #[error("upload error: {0}")]
    Upload(#[from] flowise_proxy_uploads::UploadError),
    #[error("session error: {0}")]
    Session(#[from] flowise_proxy_sessions::SessionError),
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
