#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session {0:?} not found")]
    NotFound(String),
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("upload store error: {0}")]
    Upload(#[from] flowise_proxy_uploads::UploadError),
}
