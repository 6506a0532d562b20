#[derive(Debug, thiserror::Error)]
pub enum ChatflowError {
    #[error("chatflow {0:?} not found")]
    NotFound(String),
    #[error("upstream chatflow catalog fetch failed: {0}")]
    Upstream(#[from] reqwest::Error),
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}
