#[derive(Debug, thiserror::Error)]
pub enum AccountingError {
    #[error("insufficient credits")]
    InsufficientCredits,
    #[error("unknown user {0:?}")]
    UnknownUser(String),
    #[error("remote accounting service unavailable: {0}")]
    Remote(#[from] reqwest::Error),
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}
