#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("upload payload is not valid base64")]
    InvalidBase64,
    #[error("upload exceeds the configured maximum size")]
    TooLarge,
    #[error("file {0:?} not found")]
    NotFound(String),
    #[error("caller is not permitted to access this file")]
    Forbidden,
    #[error("thumbnails are only supported for image uploads")]
    UnsupportedMediaType,
    #[error("thumbnail derivation failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
    #[error("blob error: {0}")]
    Blob(#[from] anyhow::Error),
}
