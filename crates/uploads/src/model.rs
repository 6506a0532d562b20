use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct FileUpload {
    pub file_id: String,
    pub original_name: String,
    pub mime_type: String,
    pub file_size: i64,
    pub file_hash: String,
    pub user_id: String,
    pub session_id: Option<String>,
    pub chatflow_id: Option<String>,
    pub message_id: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

impl FileUpload {
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

/// One upload as submitted by the caller (spec §4.C7 input + §6
/// `predict/stream/store` body `uploads[]`).
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub data: String,
    pub name: String,
    pub mime: String,
}
