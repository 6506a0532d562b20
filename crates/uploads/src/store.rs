//! File Upload Store (spec §4.C7). Grounded on the teacher's
//! `SessionStore::save_media`/`read_media` layout (`flowise-proxy-store::blob`),
//! generalized to content-address uploads and dedup by `(user_id, file_hash)`.

use std::io::Cursor;

use base64::Engine as _;
use chrono::Utc;
use flowise_proxy_store::{blob::BlobBucket, DocumentStore};
use image::{imageops::FilterType, ImageFormat, ImageReader};

use crate::{
    error::UploadError,
    model::{FileUpload, UploadRequest},
};

const UPLOADS_SUBDIR: &str = "uploads";
const THUMBNAILS_SUBDIR: &str = "thumbnails";
const THUMBNAIL_MAX_SIDE: u32 = 256;

#[derive(Clone)]
pub struct UploadStore {
    store: DocumentStore,
    bucket: BlobBucket,
    max_bytes: u64,
}

impl UploadStore {
    pub fn new(store: DocumentStore, bucket: BlobBucket, max_bytes: u64) -> Self {
        Self {
            store,
            bucket,
            max_bytes,
        }
    }

    /// Strip an optional `data:<mime>;base64,` prefix (spec §4.C7 input:
    /// "the scheme accepts bare base64; a data: prefix MUST be stripped if
    /// present").
    fn strip_data_url_prefix(data: &str) -> &str {
        match data.find(";base64,") {
            Some(idx) if data.starts_with("data:") => &data[idx + ";base64,".len()..],
            _ => data,
        }
    }

    /// Decode, size-check, dedup and persist one upload (spec §4.C7
    /// procedure). `session_id`/`chatflow_id`/`message_id` are attached for
    /// later retrieval/hydration even though they may not all be known yet
    /// at call time (uploads are stored before the user-turn message, so
    /// `message_id` is typically `None` here and not used for lookups).
    pub async fn store(
        &self,
        user_id: &str,
        session_id: Option<&str>,
        chatflow_id: Option<&str>,
        request: &UploadRequest,
    ) -> Result<FileUpload, UploadError> {
        let raw = Self::strip_data_url_prefix(&request.data);
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(raw)
            .map_err(|_| UploadError::InvalidBase64)?;

        if bytes.len() as u64 > self.max_bytes {
            return Err(UploadError::TooLarge);
        }

        let file_hash = BlobBucket::hash_of(&bytes);

        if let Some(existing) = self.find_by_user_and_hash(user_id, &file_hash).await? {
            return Ok(existing);
        }

        self.bucket.put(UPLOADS_SUBDIR, bytes.clone()).await?;

        let file_id = uuid::Uuid::new_v4().to_string();
        let uploaded_at = Utc::now();

        sqlx::query(
            "INSERT INTO file_uploads (file_id, original_name, mime_type, file_size, file_hash, user_id, session_id, chatflow_id, message_id, uploaded_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL, ?)",
        )
        .bind(&file_id)
        .bind(&request.name)
        .bind(&request.mime)
        .bind(bytes.len() as i64)
        .bind(&file_hash)
        .bind(user_id)
        .bind(session_id)
        .bind(chatflow_id)
        .bind(uploaded_at.to_rfc3339())
        .execute(self.store.pool())
        .await?;

        Ok(FileUpload {
            file_id,
            original_name: request.name.clone(),
            mime_type: request.mime.clone(),
            file_size: bytes.len() as i64,
            file_hash,
            user_id: user_id.to_string(),
            session_id: session_id.map(str::to_string),
            chatflow_id: chatflow_id.map(str::to_string),
            message_id: None,
            uploaded_at,
        })
    }

    async fn find_by_user_and_hash(
        &self,
        user_id: &str,
        file_hash: &str,
    ) -> Result<Option<FileUpload>, UploadError> {
        let row = sqlx::query_as::<_, FileUploadRow>(
            "SELECT file_id, original_name, mime_type, file_size, file_hash, user_id, session_id, chatflow_id, message_id, uploaded_at
             FROM file_uploads WHERE user_id = ? AND file_hash = ?",
        )
        .bind(user_id)
        .bind(file_hash)
        .fetch_optional(self.store.pool())
        .await?;
        Ok(row.map(Into::into))
    }

    pub async fn find_by_id(&self, file_id: &str) -> Result<Option<FileUpload>, UploadError> {
        let row = sqlx::query_as::<_, FileUploadRow>(
            "SELECT file_id, original_name, mime_type, file_size, file_hash, user_id, session_id, chatflow_id, message_id, uploaded_at
             FROM file_uploads WHERE file_id = ?",
        )
        .bind(file_id)
        .fetch_optional(self.store.pool())
        .await?;
        Ok(row.map(Into::into))
    }

    pub async fn list_for_session(&self, session_id: &str) -> Result<Vec<FileUpload>, UploadError> {
        let rows = sqlx::query_as::<_, FileUploadRow>(
            "SELECT file_id, original_name, mime_type, file_size, file_hash, user_id, session_id, chatflow_id, message_id, uploaded_at
             FROM file_uploads WHERE session_id = ? ORDER BY uploaded_at",
        )
        .bind(session_id)
        .fetch_all(self.store.pool())
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Authorization gate for retrieval (spec §4.C7 "Retrieval"): the
    /// requester must own the upload or hold a privileged role.
    pub async fn get_bytes(&self, upload: &FileUpload) -> Result<Vec<u8>, UploadError> {
        self.bucket
            .get(UPLOADS_SUBDIR, &upload.file_hash)
            .await
            .map_err(UploadError::from)
    }

    /// Bounded thumbnail, cached by `file_id` after first derivation (spec
    /// §4.C7 "Thumbnails"). Returns the encoded bytes alongside the MIME
    /// type they were actually encoded as, so callers don't have to
    /// re-derive (or guess) the content type of a cached thumbnail.
    pub async fn get_thumbnail(&self, upload: &FileUpload) -> Result<(Vec<u8>, &'static str), UploadError> {
        if !upload.is_image() {
            return Err(UploadError::UnsupportedMediaType);
        }

        let content_type = thumbnail_content_type(&upload.mime_type);

        if let Some(cached) = self.bucket.get_at(THUMBNAILS_SUBDIR, &upload.file_id).await? {
            return Ok((cached, content_type));
        }

        let original = self.get_bytes(upload).await?;
        let format = thumbnail_format(&upload.mime_type);

        let image = ImageReader::new(Cursor::new(&original))
            .with_guessed_format()
            .map_err(image::ImageError::IoError)?
            .decode()?;
        let thumbnail = image.resize(THUMBNAIL_MAX_SIDE, THUMBNAIL_MAX_SIDE, FilterType::Lanczos3);

        let mut out = Vec::new();
        thumbnail.write_to(&mut Cursor::new(&mut out), format)?;

        self.bucket
            .put_at(THUMBNAILS_SUBDIR, &upload.file_id, out.clone())
            .await?;

        Ok((out, content_type))
    }
}

/// PNG sources get a PNG thumbnail; every other image mime (jpeg, gif,
/// webp, ...) is normalized to JPEG. Shared by encoding and by the HTTP
/// layer so the `Content-Type` it serves always matches what was encoded,
/// including for a thumbnail served from cache.
fn thumbnail_format(source_mime_type: &str) -> ImageFormat {
    if source_mime_type == "image/png" {
        ImageFormat::Png
    } else {
        ImageFormat::Jpeg
    }
}

pub fn thumbnail_content_type(source_mime_type: &str) -> &'static str {
    match thumbnail_format(source_mime_type) {
        ImageFormat::Png => "image/png",
        _ => "image/jpeg",
    }
}

#[derive(sqlx::FromRow)]
struct FileUploadRow {
    file_id: String,
    original_name: String,
    mime_type: String,
    file_size: i64,
    file_hash: String,
    user_id: String,
    session_id: Option<String>,
    chatflow_id: Option<String>,
    message_id: Option<String>,
    uploaded_at: String,
}

impl From<FileUploadRow> for FileUpload {
    fn from(row: FileUploadRow) -> Self {
        FileUpload {
            file_id: row.file_id,
            original_name: row.original_name,
            mime_type: row.mime_type,
            file_size: row.file_size,
            file_hash: row.file_hash,
            user_id: row.user_id,
            session_id: row.session_id,
            chatflow_id: row.chatflow_id,
            message_id: row.message_id,
            uploaded_at: row
                .uploaded_at
                .parse()
                .unwrap_or_else(|_| Utc::now()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::SqlitePool;

    async fn upload_store() -> (UploadStore, tempfile::TempDir) {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let store = DocumentStore::from_pool(pool).await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let bucket = BlobBucket::new(dir.path());
        (UploadStore::new(store, bucket, 25 * 1024 * 1024), dir)
    }

    fn png_base64() -> String {
        // 1x1 transparent PNG.
        base64::engine::general_purpose::STANDARD.encode(
            [
                0x89u8, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49,
                0x48, 0x44, 0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06,
                0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0A, 0x49, 0x44,
                0x41, 0x54, 0x78, 0x9C, 0x63, 0x00, 0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D,
                0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE, 0x42,
                0x60, 0x82,
            ]
            .as_slice(),
        )
    }

    #[tokio::test]
    async fn store_then_fetch_roundtrips_bytes() {
        let (store, _dir) = upload_store().await;
        let request = UploadRequest {
            data: png_base64(),
            name: "test.png".to_string(),
            mime: "image/png".to_string(),
        };
        let upload = store.store("u1", None, None, &request).await.unwrap();
        let bytes = store.get_bytes(&upload).await.unwrap();
        assert_eq!(BlobBucket::hash_of(&bytes), upload.file_hash);
    }

    #[tokio::test]
    async fn strips_data_url_prefix() {
        let (store, _dir) = upload_store().await;
        let request = UploadRequest {
            data: format!("data:image/png;base64,{}", png_base64()),
            name: "test.png".to_string(),
            mime: "image/png".to_string(),
        };
        let upload = store.store("u1", None, None, &request).await.unwrap();
        assert_eq!(upload.file_size, 67);
    }

    #[tokio::test]
    async fn same_bytes_same_user_dedups_to_one_file_id() {
        let (store, _dir) = upload_store().await;
        let request = UploadRequest {
            data: png_base64(),
            name: "a.png".to_string(),
            mime: "image/png".to_string(),
        };
        let first = store.store("u1", None, None, &request).await.unwrap();
        let second = store.store("u1", None, None, &request).await.unwrap();
        assert_eq!(first.file_id, second.file_id);
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let store = DocumentStore::from_pool(pool).await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let bucket = BlobBucket::new(dir.path());
        let tiny_limit_store = UploadStore::new(store, bucket, 4);

        let request = UploadRequest {
            data: png_base64(),
            name: "too-big.png".to_string(),
            mime: "image/png".to_string(),
        };
        let result = tiny_limit_store.store("u1", None, None, &request).await;
        assert!(matches!(result, Err(UploadError::TooLarge)));
    }

    #[tokio::test]
    async fn thumbnail_of_non_image_is_rejected() {
        let (store, _dir) = upload_store().await;
        let request = UploadRequest {
            data: base64::engine::general_purpose::STANDARD.encode(b"not an image"),
            name: "doc.pdf".to_string(),
            mime: "application/pdf".to_string(),
        };
        let upload = store.store("u1", None, None, &request).await.unwrap();
        assert!(matches!(
            store.get_thumbnail(&upload).await,
            Err(UploadError::UnsupportedMediaType)
        ));
    }

    #[tokio::test]
    async fn thumbnail_is_bounded_and_cached() {
        let (store, _dir) = upload_store().await;
        let request = UploadRequest {
            data: png_base64(),
            name: "test.png".to_string(),
            mime: "image/png".to_string(),
        };
        let upload = store.store("u1", None, None, &request).await.unwrap();
        let (thumb, content_type) = store.get_thumbnail(&upload).await.unwrap();
        assert_eq!(content_type, "image/png");
        let decoded = image::load_from_memory(&thumb).unwrap();
        assert!(decoded.width() <= 256 && decoded.height() <= 256);

        // second call hits the cache path, not re-derivation
        let (thumb_again, content_type_again) = store.get_thumbnail(&upload).await.unwrap();
        assert_eq!(thumb, thumb_again);
        assert_eq!(content_type_again, "image/png");
    }

    #[tokio::test]
    async fn non_png_source_thumbnail_is_content_typed_as_jpeg() {
        let (store, _dir) = upload_store().await;
        let request = UploadRequest {
            data: png_base64(),
            name: "test.gif".to_string(),
            mime: "image/gif".to_string(),
        };
        let upload = store.store("u1", None, None, &request).await.unwrap();
        let (_thumb, content_type) = store.get_thumbnail(&upload).await.unwrap();
        assert_eq!(content_type, "image/jpeg");
    }
}
