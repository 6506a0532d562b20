//! Session & Message Store (spec §4.C8). Grounded on the shape of a
//! document-index-over-SQL table the teacher's sessions crate uses for its
//! own (unrelated) session metadata (`crates/sessions/src/metadata.rs`'s
//! `SessionEntry`/`upsert` idiom) — the deterministic `uuid5` derivation
//! itself has no corpus analogue and is taken directly from spec §4.C8.

use chrono::{DateTime, Utc};
use flowise_proxy_store::DocumentStore;
use flowise_proxy_uploads::UploadStore;

use crate::{
    error::SessionError,
    model::{ChatMessage, ChatSession, HydratedUpload, Role},
};

/// Fixed namespace UUID for session-id derivation. Any stable UUID works —
/// what matters is that it never changes across deployments, since two
/// proxies deriving against different namespaces would split history for
/// the same user.
const SESSION_NAMESPACE: uuid::Uuid = uuid::Uuid::from_bytes([
    0x6f, 0x6c, 0x77, 0x69, 0x73, 0x65, 0x2d, 0x70, 0x72, 0x6f, 0x78, 0x79, 0x2d, 0x73, 0x76, 0x63,
]);

const TOPIC_MAX_CHARS: usize = 80;

fn normalize_question(question: &str) -> String {
    question.trim().to_lowercase()
}

/// `session_id = uuid5(NAMESPACE, "{user_id}|{chatflow_id}|{first_question_normalized}")`
/// (spec §4.C8). Stable across runs for identical inputs (testable
/// property #3).
pub fn derive_session_id(user_id: &str, chatflow_id: &str, first_question: &str) -> String {
    let name = format!("{user_id}|{chatflow_id}|{}", normalize_question(first_question));
    uuid::Uuid::new_v5(&SESSION_NAMESPACE, name.as_bytes()).to_string()
}

fn truncate_topic(question: &str) -> String {
    if question.chars().count() <= TOPIC_MAX_CHARS {
        question.to_string()
    } else {
        question.chars().take(TOPIC_MAX_CHARS).collect::<String>() + "…"
    }
}

#[derive(Clone)]
pub struct SessionStore {
    store: DocumentStore,
    uploads: UploadStore,
}

impl SessionStore {
    pub fn new(store: DocumentStore, uploads: UploadStore) -> Self {
        Self { store, uploads }
    }

    /// Create the session row if one doesn't already exist for this id
    /// (spec: "Uniqueness invariant: (user_id, chatflow_id,
    /// first-question-hash) ⇒ one session" — idempotent by construction
    /// since `session_id` is itself a deterministic hash of those fields).
    pub async fn ensure_session(
        &self,
        session_id: &str,
        user_id: &str,
        chatflow_id: &str,
        first_question: &str,
    ) -> Result<ChatSession, SessionError> {
        if let Some(existing) = self.find_session(session_id).await? {
            return Ok(existing);
        }

        let created_at = Utc::now();
        let topic = truncate_topic(first_question);
        sqlx::query(
            "INSERT INTO chat_sessions (session_id, user_id, chatflow_id, topic, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(session_id) DO NOTHING",
        )
        .bind(session_id)
        .bind(user_id)
        .bind(chatflow_id)
        .bind(&topic)
        .bind(created_at.to_rfc3339())
        .execute(self.store.pool())
        .await?;

        Ok(ChatSession {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            chatflow_id: chatflow_id.to_string(),
            topic,
            created_at,
        })
    }

    pub async fn find_session(&self, session_id: &str) -> Result<Option<ChatSession>, SessionError> {
        let row: Option<(String, String, String, String, String)> = sqlx::query_as(
            "SELECT session_id, user_id, chatflow_id, topic, created_at FROM chat_sessions WHERE session_id = ?",
        )
        .bind(session_id)
        .fetch_optional(self.store.pool())
        .await?;

        Ok(row.map(|(session_id, user_id, chatflow_id, topic, created_at)| ChatSession {
            session_id,
            user_id,
            chatflow_id,
            topic,
            created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
        }))
    }

    pub async fn list_sessions_for_user(&self, user_id: &str) -> Result<Vec<ChatSession>, SessionError> {
        let rows: Vec<(String, String, String, String, String)> = sqlx::query_as(
            "SELECT session_id, user_id, chatflow_id, topic, created_at FROM chat_sessions
             WHERE user_id = ? ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(self.store.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|(session_id, user_id, chatflow_id, topic, created_at)| ChatSession {
                session_id,
                user_id,
                chatflow_id,
                topic,
                created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
            })
            .collect())
    }

    /// Append one message. Idempotent on `(session_id, role, content)`: a
    /// retried append of byte-identical content is treated as the same
    /// logical write and returns the existing row's timestamp rather than
    /// inserting a duplicate (spec §4.C8 "Append message").
    pub async fn append_message(
        &self,
        session_id: &str,
        user_id: &str,
        chatflow_id: &str,
        role: Role,
        content: &str,
        metadata: Option<&str>,
        file_ids: &[String],
    ) -> Result<DateTime<Utc>, SessionError> {
        let existing: Option<(String,)> = sqlx::query_as(
            "SELECT created_at FROM chat_messages WHERE session_id = ? AND role = ? AND content = ?",
        )
        .bind(session_id)
        .bind(role.as_str())
        .bind(content)
        .fetch_optional(self.store.pool())
        .await?;

        if let Some((created_at,)) = existing {
            return Ok(created_at.parse().unwrap_or_else(|_| Utc::now()));
        }

        let created_at = Utc::now();
        let file_ids_json = serde_json::to_string(file_ids)?;

        sqlx::query(
            "INSERT INTO chat_messages (session_id, user_id, chatflow_id, role, content, metadata, has_files, file_ids, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(user_id)
        .bind(chatflow_id)
        .bind(role.as_str())
        .bind(content)
        .bind(metadata)
        .bind(!file_ids.is_empty() as i64)
        .bind(&file_ids_json)
        .bind(created_at.to_rfc3339())
        .execute(self.store.pool())
        .await?;

        Ok(created_at)
    }

    /// Ordered history for a session (spec §4.C8 "History retrieval" /
    /// §6 `GET /chat/sessions/{id}/history`).
    pub async fn history(&self, session_id: &str) -> Result<Vec<ChatMessage>, SessionError> {
        let rows: Vec<(String, String, String, String, String, Option<String>, i64, String, String)> =
            sqlx::query_as(
                "SELECT session_id, user_id, chatflow_id, role, content, metadata, has_files, file_ids, created_at
                 FROM chat_messages WHERE session_id = ? ORDER BY created_at ASC, rowid ASC",
            )
            .bind(session_id)
            .fetch_all(self.store.pool())
            .await?;

        rows.into_iter()
            .map(
                |(session_id, user_id, chatflow_id, role, content, metadata, has_files, file_ids, created_at)| {
                    Ok(ChatMessage {
                        session_id,
                        user_id,
                        chatflow_id,
                        role: role.parse().unwrap_or(Role::User),
                        content,
                        metadata,
                        has_files: has_files != 0,
                        file_ids: serde_json::from_str(&file_ids)?,
                        created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
                    })
                },
            )
            .collect()
    }

    /// Hydrate a message's `file_ids` into `{file_id, name, mime, url,
    /// thumbnail_url, is_image}` (spec §4.C8).
    pub async fn hydrate_uploads(&self, message: &ChatMessage) -> Result<Vec<HydratedUpload>, SessionError> {
        let mut hydrated = Vec::with_capacity(message.file_ids.len());
        for file_id in &message.file_ids {
            let Some(upload) = self.uploads.find_by_id(file_id).await? else {
                continue;
            };
            let is_image = upload.is_image();
            hydrated.push(HydratedUpload {
                file_id: upload.file_id.clone(),
                name: upload.original_name,
                mime: upload.mime_type,
                url: format!("/api/v1/chat/files/{}", upload.file_id),
                thumbnail_url: is_image.then(|| format!("/api/v1/chat/files/{}/thumbnail", upload.file_id)),
                is_image,
            });
        }
        Ok(hydrated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowise_proxy_store::blob::BlobBucket;
    use sqlx::SqlitePool;

    async fn session_store() -> SessionStore {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let store = DocumentStore::from_pool(pool).await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let uploads = UploadStore::new(store.clone(), BlobBucket::new(dir.path()), 1024 * 1024);
        SessionStore::new(store, uploads)
    }

    #[test]
    fn session_id_derivation_is_stable() {
        let a = derive_session_id("u1", "cf1", "What is a large language model?");
        let b = derive_session_id("u1", "cf1", "What is a large language model?");
        assert_eq!(a, b);
    }

    #[test]
    fn session_id_normalizes_whitespace_and_case() {
        let a = derive_session_id("u1", "cf1", "Hello World");
        let b = derive_session_id("u1", "cf1", "  hello world  ");
        assert_eq!(a, b);
    }

    #[test]
    fn session_id_differs_across_users() {
        let a = derive_session_id("u1", "cf1", "same question");
        let b = derive_session_id("u2", "cf1", "same question");
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn ensure_session_is_idempotent() {
        let store = session_store().await;
        let id = derive_session_id("u1", "cf1", "hi");
        let first = store.ensure_session(&id, "u1", "cf1", "hi").await.unwrap();
        let second = store.ensure_session(&id, "u1", "cf1", "hi").await.unwrap();
        assert_eq!(first.created_at, second.created_at);
    }

    #[tokio::test]
    async fn append_message_dedups_identical_content() {
        let store = session_store().await;
        let id = derive_session_id("u1", "cf1", "hi");
        store.ensure_session(&id, "u1", "cf1", "hi").await.unwrap();
        let t1 = store
            .append_message(&id, "u1", "cf1", Role::User, "hi", None, &[])
            .await
            .unwrap();
        let t2 = store
            .append_message(&id, "u1", "cf1", Role::User, "hi", None, &[])
            .await
            .unwrap();
        assert_eq!(t1, t2);
        assert_eq!(store.history(&id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn history_is_ordered_by_arrival() {
        let store = session_store().await;
        let id = derive_session_id("u1", "cf1", "hi");
        store.ensure_session(&id, "u1", "cf1", "hi").await.unwrap();
        store
            .append_message(&id, "u1", "cf1", Role::User, "hi", None, &[])
            .await
            .unwrap();
        store
            .append_message(&id, "u1", "cf1", Role::Assistant, "[]", Some("[]"), &[])
            .await
            .unwrap();
        let history = store.history(&id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].role, Role::Assistant);
    }
}
