//! Document Store Gateway (spec §4.C2).
//!
//! Wraps a single `sqlx::SqlitePool` connection and owns collection
//! bootstrap / index creation. Higher-level crates (`auth`, `chatflows`,
//! `sessions`, `uploads`, `accounting`) hold their own typed queries against
//! the pool exposed here — this crate only owns schema bootstrap and the
//! content-addressed blob bucket.
//!
//! See SPEC_FULL.md §2 for why this backs the spec's Mongo-shaped document
//! model with SQLite via `sqlx` rather than a MongoDB driver.

pub mod blob;

use sqlx::SqlitePool;

/// A handle to the document store. Cheap to clone (wraps a pooled
/// connection handle internally via `sqlx::SqlitePool`).
#[derive(Clone)]
pub struct DocumentStore {
    pool: SqlitePool,
}

impl DocumentStore {
    /// Connect to the configured store URL and run idempotent bootstrap.
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let dsn = normalize_dsn(url);
        let pool = SqlitePool::connect(&dsn).await?;
        let store = Self { pool };
        store.bootstrap().await?;
        Ok(store)
    }

    /// Build directly from an existing pool (used by tests).
    pub async fn from_pool(pool: SqlitePool) -> anyhow::Result<Self> {
        let store = Self { pool };
        store.bootstrap().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create every collection (table) and index used by the proxy.
    /// Idempotent — safe to call on every startup.
    async fn bootstrap(&self) -> anyhow::Result<()> {
        let pool = &self.pool;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS principals (
                user_id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                credits INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chatflows (
                flowise_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                deployed INTEGER NOT NULL DEFAULT 0,
                is_public INTEGER NOT NULL DEFAULT 0,
                category TEXT,
                flow_type TEXT,
                flow_data TEXT,
                chatbot_config TEXT,
                sync_status TEXT NOT NULL DEFAULT 'active',
                synced_at TEXT NOT NULL
            )",
        )
        .execute(pool)
        .await?;
        sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_chatflows_flowise_id ON chatflows(flowise_id)")
            .execute(pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS user_chatflows (
                user_id TEXT NOT NULL,
                chatflow_id TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                assigned_at TEXT NOT NULL,
                PRIMARY KEY (user_id, chatflow_id)
            )",
        )
        .execute(pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_user_chatflows_pair ON user_chatflows(user_id, chatflow_id)",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS refresh_tokens (
                token_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                token_hash TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                is_revoked INTEGER NOT NULL DEFAULT 0,
                user_agent TEXT,
                ip_address TEXT,
                created_at TEXT NOT NULL
            )",
        )
        .execute(pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_refresh_tokens_expires ON refresh_tokens(expires_at)")
            .execute(pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_refresh_tokens_user ON refresh_tokens(user_id)")
            .execute(pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chat_sessions (
                session_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                chatflow_id TEXT NOT NULL,
                topic TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chat_sessions_user ON chat_sessions(user_id)")
            .execute(pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chat_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                chatflow_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                metadata TEXT,
                has_files INTEGER NOT NULL DEFAULT 0,
                file_ids TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL
            )",
        )
        .execute(pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chat_messages_session_created ON chat_messages(session_id, created_at)",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS file_uploads (
                file_id TEXT PRIMARY KEY,
                original_name TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                file_hash TEXT NOT NULL,
                user_id TEXT NOT NULL,
                session_id TEXT,
                chatflow_id TEXT,
                message_id TEXT,
                uploaded_at TEXT NOT NULL
            )",
        )
        .execute(pool)
        .await?;
        sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_file_uploads_file_id ON file_uploads(file_id)")
            .execute(pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_file_uploads_user_hash ON file_uploads(user_id, file_hash)",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS transactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                chatflow_id TEXT NOT NULL,
                cost INTEGER NOT NULL,
                success INTEGER NOT NULL,
                reason TEXT,
                created_at TEXT NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Delete expired refresh tokens. SQLite has no native TTL index, so
    /// this sweep is the faithful equivalent of the spec's Mongo TTL index
    /// — called opportunistically from the auth crate on refresh/revoke.
    pub async fn sweep_expired_refresh_tokens(&self) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= datetime('now')")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Accept either a raw filesystem path or an explicit `sqlite:` DSN.
fn normalize_dsn(url: &str) -> String {
    if url.starts_with("sqlite:") || url == "sqlite::memory:" {
        url.to_string()
    } else {
        format!("sqlite:{url}?mode=rwc")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bootstrap_is_idempotent() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let store = DocumentStore::from_pool(pool).await.unwrap();
        // Calling bootstrap again must not error.
        store.bootstrap().await.unwrap();
    }

    #[tokio::test]
    async fn sweep_removes_expired_tokens() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let store = DocumentStore::from_pool(pool).await.unwrap();
        sqlx::query(
            "INSERT INTO refresh_tokens (token_id, user_id, token_hash, expires_at, created_at)
             VALUES ('t1', 'u1', 'hash', datetime('now', '-1 day'), datetime('now'))",
        )
        .execute(store.pool())
        .await
        .unwrap();
        let removed = store.sweep_expired_refresh_tokens().await.unwrap();
        assert_eq!(removed, 1);
    }
}
