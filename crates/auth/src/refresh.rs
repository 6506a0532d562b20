//! Refresh-token rotation and theft detection (spec §4.C3).
//!
//! No file in the corpus implements this protocol; it's grounded directly
//! in the spec's description and the `RefreshToken` schema referenced by
//! the original's `app/api/chat.py` import of `app.models.refresh_token`.
//!
//! A presented refresh token has the shape `"{token_id}.{secret}"`. Every
//! successful rotation inserts a brand new row (fresh `token_id`) and marks
//! the presented row's `token_id` revoked (spec testable property #5).
//! Presenting a row that is already revoked, or whose hash doesn't match
//! what's stored for its `token_id`, is the theft signal the spec
//! describes — either means the credential being presented is no longer
//! the live one for that family — and revokes every token for the user.

use std::time::Duration;

use chrono::{DateTime, Utc};
use flowise_proxy_store::DocumentStore;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::AuthError;

#[derive(Clone)]
pub struct RefreshConfig {
    pub ttl: Duration,
}

pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

fn hash_token(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hasher.finalize().iter().fold(String::new(), |mut s, b| {
        use std::fmt::Write;
        let _ = write!(s, "{b:02x}");
        s
    })
}

fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes.iter().fold(String::new(), |mut s, b| {
        use std::fmt::Write;
        let _ = write!(s, "{b:02x}");
        s
    })
}

struct RefreshTokenRow {
    user_id: String,
    token_hash: String,
    expires_at: DateTime<Utc>,
    is_revoked: bool,
    user_agent: Option<String>,
    ip_address: Option<String>,
}

pub struct RefreshTokenRepo {
    store: DocumentStore,
    config: RefreshConfig,
}

impl RefreshTokenRepo {
    pub fn new(store: DocumentStore, config: RefreshConfig) -> Self {
        Self { store, config }
    }

    /// Issue a brand new refresh-token row for `user_id`.
    pub async fn issue(
        &self,
        user_id: &str,
        user_agent: Option<&str>,
        ip_address: Option<&str>,
    ) -> Result<String, AuthError> {
        let token_id = uuid::Uuid::new_v4().to_string();
        let secret = generate_secret();
        let raw = format!("{token_id}.{secret}");
        let hash = hash_token(&raw);
        let expires_at = Utc::now() + chrono::Duration::from_std(self.config.ttl).unwrap_or_default();

        sqlx::query(
            "INSERT INTO refresh_tokens (token_id, user_id, token_hash, expires_at, is_revoked, user_agent, ip_address, created_at)
             VALUES (?, ?, ?, ?, 0, ?, ?, ?)",
        )
        .bind(&token_id)
        .bind(user_id)
        .bind(&hash)
        .bind(expires_at.to_rfc3339())
        .bind(user_agent)
        .bind(ip_address)
        .bind(Utc::now().to_rfc3339())
        .execute(self.store.pool())
        .await?;

        Ok(raw)
    }

    fn parse(raw: &str) -> Result<String, AuthError> {
        let (token_id, _secret) = raw.split_once('.').ok_or(AuthError::TokenInvalid)?;
        uuid::Uuid::parse_str(token_id).map_err(|_| AuthError::TokenInvalid)?;
        Ok(token_id.to_string())
    }

    async fn fetch(&self, token_id: &str) -> Result<Option<RefreshTokenRow>, AuthError> {
        let row = sqlx::query_as::<_, (String, String, String, i64, Option<String>, Option<String>)>(
            "SELECT user_id, token_hash, expires_at, is_revoked, user_agent, ip_address
             FROM refresh_tokens WHERE token_id = ?",
        )
        .bind(token_id)
        .fetch_optional(self.store.pool())
        .await?;

        Ok(row.map(|(user_id, token_hash, expires_at, is_revoked, user_agent, ip_address)| RefreshTokenRow {
            user_id,
            token_hash,
            expires_at: DateTime::parse_from_rfc3339(&expires_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            is_revoked: is_revoked != 0,
            user_agent,
            ip_address,
        }))
    }

    /// Rotate a presented refresh token, returning the owning user id and a
    /// freshly issued replacement token.
    pub async fn rotate(&self, presented: &str) -> Result<(String, String), AuthError> {
        let token_id = Self::parse(presented)?;
        let row = self.fetch(&token_id).await?.ok_or(AuthError::TokenInvalid)?;

        if row.is_revoked || row.token_hash != hash_token(presented) {
            self.revoke_all(&row.user_id).await?;
            return Err(AuthError::TokenTheftDetected);
        }
        if row.expires_at <= Utc::now() {
            return Err(AuthError::TokenExpired);
        }

        sqlx::query("UPDATE refresh_tokens SET is_revoked = 1 WHERE token_id = ?")
            .bind(&token_id)
            .execute(self.store.pool())
            .await?;

        let rotated = self
            .issue(&row.user_id, row.user_agent.as_deref(), row.ip_address.as_deref())
            .await?;

        self.store.sweep_expired_refresh_tokens().await.ok();

        Ok((row.user_id, rotated))
    }

    pub async fn revoke_one(&self, presented: &str) -> Result<(), AuthError> {
        let token_id = Self::parse(presented)?;
        sqlx::query("UPDATE refresh_tokens SET is_revoked = 1 WHERE token_id = ?")
            .bind(token_id)
            .execute(self.store.pool())
            .await?;
        self.store.sweep_expired_refresh_tokens().await.ok();
        Ok(())
    }

    /// Revoke a single token by its bare `token_id` (spec §6 `POST
    /// /chat/revoke` body `{token_id?}`) — distinct from [`revoke_one`],
    /// which takes the full bearer string presented on `/chat/refresh`.
    /// Only the owning user may revoke their own token.
    pub async fn revoke_token_id(&self, user_id: &str, token_id: &str) -> Result<(), AuthError> {
        let row = self.fetch(token_id).await?.ok_or(AuthError::TokenInvalid)?;
        if row.user_id != user_id {
            return Err(AuthError::TokenNotOwned);
        }
        sqlx::query("UPDATE refresh_tokens SET is_revoked = 1 WHERE token_id = ?")
            .bind(token_id)
            .execute(self.store.pool())
            .await?;
        self.store.sweep_expired_refresh_tokens().await.ok();
        Ok(())
    }

    pub async fn revoke_all(&self, user_id: &str) -> Result<(), AuthError> {
        sqlx::query("UPDATE refresh_tokens SET is_revoked = 1 WHERE user_id = ?")
            .bind(user_id)
            .execute(self.store.pool())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::SqlitePool;

    async fn repo() -> RefreshTokenRepo {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let store = DocumentStore::from_pool(pool).await.unwrap();
        RefreshTokenRepo::new(store, RefreshConfig { ttl: Duration::from_secs(3600) })
    }

    #[tokio::test]
    async fn issue_then_rotate_succeeds_with_new_token_id() {
        let repo = repo().await;
        let token = repo.issue("u1", None, None).await.unwrap();
        let (user_id, rotated) = repo.rotate(&token).await.unwrap();
        assert_eq!(user_id, "u1");
        assert_ne!(token_id_of(&rotated), token_id_of(&token));

        // old row is now revoked
        let old_row = repo.fetch(&token_id_of(&token)).await.unwrap().unwrap();
        assert!(old_row.is_revoked);
    }

    #[tokio::test]
    async fn reusing_an_already_rotated_token_is_detected_as_theft() {
        let repo = repo().await;
        let token = repo.issue("u1", None, None).await.unwrap();
        let (_, rotated) = repo.rotate(&token).await.unwrap();

        let result = repo.rotate(&token).await;
        assert!(matches!(result, Err(AuthError::TokenTheftDetected)));

        // theft revokes the whole family, including the freshly rotated token
        assert!(matches!(repo.rotate(&rotated).await, Err(AuthError::TokenTheftDetected)));
    }

    #[tokio::test]
    async fn revoke_all_blocks_future_rotation() {
        let repo = repo().await;
        let token = repo.issue("u1", None, None).await.unwrap();
        repo.revoke_all("u1").await.unwrap();
        assert!(matches!(repo.rotate(&token).await, Err(AuthError::TokenTheftDetected)));
    }

    #[tokio::test]
    async fn revoke_token_id_requires_ownership() {
        let repo = repo().await;
        let token = repo.issue("u1", None, None).await.unwrap();
        let id = token_id_of(&token);
        assert!(matches!(
            repo.revoke_token_id("someone-else", &id).await,
            Err(AuthError::TokenNotOwned)
        ));
        repo.revoke_token_id("u1", &id).await.unwrap();
        assert!(matches!(repo.rotate(&token).await, Err(AuthError::TokenTheftDetected)));
    }

    fn token_id_of(raw: &str) -> String {
        raw.split_once('.').unwrap().0.to_string()
    }
}
