//! Principal storage (spec §3). Grounded on `CredentialStore::init()`'s
//! `CREATE TABLE IF NOT EXISTS` bootstrap shape, adapted to query the
//! shared `flowise_proxy_store::DocumentStore` pool instead of owning one.

use chrono::{DateTime, Utc};
use flowise_proxy_store::DocumentStore;

use crate::{error::AuthError, external::ExternalIdentity, role::Role};

#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub is_active: bool,
    pub credits: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A `Principal` plus its stored password hash — never exposed outside
/// the auth crate.
pub(crate) struct PrincipalWithHash {
    pub principal: Principal,
    pub password_hash: String,
}

#[derive(Clone)]
pub struct PrincipalRepo {
    store: DocumentStore,
}

fn row_to_principal(
    user_id: String,
    username: String,
    email: String,
    role: String,
    is_active: i64,
    credits: i64,
    created_at: String,
    updated_at: String,
) -> Result<Principal, AuthError> {
    Ok(Principal {
        user_id,
        username,
        email,
        role: role.parse()?,
        is_active: is_active != 0,
        credits,
        created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
        updated_at: updated_at.parse().unwrap_or_else(|_| Utc::now()),
    })
}

impl PrincipalRepo {
    pub fn new(store: DocumentStore) -> Self {
        Self { store }
    }

    pub(crate) async fn find_with_hash_by_username(
        &self,
        username: &str,
    ) -> Result<Option<PrincipalWithHash>, AuthError> {
        let row = sqlx::query_as::<_, (String, String, String, String, String, i64, i64, String, String)>(
            "SELECT user_id, username, email, password_hash, role, is_active, credits, created_at, updated_at
             FROM principals WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(self.store.pool())
        .await?;

        match row {
            None => Ok(None),
            Some((user_id, username, email, password_hash, role, is_active, credits, created_at, updated_at)) => {
                Ok(Some(PrincipalWithHash {
                    principal: row_to_principal(user_id, username, email, role, is_active, credits, created_at, updated_at)?,
                    password_hash,
                }))
            }
        }
    }

    pub async fn find_by_user_id(&self, user_id: &str) -> Result<Option<Principal>, AuthError> {
        let row = sqlx::query_as::<_, (String, String, String, String, i64, i64, String, String)>(
            "SELECT user_id, username, email, role, is_active, credits, created_at, updated_at
             FROM principals WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(self.store.pool())
        .await?;

        match row {
            None => Ok(None),
            Some((user_id, username, email, role, is_active, credits, created_at, updated_at)) => Ok(Some(
                row_to_principal(user_id, username, email, role, is_active, credits, created_at, updated_at)?,
            )),
        }
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<Principal>, AuthError> {
        let row = sqlx::query_as::<_, (String, String, String, String, i64, i64, String, String)>(
            "SELECT user_id, username, email, role, is_active, credits, created_at, updated_at
             FROM principals WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(self.store.pool())
        .await?;

        match row {
            None => Ok(None),
            Some((user_id, username, email, role, is_active, credits, created_at, updated_at)) => Ok(Some(
                row_to_principal(user_id, username, email, role, is_active, credits, created_at, updated_at)?,
            )),
        }
    }

    /// Deactivate a principal. The spec is explicit: accounts are
    /// deactivated, never hard-deleted.
    pub async fn deactivate(&self, user_id: &str) -> Result<(), AuthError> {
        sqlx::query("UPDATE principals SET is_active = 0, updated_at = ? WHERE user_id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(user_id)
            .execute(self.store.pool())
            .await?;
        Ok(())
    }

    pub async fn list_all(&self) -> Result<Vec<Principal>, AuthError> {
        let rows: Vec<(String, String, String, String, i64, i64, String, String)> = sqlx::query_as(
            "SELECT user_id, username, email, role, is_active, credits, created_at, updated_at FROM principals",
        )
        .fetch_all(self.store.pool())
        .await?;

        rows.into_iter()
            .map(|(user_id, username, email, role, is_active, credits, created_at, updated_at)| {
                row_to_principal(user_id, username, email, role, is_active, credits, created_at, updated_at)
            })
            .collect()
    }

    /// Create-or-update a principal from an external roster entry (spec §6
    /// `POST /admin/users/sync`). Never downgrades a principal's role, and
    /// never touches `credits` — those are this proxy's own ledger, not the
    /// identity provider's concern.
    pub async fn upsert_from_external(&self, identity: &ExternalIdentity) -> Result<bool, AuthError> {
        if let Some(existing) = self.find_by_user_id(&identity.user_id).await? {
            let role = if identity.role.is_privileged() || !existing.role.is_privileged() {
                identity.role
            } else {
                existing.role
            };
            sqlx::query(
                "UPDATE principals SET username = ?, email = ?, role = ?, is_active = 1, updated_at = ? WHERE user_id = ?",
            )
            .bind(&identity.username)
            .bind(&identity.email)
            .bind(role.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(&identity.user_id)
            .execute(self.store.pool())
            .await?;
            Ok(false)
        } else {
            let placeholder_hash = crate::password::hash_password(&uuid::Uuid::new_v4().to_string())?;
            self.create(&identity.user_id, &identity.username, &identity.email, &placeholder_hash, identity.role)
                .await?;
            Ok(true)
        }
    }

    /// Insert a new principal. Used both for admin-created local accounts
    /// and for lazy provisioning after a successful external-IdP check.
    pub async fn create(
        &self,
        user_id: &str,
        username: &str,
        email: &str,
        password_hash: &str,
        role: Role,
    ) -> Result<Principal, AuthError> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO principals (user_id, username, email, password_hash, role, is_active, credits, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, 1, 0, ?, ?)",
        )
        .bind(user_id)
        .bind(username)
        .bind(email)
        .bind(password_hash)
        .bind(role.as_str())
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(self.store.pool())
        .await?;

        Ok(Principal {
            user_id: user_id.to_string(),
            username: username.to_string(),
            email: email.to_string(),
            role,
            is_active: true,
            credits: 0,
            created_at: now,
            updated_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::SqlitePool;

    async fn repo() -> PrincipalRepo {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let store = DocumentStore::from_pool(pool).await.unwrap();
        PrincipalRepo::new(store)
    }

    #[tokio::test]
    async fn create_then_find_by_user_id() {
        let repo = repo().await;
        repo.create("u1", "alice", "alice@example.com", "hash", Role::EndUser)
            .await
            .unwrap();
        let found = repo.find_by_user_id("u1").await.unwrap().unwrap();
        assert_eq!(found.username, "alice");
        assert_eq!(found.role, Role::EndUser);
    }

    #[tokio::test]
    async fn find_with_hash_by_username_roundtrips_hash() {
        let repo = repo().await;
        repo.create("u2", "bob", "bob@example.com", "somehash", Role::Admin)
            .await
            .unwrap();
        let found = repo.find_with_hash_by_username("bob").await.unwrap().unwrap();
        assert_eq!(found.password_hash, "somehash");
        assert_eq!(found.principal.role, Role::Admin);
    }

    #[tokio::test]
    async fn missing_username_returns_none() {
        let repo = repo().await;
        assert!(repo.find_with_hash_by_username("ghost").await.unwrap().is_none());
    }
}
