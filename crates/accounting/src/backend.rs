//! Accounting Client (spec §4.C6). Two interchangeable backends behind one
//! trait: `Local` treats `Principal.credits` as the source of truth and
//! debits via a compare-and-swap UPDATE; `Remote` forwards to an external
//! accounting HTTP service with the caller's access token, per spec.

use std::sync::Arc;

use chrono::Utc;
use flowise_proxy_store::DocumentStore;

use crate::error::AccountingError;

#[async_trait::async_trait]
pub trait AccountingBackend: Send + Sync {
    async fn get_balance(&self, user_id: &str) -> Result<Option<i64>, AccountingError>;

    /// Atomically decrement `user_id`'s balance by `amount`. Returns
    /// `false` (no state change) on insufficient funds — never debits
    /// partially.
    async fn debit(&self, user_id: &str, amount: i64, reason: &str) -> Result<bool, AccountingError>;

    async fn cost(&self, chatflow_id: &str) -> Result<i64, AccountingError>;

    async fn log_transaction(
        &self,
        user_id: &str,
        chatflow_id: &str,
        cost: i64,
        success: bool,
    ) -> Result<(), AccountingError>;
}

/// Local backend: the `principals.credits` column is authoritative.
pub struct LocalAccounting {
    store: DocumentStore,
}

impl LocalAccounting {
    pub fn new(store: DocumentStore) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl AccountingBackend for LocalAccounting {
    async fn get_balance(&self, user_id: &str) -> Result<Option<i64>, AccountingError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT credits FROM principals WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(self.store.pool())
            .await?;
        Ok(row.map(|(credits,)| credits))
    }

    async fn debit(&self, user_id: &str, amount: i64, reason: &str) -> Result<bool, AccountingError> {
        // Compare-and-swap: the WHERE clause only matches rows with
        // sufficient balance, so a racing concurrent debit can never drive
        // credits negative (spec: "failure must not debit").
        let result = sqlx::query(
            "UPDATE principals SET credits = credits - ?, updated_at = ?
             WHERE user_id = ? AND credits >= ?",
        )
        .bind(amount)
        .bind(Utc::now().to_rfc3339())
        .bind(user_id)
        .bind(amount)
        .execute(self.store.pool())
        .await?;

        let debited = result.rows_affected() > 0;
        if !debited {
            tracing::debug!(user_id, amount, reason, "debit denied: insufficient credits");
        }
        Ok(debited)
    }

    async fn cost(&self, _chatflow_id: &str) -> Result<i64, AccountingError> {
        Ok(1)
    }

    async fn log_transaction(
        &self,
        user_id: &str,
        chatflow_id: &str,
        cost: i64,
        success: bool,
    ) -> Result<(), AccountingError> {
        sqlx::query(
            "INSERT INTO transactions (user_id, chatflow_id, cost, success, reason, created_at)
             VALUES (?, ?, ?, ?, NULL, ?)",
        )
        .bind(user_id)
        .bind(chatflow_id)
        .bind(cost)
        .bind(success as i64)
        .bind(Utc::now().to_rfc3339())
        .execute(self.store.pool())
        .await?;
        Ok(())
    }
}

/// Remote backend: forwards to `ACCOUNTING_SERVICE_URL` with the caller's
/// own access token (spec §4.C6). The transaction log still lands locally
/// — the log is this proxy's audit trail regardless of which ledger owns
/// the balance.
pub struct RemoteAccounting {
    client: reqwest::Client,
    base_url: String,
    store: DocumentStore,
}

impl RemoteAccounting {
    pub fn new(base_url: String, store: DocumentStore) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            store,
        }
    }

    /// The remote backend needs the caller's bearer token forwarded per
    /// request; this constructs a scoped view bound to one token. Takes
    /// `Arc<Self>` rather than `&self` so the result is `'static` and can be
    /// erased to `Arc<dyn AccountingBackend>` for one request's lifetime.
    pub fn scoped(self: Arc<Self>, access_token: &str) -> ScopedRemoteAccounting {
        ScopedRemoteAccounting {
            backend: self,
            access_token: access_token.to_string(),
        }
    }
}

pub struct ScopedRemoteAccounting {
    backend: Arc<RemoteAccounting>,
    access_token: String,
}

#[async_trait::async_trait]
impl AccountingBackend for ScopedRemoteAccounting {
    async fn get_balance(&self, user_id: &str) -> Result<Option<i64>, AccountingError> {
        let response = self
            .backend
            .client
            .get(format!("{}/balance/{user_id}", self.backend.base_url))
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: serde_json::Value = response.error_for_status()?.json().await?;
        Ok(body.get("balance").and_then(|v| v.as_i64()))
    }

    async fn debit(&self, user_id: &str, amount: i64, reason: &str) -> Result<bool, AccountingError> {
        let response = self
            .backend
            .client
            .post(format!("{}/debit", self.backend.base_url))
            .bearer_auth(&self.access_token)
            .json(&serde_json::json!({ "user_id": user_id, "amount": amount, "reason": reason }))
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::PAYMENT_REQUIRED {
            return Ok(false);
        }
        let body: serde_json::Value = response.error_for_status()?.json().await?;
        Ok(body.get("ok").and_then(|v| v.as_bool()).unwrap_or(false))
    }

    async fn cost(&self, chatflow_id: &str) -> Result<i64, AccountingError> {
        let response = self
            .backend
            .client
            .get(format!("{}/cost/{chatflow_id}", self.backend.base_url))
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Ok(1);
        }
        let body: serde_json::Value = response.json().await?;
        Ok(body.get("cost").and_then(|v| v.as_i64()).unwrap_or(1).max(1))
    }

    async fn log_transaction(
        &self,
        user_id: &str,
        chatflow_id: &str,
        cost: i64,
        success: bool,
    ) -> Result<(), AccountingError> {
        sqlx::query(
            "INSERT INTO transactions (user_id, chatflow_id, cost, success, reason, created_at)
             VALUES (?, ?, ?, ?, NULL, ?)",
        )
        .bind(user_id)
        .bind(chatflow_id)
        .bind(cost)
        .bind(success as i64)
        .bind(Utc::now().to_rfc3339())
        .execute(self.backend.store.pool())
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::SqlitePool;

    async fn store_with_user(credits: i64) -> DocumentStore {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let store = DocumentStore::from_pool(pool).await.unwrap();
        sqlx::query(
            "INSERT INTO principals (user_id, username, email, password_hash, role, is_active, credits, created_at, updated_at)
             VALUES ('u1', 'alice', 'a@example.com', 'h', 'EndUser', 1, ?, datetime('now'), datetime('now'))",
        )
        .bind(credits)
        .execute(store.pool())
        .await
        .unwrap();
        store
    }

    #[tokio::test]
    async fn debit_succeeds_exactly_at_balance() {
        let store = store_with_user(5).await;
        let backend = LocalAccounting::new(store);
        assert!(backend.debit("u1", 5, "test").await.unwrap());
        assert_eq!(backend.get_balance("u1").await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn debit_fails_one_below_cost() {
        let store = store_with_user(4).await;
        let backend = LocalAccounting::new(store);
        assert!(!backend.debit("u1", 5, "test").await.unwrap());
        assert_eq!(backend.get_balance("u1").await.unwrap(), Some(4));
    }

    #[tokio::test]
    async fn log_transaction_records_success_flag() {
        let store = store_with_user(10).await;
        let backend = LocalAccounting::new(store.clone());
        backend.log_transaction("u1", "cf1", 3, false).await.unwrap();
        let row: (i64,) = sqlx::query_as("SELECT success FROM transactions WHERE user_id = 'u1'")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(row.0, 0);
    }
}
