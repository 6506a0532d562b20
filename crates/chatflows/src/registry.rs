//! Chatflow Registry — sync from upstream and local catalog reads (spec
//! §4.C5 "Sync").

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use flowise_proxy_store::DocumentStore;

use crate::{
    error::ChatflowError,
    model::{Chatflow, CleanupAction, SyncReport, SyncStatus, UpstreamChatflow},
    upstream::UpstreamCatalog,
};

#[derive(Clone)]
pub struct ChatflowRegistry {
    store: DocumentStore,
    upstream: Arc<dyn UpstreamCatalog>,
}

/// A JSON blob field is valid if it's either absent or parses as JSON.
/// Invalid blobs are replaced by the previous good value and flip the
/// row's `sync_status` to `error` (spec §4.C5 step 2).
fn validate_blob(blob: &Option<String>) -> bool {
    match blob {
        None => true,
        Some(s) => serde_json::from_str::<serde_json::Value>(s).is_ok(),
    }
}

impl ChatflowRegistry {
    pub fn new(store: DocumentStore, upstream: Arc<dyn UpstreamCatalog>) -> Self {
        Self { store, upstream }
    }

    pub async fn find_by_id(&self, flowise_id: &str) -> Result<Option<Chatflow>, ChatflowError> {
        let row = sqlx::query_as::<_, (String, String, Option<String>, i64, i64, Option<String>, Option<String>, Option<String>, Option<String>, String, String)>(
            "SELECT flowise_id, name, description, deployed, is_public, category, flow_type, flow_data, chatbot_config, sync_status, synced_at
             FROM chatflows WHERE flowise_id = ?",
        )
        .bind(flowise_id)
        .fetch_optional(self.store.pool())
        .await?;

        Ok(row.map(row_to_chatflow))
    }

    /// Every chatflow with `sync_status != deleted`, regardless of
    /// per-user access (admin listing).
    pub async fn list_active(&self) -> Result<Vec<Chatflow>, ChatflowError> {
        let rows = sqlx::query_as::<_, (String, String, Option<String>, i64, i64, Option<String>, Option<String>, Option<String>, Option<String>, String, String)>(
            "SELECT flowise_id, name, description, deployed, is_public, category, flow_type, flow_data, chatbot_config, sync_status, synced_at
             FROM chatflows WHERE sync_status != 'deleted' ORDER BY name",
        )
        .fetch_all(self.store.pool())
        .await?;

        Ok(rows.into_iter().map(row_to_chatflow).collect())
    }

    /// Chatflows the given user has an active assignment for (spec §4.C5
    /// "Access check" — `is_public` is never a substitute).
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<Chatflow>, ChatflowError> {
        let rows = sqlx::query_as::<_, (String, String, Option<String>, i64, i64, Option<String>, Option<String>, Option<String>, Option<String>, String, String)>(
            "SELECT c.flowise_id, c.name, c.description, c.deployed, c.is_public, c.category, c.flow_type, c.flow_data, c.chatbot_config, c.sync_status, c.synced_at
             FROM chatflows c
             JOIN user_chatflows uc ON uc.chatflow_id = c.flowise_id
             WHERE uc.user_id = ? AND uc.is_active = 1 AND c.sync_status != 'deleted'
             ORDER BY c.name",
        )
        .bind(user_id)
        .fetch_all(self.store.pool())
        .await?;

        Ok(rows.into_iter().map(row_to_chatflow).collect())
    }

    /// `has_access(user_id, flowise_id)` (spec §4.C5).
    pub async fn has_access(&self, user_id: &str, flowise_id: &str) -> Result<bool, ChatflowError> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT is_active FROM user_chatflows WHERE user_id = ? AND chatflow_id = ?",
        )
        .bind(user_id)
        .bind(flowise_id)
        .fetch_optional(self.store.pool())
        .await?;

        Ok(row.map(|(active,)| active != 0).unwrap_or(false))
    }

    pub async fn assign(&self, user_id: &str, flowise_id: &str) -> Result<(), ChatflowError> {
        sqlx::query(
            "INSERT INTO user_chatflows (user_id, chatflow_id, is_active, assigned_at)
             VALUES (?, ?, 1, ?)
             ON CONFLICT(user_id, chatflow_id) DO UPDATE SET is_active = 1",
        )
        .bind(user_id)
        .bind(flowise_id)
        .bind(Utc::now().to_rfc3339())
        .execute(self.store.pool())
        .await?;
        Ok(())
    }

    pub async fn revoke(&self, user_id: &str, flowise_id: &str) -> Result<(), ChatflowError> {
        sqlx::query("UPDATE user_chatflows SET is_active = 0 WHERE user_id = ? AND chatflow_id = ?")
            .bind(user_id)
            .bind(flowise_id)
            .execute(self.store.pool())
            .await?;
        Ok(())
    }

    pub async fn list_users_of(&self, flowise_id: &str) -> Result<Vec<String>, ChatflowError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT user_id FROM user_chatflows WHERE chatflow_id = ? AND is_active = 1",
        )
        .bind(flowise_id)
        .fetch_all(self.store.pool())
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Users referenced by an assignment row but no longer present in the
    /// principal store (spec §4.C5 "audit").
    pub async fn audit_dangling_assignments(&self) -> Result<Vec<(String, String)>, ChatflowError> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT uc.user_id, uc.chatflow_id FROM user_chatflows uc
             LEFT JOIN principals p ON p.user_id = uc.user_id
             WHERE p.user_id IS NULL",
        )
        .fetch_all(self.store.pool())
        .await?;
        Ok(rows)
    }

    /// Deactivate or hard-delete dangling assignment rows, selected by
    /// `action` (spec §4.C5 "cleanup", body `{action, dry_run, force}`).
    /// `dry_run` (the default) performs no writes at all, for either
    /// action. `DeleteInvalid` additionally requires `force=true` to run —
    /// without it, a delete request is downgraded to a deactivate, since a
    /// hard delete can't be undone the way flipping `is_active` back can.
    pub async fn cleanup_dangling_assignments(
        &self,
        action: CleanupAction,
        dry_run: bool,
        force: bool,
    ) -> Result<usize, ChatflowError> {
        let dangling = self.audit_dangling_assignments().await?;
        if dry_run {
            return Ok(dangling.len());
        }
        let delete = action == CleanupAction::DeleteInvalid && force;
        for (user_id, chatflow_id) in &dangling {
            if delete {
                sqlx::query("DELETE FROM user_chatflows WHERE user_id = ? AND chatflow_id = ?")
                    .bind(user_id)
                    .bind(chatflow_id)
                    .execute(self.store.pool())
                    .await?;
            } else {
                sqlx::query(
                    "UPDATE user_chatflows SET is_active = 0 WHERE user_id = ? AND chatflow_id = ?",
                )
                .bind(user_id)
                .bind(chatflow_id)
                .execute(self.store.pool())
                .await?;
            }
        }
        Ok(dangling.len())
    }

    /// Full sync procedure (spec §4.C5 steps 1-4).
    pub async fn sync(&self) -> Result<SyncReport, ChatflowError> {
        let fetched = self.upstream.list_chatflows().await?;
        let mut report = SyncReport {
            total_fetched: fetched.len(),
            ..Default::default()
        };

        let mut seen_ids = HashSet::new();
        for entry in &fetched {
            seen_ids.insert(entry.id.clone());
            match self.upsert_one(entry).await {
                Ok(created) => {
                    if created {
                        report.created += 1;
                    } else {
                        report.updated += 1;
                    }
                }
                Err(err) => {
                    report.errors += 1;
                    report.error_details.push(format!("{}: {err}", entry.id));
                }
            }
        }

        report.deleted = self.mark_missing_as_deleted(&seen_ids).await?;
        Ok(report)
    }

    async fn upsert_one(&self, entry: &UpstreamChatflow) -> Result<bool, ChatflowError> {
        let existing = self.find_by_id(&entry.id).await?;

        let blobs_valid = validate_blob(&entry.flow_data) && validate_blob(&entry.chatbot_config);
        let (flow_data, chatbot_config, sync_status) = if blobs_valid {
            (
                entry.flow_data.clone(),
                entry.chatbot_config.clone(),
                SyncStatus::Active,
            )
        } else {
            // Defensive parse failure: keep the previous good blob, flag
            // the row instead of clobbering it with malformed data.
            let prev = existing.as_ref();
            (
                prev.and_then(|c| c.flow_data.clone()),
                prev.and_then(|c| c.chatbot_config.clone()),
                SyncStatus::Error,
            )
        };

        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO chatflows (flowise_id, name, description, deployed, is_public, category, flow_type, flow_data, chatbot_config, sync_status, synced_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(flowise_id) DO UPDATE SET
               name = excluded.name,
               description = excluded.description,
               deployed = excluded.deployed,
               is_public = excluded.is_public,
               category = excluded.category,
               flow_type = excluded.flow_type,
               flow_data = excluded.flow_data,
               chatbot_config = excluded.chatbot_config,
               sync_status = excluded.sync_status,
               synced_at = excluded.synced_at",
        )
        .bind(&entry.id)
        .bind(&entry.name)
        .bind(&entry.description)
        .bind(entry.deployed as i64)
        .bind(entry.is_public as i64)
        .bind(&entry.category)
        .bind(&entry.flow_type)
        .bind(&flow_data)
        .bind(&chatbot_config)
        .bind(sync_status.as_str())
        .bind(&now)
        .execute(self.store.pool())
        .await?;

        Ok(existing.is_none())
    }

    async fn mark_missing_as_deleted(&self, seen_ids: &HashSet<String>) -> Result<usize, ChatflowError> {
        let current: Vec<(String,)> = sqlx::query_as(
            "SELECT flowise_id FROM chatflows WHERE sync_status != 'deleted'",
        )
        .fetch_all(self.store.pool())
        .await?;

        let mut deleted = 0;
        for (id,) in current {
            if !seen_ids.contains(&id) {
                sqlx::query("UPDATE chatflows SET sync_status = 'deleted', synced_at = ? WHERE flowise_id = ?")
                    .bind(Utc::now().to_rfc3339())
                    .bind(&id)
                    .execute(self.store.pool())
                    .await?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

fn row_to_chatflow(
    row: (
        String,
        String,
        Option<String>,
        i64,
        i64,
        Option<String>,
        Option<String>,
        Option<String>,
        Option<String>,
        String,
        String,
    ),
) -> Chatflow {
    let (flowise_id, name, description, deployed, is_public, category, flow_type, flow_data, chatbot_config, sync_status, synced_at) = row;
    Chatflow {
        flowise_id,
        name,
        description,
        deployed: deployed != 0,
        is_public: is_public != 0,
        category,
        flow_type,
        flow_data,
        chatbot_config,
        sync_status: sync_status.parse().unwrap_or(SyncStatus::Error),
        synced_at: synced_at.parse().unwrap_or_else(|_| Utc::now()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::SqlitePool;

    struct FakeCatalog(Vec<UpstreamChatflow>);

    #[async_trait::async_trait]
    impl UpstreamCatalog for FakeCatalog {
        async fn list_chatflows(&self) -> Result<Vec<UpstreamChatflow>, ChatflowError> {
            Ok(self.0.clone())
        }
    }

    impl Clone for UpstreamChatflow {
        fn clone(&self) -> Self {
            UpstreamChatflow {
                id: self.id.clone(),
                name: self.name.clone(),
                description: self.description.clone(),
                deployed: self.deployed,
                is_public: self.is_public,
                category: self.category.clone(),
                flow_type: self.flow_type.clone(),
                flow_data: self.flow_data.clone(),
                chatbot_config: self.chatbot_config.clone(),
            }
        }
    }

    async fn registry(entries: Vec<UpstreamChatflow>) -> ChatflowRegistry {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let store = DocumentStore::from_pool(pool).await.unwrap();
        ChatflowRegistry::new(store, Arc::new(FakeCatalog(entries)))
    }

    fn flow(id: &str) -> UpstreamChatflow {
        UpstreamChatflow {
            id: id.to_string(),
            name: format!("Flow {id}"),
            description: None,
            deployed: true,
            is_public: false,
            category: None,
            flow_type: None,
            flow_data: Some("{}".to_string()),
            chatbot_config: None,
        }
    }

    #[tokio::test]
    async fn sync_creates_new_chatflows() {
        let registry = registry(vec![flow("a"), flow("b")]).await;
        let report = registry.sync().await.unwrap();
        assert_eq!(report.created, 2);
        assert_eq!(report.updated, 0);
        assert!(registry.find_by_id("a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn sync_marks_missing_entries_deleted() {
        let registry = registry(vec![flow("a"), flow("b")]).await;
        registry.sync().await.unwrap();

        let registry = ChatflowRegistry::new(registry.store.clone(), Arc::new(FakeCatalog(vec![flow("a")])));
        let report = registry.sync().await.unwrap();
        assert_eq!(report.deleted, 1);
        let b = registry.find_by_id("b").await.unwrap().unwrap();
        assert_eq!(b.sync_status, SyncStatus::Deleted);
    }

    #[tokio::test]
    async fn malformed_blob_keeps_previous_value_and_flags_error() {
        let mut good = flow("a");
        good.flow_data = Some(r#"{"nodes": []}"#.to_string());
        let registry = registry(vec![good.clone()]).await;
        registry.sync().await.unwrap();

        let mut bad = good.clone();
        bad.flow_data = Some("not json".to_string());
        let registry = ChatflowRegistry::new(registry.store.clone(), Arc::new(FakeCatalog(vec![bad])));
        registry.sync().await.unwrap();

        let row = registry.find_by_id("a").await.unwrap().unwrap();
        assert_eq!(row.sync_status, SyncStatus::Error);
        assert_eq!(row.flow_data.as_deref(), Some(r#"{"nodes": []}"#));
    }

    #[tokio::test]
    async fn access_check_requires_active_assignment() {
        let registry = registry(vec![flow("a")]).await;
        registry.sync().await.unwrap();
        assert!(!registry.has_access("u1", "a").await.unwrap());
        registry.assign("u1", "a").await.unwrap();
        assert!(registry.has_access("u1", "a").await.unwrap());
        registry.revoke("u1", "a").await.unwrap();
        assert!(!registry.has_access("u1", "a").await.unwrap());
    }

    async fn registry_with_dangling_assignment() -> ChatflowRegistry {
        let registry = registry(vec![]).await;
        sqlx::query(
            "INSERT INTO user_chatflows (user_id, chatflow_id, is_active, assigned_at)
             VALUES ('ghost', 'cf1', 1, datetime('now'))",
        )
        .execute(registry.store.pool())
        .await
        .unwrap();
        registry
    }

    #[tokio::test]
    async fn cleanup_dry_run_counts_without_writing() {
        let registry = registry_with_dangling_assignment().await;
        let affected = registry
            .cleanup_dangling_assignments(CleanupAction::DeleteInvalid, true, true)
            .await
            .unwrap();
        assert_eq!(affected, 1);
        assert!(registry.has_access("ghost", "cf1").await.unwrap());
    }

    #[tokio::test]
    async fn cleanup_deactivate_invalid_flips_is_active() {
        let registry = registry_with_dangling_assignment().await;
        registry
            .cleanup_dangling_assignments(CleanupAction::DeactivateInvalid, false, false)
            .await
            .unwrap();
        assert!(!registry.has_access("ghost", "cf1").await.unwrap());
        assert_eq!(registry.audit_dangling_assignments().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cleanup_delete_invalid_without_force_only_deactivates() {
        let registry = registry_with_dangling_assignment().await;
        registry
            .cleanup_dangling_assignments(CleanupAction::DeleteInvalid, false, false)
            .await
            .unwrap();
        assert!(!registry.has_access("ghost", "cf1").await.unwrap());
        // downgraded to deactivate, not deleted: still shows up in the audit
        assert_eq!(registry.audit_dangling_assignments().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cleanup_delete_invalid_with_force_removes_the_row() {
        let registry = registry_with_dangling_assignment().await;
        registry
            .cleanup_dangling_assignments(CleanupAction::DeleteInvalid, false, true)
            .await
            .unwrap();
        assert!(registry.audit_dangling_assignments().await.unwrap().is_empty());
    }
}
