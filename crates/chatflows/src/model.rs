//! Chatflow catalog types (spec §3 "Chatflow").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Active,
    Deleted,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Active => "active",
            SyncStatus::Deleted => "deleted",
            SyncStatus::Error => "error",
        }
    }
}

impl std::str::FromStr for SyncStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SyncStatus::Active),
            "deleted" => Ok(SyncStatus::Deleted),
            "error" => Ok(SyncStatus::Error),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Chatflow {
    pub flowise_id: String,
    pub name: String,
    pub description: Option<String>,
    pub deployed: bool,
    pub is_public: bool,
    pub category: Option<String>,
    pub flow_type: Option<String>,
    /// Opaque JSON blob, kept as a string per spec §9 (the source mixes
    /// dicts freely; only the fields the registry actually reads get a
    /// typed projection — everything else stays a raw string).
    pub flow_data: Option<String>,
    pub chatbot_config: Option<String>,
    pub sync_status: SyncStatus,
    pub synced_at: DateTime<Utc>,
}

/// One entry from the upstream catalog listing (spec §6 "Upstream
/// contract"). `flow_data`/`chatbot_config` arrive as JSON-encoded strings
/// from upstream, same as the source — parsed defensively, never assumed
/// well-formed (spec §4.C5 step 2).
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamChatflow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub deployed: bool,
    #[serde(rename = "isPublic", default)]
    pub is_public: bool,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(rename = "type", default)]
    pub flow_type: Option<String>,
    #[serde(rename = "flowData", default)]
    pub flow_data: Option<String>,
    #[serde(rename = "chatbotConfig", default)]
    pub chatbot_config: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub total_fetched: usize,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub errors: usize,
    pub error_details: Vec<String>,
}

/// Which cleanup operation `POST /admin/chatflows/cleanup-users` applies to
/// dangling assignments (spec §4.C5 "cleanup", body `{action, dry_run,
/// force}`). `DeactivateInvalid` is reversible (flips `is_active`);
/// `DeleteInvalid` hard-deletes the row and additionally requires `force`
/// to actually run, never just `dry_run=false` (see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CleanupAction {
    #[default]
    DeactivateInvalid,
    DeleteInvalid,
}
