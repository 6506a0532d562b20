use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatSession {
    pub session_id: String,
    pub user_id: String,
    pub chatflow_id: String,
    pub topic: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub session_id: String,
    pub user_id: String,
    pub chatflow_id: String,
    pub role: Role,
    pub content: String,
    /// Ordered list of non-token upstream events, JSON-encoded (spec §3
    /// ChatMessage.metadata). `None` for user turns.
    pub metadata: Option<String>,
    pub has_files: bool,
    pub file_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// A `FileUpload` reference hydrated for history responses (spec §4.C8
/// "History retrieval").
#[derive(Debug, Clone, Serialize)]
pub struct HydratedUpload {
    pub file_id: String,
    pub name: String,
    pub mime: String,
    pub url: String,
    pub thumbnail_url: Option<String>,
    pub is_image: bool,
}
