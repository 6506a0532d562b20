//! Upstream catalog client (spec §6 "Upstream contract": `GET
//! <upstream>/api/v1/chatflows`). Grounded on the teacher's
//! `OpenAiProvider`'s bearer-auth reqwest usage (crates/agents/src/providers/openai.rs),
//! adapted from chat completions to a plain authenticated GET.

use crate::{error::ChatflowError, model::UpstreamChatflow};

#[async_trait::async_trait]
pub trait UpstreamCatalog: Send + Sync {
    async fn list_chatflows(&self) -> Result<Vec<UpstreamChatflow>, ChatflowError>;
}

pub struct HttpUpstreamCatalog {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<secrecy::Secret<String>>,
}

impl HttpUpstreamCatalog {
    pub fn new(base_url: String, api_key: Option<secrecy::Secret<String>>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
        }
    }
}

#[async_trait::async_trait]
impl UpstreamCatalog for HttpUpstreamCatalog {
    async fn list_chatflows(&self) -> Result<Vec<UpstreamChatflow>, ChatflowError> {
        use secrecy::ExposeSecret;

        let mut request = self
            .client
            .get(format!("{}/api/v1/chatflows", self.base_url));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request.send().await?.error_for_status()?;
        let flows = response.json::<Vec<UpstreamChatflow>>().await?;
        Ok(flows)
    }
}
