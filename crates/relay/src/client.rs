//! Upstream invocation (spec §4.C9 "Upstream invocation" / §6 "Upstream
//! contract"). Grounded on the teacher's `OpenAiProvider::stream` reqwest
//! usage (`crates/agents/src/providers/openai.rs`): one shared `reqwest::Client`,
//! a streaming POST, `bytes_stream()` consumed chunk by chunk.

use std::pin::Pin;
use std::time::Duration;

use futures::Stream;
use serde::Serialize;

use crate::error::RelayError;

#[derive(Debug, Clone, Serialize)]
pub struct UploadPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub mime: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize)]
struct OverrideConfig {
    #[serde(rename = "sessionId")]
    session_id: String,
}

#[derive(Debug, Clone, Serialize)]
struct PredictionBody {
    question: String,
    streaming: bool,
    #[serde(rename = "overrideConfig")]
    override_config: OverrideConfig,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    uploads: Vec<UploadPayload>,
}

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>;

#[async_trait::async_trait]
pub trait UpstreamPredictClient: Send + Sync {
    async fn predict_stream(
        &self,
        chatflow_id: &str,
        question: &str,
        session_id: &str,
        uploads: Vec<UploadPayload>,
    ) -> Result<ByteStream, RelayError>;
}

pub struct HttpUpstreamPredictClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<secrecy::Secret<String>>,
}

impl HttpUpstreamPredictClient {
    pub fn new(
        base_url: String,
        api_key: Option<secrecy::Secret<String>>,
        connect_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }
}

#[async_trait::async_trait]
impl UpstreamPredictClient for HttpUpstreamPredictClient {
    async fn predict_stream(
        &self,
        chatflow_id: &str,
        question: &str,
        session_id: &str,
        uploads: Vec<UploadPayload>,
    ) -> Result<ByteStream, RelayError> {
        use secrecy::ExposeSecret;

        let body = PredictionBody {
            question: question.to_string(),
            streaming: true,
            override_config: OverrideConfig {
                session_id: session_id.to_string(),
            },
            uploads,
        };

        let mut request = self
            .client
            .post(format!("{}/api/v1/prediction/{chatflow_id}", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| RelayError::UpstreamUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RelayError::UpstreamUnavailable(format!(
                "upstream returned HTTP {}",
                response.status()
            )));
        }

        Ok(Box::pin(response.bytes_stream()))
    }
}
