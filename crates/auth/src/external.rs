//! External identity provider fallback (spec §4.C3), grounded on
//! `original_source/.../app/services/external_auth_service.py`: POSTs
//! `{username, password}` and expects `{user_id, username, email, role}`
//! on success.

use serde::Deserialize;

use crate::{error::AuthError, role::Role};

#[derive(Debug, Clone, Deserialize)]
pub struct ExternalIdentity {
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub role: Role,
}

#[async_trait::async_trait]
pub trait ExternalIdentityProvider: Send + Sync {
    /// `Ok(None)` means the external IdP rejected the credentials (not an
    /// error); `Err` means the provider itself could not be reached.
    async fn verify(&self, username: &str, password: &str) -> Result<Option<ExternalIdentity>, AuthError>;

    /// Full user roster, for the admin reconciliation sweep (spec §6 `POST
    /// /admin/users/sync`, grounded on `original_source/.../Script/adminSyncUser.py`'s
    /// "compare local principals against every external user" shape).
    async fn list_all(&self) -> Result<Vec<ExternalIdentity>, AuthError>;

    /// Single-user lookup by email for the narrower `/admin/users/sync-by-email`.
    async fn fetch_by_email(&self, email: &str) -> Result<Option<ExternalIdentity>, AuthError>;
}

pub struct HttpExternalIdentityProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpExternalIdentityProvider {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    /// The verify endpoint's parent path, which the roster/lookup endpoints
    /// hang off of as siblings (`{root}/users`, `{root}/users/by-email`).
    fn root(&self) -> &str {
        self.base_url.trim_end_matches("/verify").trim_end_matches('/')
    }
}

#[async_trait::async_trait]
impl ExternalIdentityProvider for HttpExternalIdentityProvider {
    async fn verify(&self, username: &str, password: &str) -> Result<Option<ExternalIdentity>, AuthError> {
        let response = self
            .client
            .post(&self.base_url)
            .json(&serde_json::json!({ "username": username, "password": password }))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED
            || response.status() == reqwest::StatusCode::NOT_FOUND
        {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(AuthError::ExternalProviderUnavailable);
        }

        let identity = response.json::<ExternalIdentity>().await?;
        Ok(Some(identity))
    }

    async fn list_all(&self) -> Result<Vec<ExternalIdentity>, AuthError> {
        let response = self
            .client
            .get(format!("{}/users", self.root()))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AuthError::ExternalProviderUnavailable);
        }
        Ok(response.json::<Vec<ExternalIdentity>>().await?)
    }

    async fn fetch_by_email(&self, email: &str) -> Result<Option<ExternalIdentity>, AuthError> {
        let response = self
            .client
            .get(format!("{}/users/by-email", self.root()))
            .query(&[("email", email)])
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(AuthError::ExternalProviderUnavailable);
        }
        Ok(Some(response.json::<ExternalIdentity>().await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successful_verification_parses_identity() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"user_id":"u1","username":"alice","email":"a@example.com","role":"EndUser"}"#)
            .create_async()
            .await;

        let provider = HttpExternalIdentityProvider::new(server.url());
        let identity = provider.verify("alice", "secret").await.unwrap().unwrap();
        assert_eq!(identity.user_id, "u1");
        assert_eq!(identity.role, Role::EndUser);
    }

    #[tokio::test]
    async fn rejected_credentials_return_none() {
        let mut server = mockito::Server::new_async().await;
        let _m = server.mock("POST", "/").with_status(401).create_async().await;

        let provider = HttpExternalIdentityProvider::new(server.url());
        assert!(provider.verify("alice", "wrong").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_all_parses_roster() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/users")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"user_id":"u1","username":"alice","email":"a@example.com","role":"EndUser"}]"#)
            .create_async()
            .await;

        let provider = HttpExternalIdentityProvider::new(format!("{}/verify", server.url()));
        let roster = provider.list_all().await.unwrap();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].username, "alice");
    }

    #[tokio::test]
    async fn fetch_by_email_returns_none_on_404() {
        let mut server = mockito::Server::new_async().await;
        let _m = server.mock("GET", "/users/by-email").with_status(404).create_async().await;

        let provider = HttpExternalIdentityProvider::new(format!("{}/verify", server.url()));
        assert!(provider.fetch_by_email("ghost@example.com").await.unwrap().is_none());
    }
}
