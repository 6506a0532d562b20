//! Façade tying password verification, external-IdP fallback, JWT minting
//! and refresh-token rotation into the operations the gateway calls.

use std::sync::Arc;

use crate::{
    error::AuthError,
    external::ExternalIdentityProvider,
    jwt::TokenService,
    password::verify_password,
    principal::{Principal, PrincipalRepo},
    refresh::{RefreshTokenRepo, TokenPair},
    role::Role,
};

/// Result of an admin-triggered reconciliation sweep against the external
/// identity provider (spec §6 `POST /admin/users/sync` /
/// `/admin/users/sync-by-email`), shaped after `adminSyncUser.py`'s
/// `statistics` block.
#[derive(Debug, Default, serde::Serialize)]
pub struct UserSyncReport {
    pub total_external_users: usize,
    pub total_local_users: usize,
    pub created_users: usize,
    pub updated_users: usize,
    pub deactivated_users: usize,
    pub errors: Vec<String>,
}

pub struct AuthService {
    principals: PrincipalRepo,
    tokens: TokenService,
    refresh_tokens: RefreshTokenRepo,
    external: Option<Arc<dyn ExternalIdentityProvider>>,
}

impl AuthService {
    pub fn new(
        principals: PrincipalRepo,
        tokens: TokenService,
        refresh_tokens: RefreshTokenRepo,
        external: Option<Arc<dyn ExternalIdentityProvider>>,
    ) -> Self {
        Self {
            principals,
            tokens,
            refresh_tokens,
            external,
        }
    }

    /// Password verification with external-IdP fallback and lazy local
    /// provisioning (spec §4.C3). Never downgrades an existing local role.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
        user_agent: Option<&str>,
        ip_address: Option<&str>,
    ) -> Result<(Principal, TokenPair), AuthError> {
        let principal = match self.principals.find_with_hash_by_username(username).await? {
            Some(found) => {
                if !verify_password(password, &found.password_hash)? {
                    return Err(AuthError::InvalidCredentials);
                }
                found.principal
            }
            None => {
                let external = self.external.as_ref().ok_or(AuthError::InvalidCredentials)?;
                let identity = external
                    .verify(username, password)
                    .await?
                    .ok_or(AuthError::InvalidCredentials)?;
                let placeholder_hash = crate::password::hash_password(&uuid::Uuid::new_v4().to_string())?;
                self.principals
                    .create(
                        &identity.user_id,
                        &identity.username,
                        &identity.email,
                        &placeholder_hash,
                        Role::EndUser,
                    )
                    .await?
            }
        };

        if !principal.is_active {
            return Err(AuthError::PrincipalInactive);
        }

        let access_token = self.tokens.mint_access_token(&principal)?;
        let refresh_token = self
            .refresh_tokens
            .issue(&principal.user_id, user_agent, ip_address)
            .await?;

        Ok((principal, TokenPair { access_token, refresh_token }))
    }

    /// Rotate a refresh token and mint a new access token to go with it.
    pub async fn refresh(&self, presented_refresh_token: &str) -> Result<(Principal, TokenPair), AuthError> {
        let (user_id, rotated) = self.refresh_tokens.rotate(presented_refresh_token).await?;
        let principal = self
            .principals
            .find_by_user_id(&user_id)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        if !principal.is_active {
            return Err(AuthError::PrincipalInactive);
        }
        let access_token = self.tokens.mint_access_token(&principal)?;
        Ok((principal, TokenPair { access_token, refresh_token: rotated }))
    }

    pub async fn revoke_one(&self, presented_refresh_token: &str) -> Result<(), AuthError> {
        self.refresh_tokens.revoke_one(presented_refresh_token).await
    }

    /// Revoke a single token by its bare `token_id` (spec §6 `POST
    /// /chat/revoke`), scoped to the calling user so one principal cannot
    /// revoke another's session.
    pub async fn revoke_token_id(&self, user_id: &str, token_id: &str) -> Result<(), AuthError> {
        self.refresh_tokens.revoke_token_id(user_id, token_id).await
    }

    pub async fn revoke_all(&self, user_id: &str) -> Result<(), AuthError> {
        self.refresh_tokens.revoke_all(user_id).await
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub fn principals(&self) -> &PrincipalRepo {
        &self.principals
    }

    /// Reconcile every local principal against the external roster: upsert
    /// each external user, then deactivate any local account that the
    /// external provider no longer lists (spec §6 `POST /admin/users/sync`).
    pub async fn sync_all_users(&self) -> Result<UserSyncReport, AuthError> {
        let external = self
            .external
            .as_ref()
            .ok_or(AuthError::ExternalProviderUnavailable)?;
        let roster = external.list_all().await?;
        let local_before = self.principals.list_all().await?;

        let mut report = UserSyncReport {
            total_external_users: roster.len(),
            total_local_users: local_before.len(),
            ..Default::default()
        };

        for identity in &roster {
            match self.principals.upsert_from_external(identity).await {
                Ok(true) => report.created_users += 1,
                Ok(false) => report.updated_users += 1,
                Err(err) => report.errors.push(format!("{}: {err}", identity.username)),
            }
        }

        let external_ids: std::collections::HashSet<&str> =
            roster.iter().map(|identity| identity.user_id.as_str()).collect();
        for principal in &local_before {
            if principal.is_active && !external_ids.contains(principal.user_id.as_str()) {
                match self.principals.deactivate(&principal.user_id).await {
                    Ok(()) => report.deactivated_users += 1,
                    Err(err) => report.errors.push(format!("{}: {err}", principal.username)),
                }
            }
        }

        Ok(report)
    }

    /// Narrower reconciliation for a single user, looked up by email (spec
    /// §6 `POST /admin/users/sync-by-email`).
    pub async fn sync_user_by_email(&self, email: &str) -> Result<UserSyncReport, AuthError> {
        let external = self
            .external
            .as_ref()
            .ok_or(AuthError::ExternalProviderUnavailable)?;
        let mut report = UserSyncReport::default();
        match external.fetch_by_email(email).await? {
            Some(identity) => {
                report.total_external_users = 1;
                match self.principals.upsert_from_external(&identity).await {
                    Ok(true) => report.created_users += 1,
                    Ok(false) => report.updated_users += 1,
                    Err(err) => report.errors.push(format!("{}: {err}", identity.username)),
                }
            }
            None => {
                if let Some(principal) = self.principals.find_by_email(email).await? {
                    if principal.is_active {
                        self.principals.deactivate(&principal.user_id).await?;
                        report.deactivated_users += 1;
                    }
                } else {
                    report.errors.push(format!("{email}: not found locally or externally"));
                }
            }
        }
        Ok(report)
    }
}
