//! Access-token minting and verification (spec §4.C3).
//!
//! No file in the corpus mints JWTs; the claim shape follows the original
//! Python's `jwt_handler.py` payload plus the explicit `iss`/`aud`/`jti`
//! fields spec'd for this service. `jsonwebtoken::Validation` is
//! constructed with a single allowed algorithm, which is the idiomatic
//! Rust way to forbid `alg` confusion attacks (the crate validates the
//! token's header `alg` against exactly this set).

use std::time::Duration;

use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};

use crate::{error::AuthError, principal::Principal, role::Role};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub user_id: String,
    pub username: String,
    pub role: Role,
    pub jti: String,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

#[derive(Clone)]
pub struct JwtConfig {
    pub secret: Secret<String>,
    pub issuer: String,
    pub audience: String,
    pub access_token_ttl: Duration,
}

#[derive(Clone)]
pub struct TokenService {
    config: JwtConfig,
}

impl TokenService {
    pub fn new(config: JwtConfig) -> Self {
        Self { config }
    }

    pub fn mint_access_token(&self, principal: &Principal) -> Result<String, AuthError> {
        let now = chrono::Utc::now().timestamp();
        let exp = now + self.config.access_token_ttl.as_secs() as i64;
        let claims = Claims {
            sub: principal.user_id.clone(),
            user_id: principal.user_id.clone(),
            username: principal.username.clone(),
            role: principal.role,
            jti: uuid::Uuid::new_v4().to_string(),
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
            iat: now,
            nbf: now,
            exp,
        };
        let header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256);
        let key = jsonwebtoken::EncodingKey::from_secret(self.config.secret.expose_secret().as_bytes());
        Ok(jsonwebtoken::encode(&header, &claims, &key)?)
    }

    pub fn verify_access_token(&self, token: &str) -> Result<Claims, AuthError> {
        let key = jsonwebtoken::DecodingKey::from_secret(self.config.secret.expose_secret().as_bytes());
        let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.set_issuer(&[&self.config.issuer]);
        validation.set_audience(&[&self.config.audience]);
        let data = jsonwebtoken::decode::<Claims>(token, &key, &validation)
            .map_err(|_| AuthError::AccessTokenInvalid)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> TokenService {
        TokenService::new(JwtConfig {
            secret: Secret::new("test-secret-value-at-least-16b".to_string()),
            issuer: "flowise-proxy-service".to_string(),
            audience: "flowise-api".to_string(),
            access_token_ttl: Duration::from_secs(3600),
        })
    }

    fn principal() -> Principal {
        Principal {
            user_id: "u1".to_string(),
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            role: Role::EndUser,
            is_active: true,
            credits: 10,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn mint_then_verify_roundtrips() {
        let svc = service();
        let token = svc.mint_access_token(&principal()).unwrap();
        let claims = svc.verify_access_token(&token).unwrap();
        assert_eq!(claims.user_id, "u1");
        assert_eq!(claims.role, Role::EndUser);
        assert_eq!(claims.iss, "flowise-proxy-service");
    }

    #[test]
    fn rejects_token_with_wrong_audience() {
        let svc = service();
        let token = svc.mint_access_token(&principal()).unwrap();
        let other = TokenService::new(JwtConfig {
            secret: Secret::new("test-secret-value-at-least-16b".to_string()),
            issuer: "flowise-proxy-service".to_string(),
            audience: "some-other-api".to_string(),
            access_token_ttl: Duration::from_secs(3600),
        });
        assert!(other.verify_access_token(&token).is_err());
    }

    #[test]
    fn rejects_tampered_signature() {
        let svc = service();
        let mut token = svc.mint_access_token(&principal()).unwrap();
        token.push_str("tamper");
        assert!(svc.verify_access_token(&token).is_err());
    }
}
