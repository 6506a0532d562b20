//! Environment-driven configuration for the proxy.
//!
//! Settings are read once at startup from process environment (optionally
//! seeded from a `.env` file via `dotenvy`) and handed to every component as
//! an explicit dependency — no ambient global state.

use std::time::Duration;

use {anyhow::Context, secrecy::Secret};

/// JWT signing/verification settings. Algorithm is pinned to HS256; any
/// other configured value is a startup error (spec requires explicit
/// algorithm pinning to prevent `alg` confusion attacks).
#[derive(Clone)]
pub struct JwtSettings {
    pub secret: Secret<String>,
    pub issuer: String,
    pub audience: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
}

/// Upstream chatflow engine connection settings.
#[derive(Clone)]
pub struct UpstreamSettings {
    pub api_url: String,
    pub api_key: Option<Secret<String>>,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_stream_duration: Duration,
}

/// Document store connection settings.
#[derive(Clone)]
pub struct StoreSettings {
    /// `MONGODB_URL` in the spec's vocabulary; resolved to a SQLite DSN
    /// here (see SPEC_FULL.md §2 — no Mongo driver in the corpus).
    pub url: String,
    pub database_name: String,
    /// Directory backing the content-addressed blob bucket.
    pub blob_dir: std::path::PathBuf,
}

/// HTTP server bind settings.
#[derive(Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub cors_origin: String,
}

/// Top-level settings object, populated once at startup.
#[derive(Clone)]
pub struct Settings {
    pub jwt: JwtSettings,
    pub upstream: UpstreamSettings,
    pub store: StoreSettings,
    pub server: ServerSettings,
    pub external_auth_url: Option<String>,
    pub accounting_service_url: Option<String>,
    pub max_upload_bytes: u64,
    pub chatflow_sync_interval: Duration,
    pub debug: bool,
}

const DEFAULT_MAX_UPLOAD_BYTES: u64 = 25 * 1024 * 1024;

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn required(key: &str) -> anyhow::Result<String> {
    env_var(key).with_context(|| format!("missing required environment variable {key}"))
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_duration_secs(key: &str, default_secs: u64) -> Duration {
    Duration::from_secs(env_u64(key, default_secs))
}

impl Settings {
    /// Load settings from the process environment. Attempts to load a
    /// `.env` file first (ignored if absent — matches the teacher's
    /// `dotenvy::dotenv().ok()` idiom).
    pub fn load() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let algorithm = env_var("JWT_ALGORITHM").unwrap_or_else(|| "HS256".to_string());
        if algorithm != "HS256" {
            anyhow::bail!(
                "JWT_ALGORITHM must be HS256 (got {algorithm}) — algorithm pinning is not configurable"
            );
        }

        let jwt = JwtSettings {
            secret: Secret::new(required("JWT_SECRET_KEY")?),
            issuer: "flowise-proxy-service".to_string(),
            audience: "flowise-api".to_string(),
            access_token_ttl: Duration::from_secs(env_u64("JWT_EXPIRATION_HOURS", 1) * 3600),
            refresh_token_ttl: Duration::from_secs(
                env_u64("JWT_REFRESH_TOKEN_EXPIRE_DAYS", 14) * 86400,
            ),
        };

        let upstream = UpstreamSettings {
            api_url: required("FLOWISE_API_URL")?,
            api_key: env_var("FLOWISE_API_KEY").map(Secret::new),
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(120),
            max_stream_duration: env_duration_secs("MAX_STREAMING_DURATION", 600),
        };

        let store = StoreSettings {
            url: env_var("MONGODB_URL").unwrap_or_else(|| "sqlite://flowise-proxy.db".to_string()),
            database_name: env_var("MONGODB_DATABASE_NAME")
                .unwrap_or_else(|| "flowise_proxy".to_string()),
            blob_dir: env_var("BLOB_STORE_DIR")
                .map(std::path::PathBuf::from)
                .unwrap_or_else(|| std::path::PathBuf::from("./data/blobs")),
        };

        let server = ServerSettings {
            host: env_var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: env_var("PORT").and_then(|v| v.parse().ok()).unwrap_or(8000),
            cors_origin: env_var("CORS_ORIGIN").unwrap_or_else(|| "*".to_string()),
        };

        let debug = env_var("DEBUG")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        if !debug && jwt.secret.expose_secret_len() < 16 {
            anyhow::bail!("JWT_SECRET_KEY is too short for production use (need >= 16 bytes)");
        }

        Ok(Settings {
            jwt,
            upstream,
            store,
            server,
            external_auth_url: env_var("EXTERNAL_AUTH_URL"),
            accounting_service_url: env_var("ACCOUNTING_SERVICE_URL"),
            max_upload_bytes: env_u64("MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES),
            chatflow_sync_interval: env_duration_secs("CHATFLOW_SYNC_INTERVAL_SECS", 300),
            debug,
        })
    }
}

trait SecretLen {
    fn expose_secret_len(&self) -> usize;
}

impl SecretLen for Secret<String> {
    fn expose_secret_len(&self) -> usize {
        use secrecy::ExposeSecret;
        self.expose_secret().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(unsafe_code)]
    fn rejects_non_hs256_algorithm() {
        // SAFETY: test-only env mutation; this is the only test in the
        // crate that touches process env, so there's no cross-test race.
        unsafe {
            std::env::set_var("JWT_ALGORITHM", "RS256");
            std::env::set_var("JWT_SECRET_KEY", "a-long-enough-secret-value");
            std::env::set_var("FLOWISE_API_URL", "http://localhost:3000");
        }
        let result = Settings::load();
        unsafe {
            std::env::remove_var("JWT_ALGORITHM");
        }
        assert!(result.is_err());
    }
}
