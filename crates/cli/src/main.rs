//! Process entrypoint: load configuration, bootstrap the document store,
//! wire every component into one `AppState`, and serve the HTTP surface.
//!
//! Grounded on the teacher's `crates/cli/src/main.rs` shape (clap-parsed
//! CLI, `init_telemetry`, `#[tokio::main] async fn main`), trimmed to this
//! service's much smaller surface: there is no agent/channel/skill/sandbox
//! subcommand tree here, just the one long-running server process plus a
//! one-shot chatflow sync for operators who don't want to wait for the
//! background interval.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use flowise_proxy_accounting::{LocalAccounting, RemoteAccounting};
use flowise_proxy_auth::{
    AuthService, HttpExternalIdentityProvider, JwtConfig, PrincipalRepo, RefreshConfig,
    RefreshTokenRepo, TokenService,
};
use flowise_proxy_chatflows::{ChatflowRegistry, HttpUpstreamCatalog};
use flowise_proxy_config::Settings;
use flowise_proxy_gateway::{build_router, AccountingMode, AppState};
use flowise_proxy_relay::{HttpUpstreamPredictClient, StreamingRelay};
use flowise_proxy_sessions::SessionStore;
use flowise_proxy_store::{blob::BlobBucket, DocumentStore};
use flowise_proxy_uploads::UploadStore;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "flowise-proxy", about = "Multi-tenant authenticating proxy for a chatflow engine")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (default when no subcommand is given).
    Serve,
    /// Run one chatflow sync against the upstream catalog and exit.
    SyncChatflows,
}

fn init_telemetry(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry.with(fmt::layer().json().with_target(true).with_thread_ids(false)).init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_thread_ids(false))
            .init();
    }
}

struct Components {
    chatflows: ChatflowRegistry,
    state: AppState,
}

async fn build_components(settings: &Settings) -> anyhow::Result<Components> {
    let store = DocumentStore::connect(&settings.store.url).await?;
    let blob_bucket = BlobBucket::new(settings.store.blob_dir.clone());

    let principals = PrincipalRepo::new(store.clone());
    let tokens = TokenService::new(JwtConfig {
        secret: settings.jwt.secret.clone(),
        issuer: settings.jwt.issuer.clone(),
        audience: settings.jwt.audience.clone(),
        access_token_ttl: settings.jwt.access_token_ttl,
    });
    let refresh_tokens = RefreshTokenRepo::new(
        store.clone(),
        RefreshConfig { ttl: settings.jwt.refresh_token_ttl },
    );
    let external = settings
        .external_auth_url
        .clone()
        .map(|url| Arc::new(HttpExternalIdentityProvider::new(url)) as Arc<dyn flowise_proxy_auth::ExternalIdentityProvider>);
    let auth = Arc::new(AuthService::new(principals, tokens.clone(), refresh_tokens, external));

    let upstream_catalog = Arc::new(HttpUpstreamCatalog::new(
        settings.upstream.api_url.clone(),
        settings.upstream.api_key.clone(),
    ));
    let chatflows = ChatflowRegistry::new(store.clone(), upstream_catalog);

    let accounting = if let Some(accounting_url) = settings.accounting_service_url.clone() {
        AccountingMode::Remote(Arc::new(RemoteAccounting::new(accounting_url, store.clone())))
    } else {
        AccountingMode::Local(Arc::new(LocalAccounting::new(store.clone())))
    };

    let uploads = UploadStore::new(store.clone(), blob_bucket, settings.max_upload_bytes);
    let sessions = SessionStore::new(store.clone(), uploads.clone());

    let upstream_predict = Arc::new(HttpUpstreamPredictClient::new(
        settings.upstream.api_url.clone(),
        settings.upstream.api_key.clone(),
        settings.upstream.connect_timeout,
    )?);
    let relay = StreamingRelay::new(
        chatflows.clone(),
        accounting.scoped_for(""),
        sessions.clone(),
        uploads.clone(),
        upstream_predict,
        settings.upstream.idle_timeout,
        settings.upstream.max_stream_duration,
    );

    let state = AppState {
        tokens: Arc::new(tokens),
        auth,
        chatflows: chatflows.clone(),
        uploads,
        sessions,
        relay,
        accounting,
        max_upload_bytes: settings.max_upload_bytes,
    };

    Ok(Components { chatflows, state })
}

/// Background reconciliation against the upstream catalog (spec §5): keeps
/// the local chatflow mirror current without the caller having to wait on
/// it inline. Errors are logged and the loop keeps running — a transient
/// upstream outage should not kill the whole process.
fn spawn_sync_task(chatflows: ChatflowRegistry, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // first tick fires immediately; skip so we don't sync twice at startup
        loop {
            ticker.tick().await;
            match chatflows.sync().await {
                Ok(report) => info!(
                    created = report.created,
                    updated = report.updated,
                    deleted = report.deleted,
                    errors = report.errors,
                    "chatflow sync complete"
                ),
                Err(err) => tracing::warn!(error = %err, "chatflow sync failed"),
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    let settings = Settings::load()?;
    info!(version = env!("CARGO_PKG_VERSION"), "flowise-proxy-service starting");

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::SyncChatflows => {
            let components = build_components(&settings).await?;
            let report = components.chatflows.sync().await?;
            info!(
                created = report.created,
                updated = report.updated,
                deleted = report.deleted,
                errors = report.errors,
                "one-shot chatflow sync complete"
            );
            Ok(())
        }
        Commands::Serve => {
            let components = build_components(&settings).await?;
            spawn_sync_task(components.chatflows.clone(), settings.chatflow_sync_interval);

            let router = build_router(components.state, &settings.server.cors_origin);
            let addr = format!("{}:{}", settings.server.host, settings.server.port);
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!(%addr, "listening");
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
            )
            .await?;
            Ok(())
        }
    }
}
