//! Shared application state (spec §4.C4/§4.C10), grounded on the teacher's
//! `gateway::state::GatewayState` + `AppState` split: one `Arc`-wrapped state
//! object handed to every route, with `FromRef` impls so extractors only
//! borrow the piece they need.

use std::sync::Arc;

use axum::extract::FromRef;
use flowise_proxy_accounting::{AccountingBackend, LocalAccounting, RemoteAccounting};
use flowise_proxy_auth::{AuthService, TokenService};
use flowise_proxy_chatflows::ChatflowRegistry;
use flowise_proxy_relay::StreamingRelay;
use flowise_proxy_sessions::SessionStore;
use flowise_proxy_uploads::UploadStore;

/// Which ledger owns credit balances (spec §4.C6 — config-driven selection).
#[derive(Clone)]
pub enum AccountingMode {
    Local(Arc<LocalAccounting>),
    /// Carries the unscoped backend; each request builds its own
    /// token-scoped view via [`AccountingMode::scoped_for`].
    Remote(Arc<RemoteAccounting>),
}

impl AccountingMode {
    /// The backend `StreamingRelay` should use for one request. For the
    /// local ledger this is just a clone of the shared backend; for the
    /// remote ledger it's a fresh view scoped to the caller's own bearer
    /// token, since the upstream accounting service authorizes by token,
    /// not by a service credential this proxy would otherwise have to hold.
    pub fn scoped_for(&self, access_token: &str) -> Arc<dyn AccountingBackend> {
        match self {
            AccountingMode::Local(local) => local.clone() as Arc<dyn AccountingBackend>,
            AccountingMode::Remote(remote) => Arc::new(remote.clone().scoped(access_token)),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub tokens: Arc<TokenService>,
    pub auth: Arc<AuthService>,
    pub chatflows: ChatflowRegistry,
    pub uploads: UploadStore,
    pub sessions: SessionStore,
    pub relay: StreamingRelay,
    pub accounting: AccountingMode,
    pub max_upload_bytes: u64,
}

impl FromRef<AppState> for Arc<TokenService> {
    fn from_ref(state: &AppState) -> Self {
        state.tokens.clone()
    }
}
