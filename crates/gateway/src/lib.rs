//! HTTP surface (spec §4.C10): error taxonomy, route handlers, and router
//! assembly over the `AppState` every other crate's component is wired
//! into. Grounded on the teacher's `gateway` crate split between
//! `state.rs`/`server.rs`/per-concern route modules.

pub mod error;
mod routes;
pub mod server;
pub mod state;

pub use error::ApiError;
pub use server::build_router;
pub use state::{AccountingMode, AppState};
