//! Unauthenticated liveness probe (SPEC_FULL.md §10 — not in the original
//! distilled spec, added as the ambient concern every load balancer needs).

use axum::Json;
use serde_json::{json, Value};

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
