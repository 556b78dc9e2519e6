//! Plain HTTP handlers.

use axum::Json;
use serde_json::{json, Value};

/// Liveness probe, served on `/`, `/health` and `/ping`.
pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}
