//! Liveness endpoint.

use axum::Json;
use serde_json::{json, Value};

/// `GET /health`. Public; answers as long as the process serves requests.
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
