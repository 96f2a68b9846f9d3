use axum::response::Json;
use serde_json::{json, Value};

pub async fn health_check() -> Json<Value> {
    Json(json!({
        "service": "entigraph-server",
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
