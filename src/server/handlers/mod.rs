pub mod entities;
pub mod exports;
pub mod health;
pub mod organizations;
pub mod schemas;
pub mod transformations;

use axum::http::StatusCode;
use axum::response::Json;
use serde_json::{json, Value};

use crate::errors::ServiceError;

/// Maps a service error onto its HTTP status with a JSON error body.
pub fn error_response(err: ServiceError) -> (StatusCode, Json<Value>) {
    (err.status_code(), Json(json!({ "error": err.to_string() })))
}
