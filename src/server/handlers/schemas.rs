use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;
use uuid::Uuid;

use crate::schema::FieldDefinition;
use crate::server::app::AppState;
use crate::services::SchemaService;

#[derive(Debug, Deserialize)]
pub struct CreateSchemaRequest {
    pub organization_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub fields: Vec<FieldDefinition>,
}

#[derive(Debug, Deserialize)]
pub struct ListSchemasQuery {
    pub organization_id: Uuid,
}

pub async fn create_schema(
    State(state): State<AppState>,
    Json(request): Json<CreateSchemaRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "schema name is required"})),
        ));
    }
    if request.fields.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "schema requires at least one field"})),
        ));
    }
    let service = SchemaService::new(state.db.clone());
    match service
        .create(request.organization_id, name, request.description, request.fields)
        .await
    {
        Ok(schema) => Ok((StatusCode::CREATED, Json(schema))),
        Err(err) => {
            error!("Failed to create schema: {:#}", err);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "failed to create schema"})),
            ))
        }
    }
}

pub async fn list_schemas(
    State(state): State<AppState>,
    Query(query): Query<ListSchemasQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let service = SchemaService::new(state.db.clone());
    match service.list(query.organization_id).await {
        Ok(schemas) => Ok(Json(schemas)),
        Err(err) => {
            error!("Failed to list schemas: {:#}", err);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub async fn get_schema(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    let service = SchemaService::new(state.db.clone());
    match service.get(id).await {
        Ok(Some(schema)) => Ok(Json(schema)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(err) => {
            error!("Failed to get schema: {:#}", err);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
