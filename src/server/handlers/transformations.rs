use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;
use uuid::Uuid;

use crate::server::app::AppState;
use crate::services::TransformationService;
use crate::transformations::Node;

use super::error_response;

#[derive(Debug, Deserialize)]
pub struct CreateTransformationRequest {
    pub organization_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub nodes: Vec<Node>,
}

#[derive(Debug, Deserialize)]
pub struct ListTransformationsQuery {
    pub organization_id: Uuid,
}

pub async fn create_transformation(
    State(state): State<AppState>,
    Json(request): Json<CreateTransformationRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "transformation name is required"})),
        ));
    }
    let service = TransformationService::new(state.db.clone());
    match service
        .create(request.organization_id, name, request.description, request.nodes)
        .await
    {
        Ok(transformation) => Ok((StatusCode::CREATED, Json(transformation))),
        Err(err) => Err(error_response(err)),
    }
}

pub async fn list_transformations(
    State(state): State<AppState>,
    Query(query): Query<ListTransformationsQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let service = TransformationService::new(state.db.clone());
    match service.list(query.organization_id).await {
        Ok(transformations) => Ok(Json(transformations)),
        Err(err) => {
            error!("Failed to list transformations: {:#}", err);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub async fn get_transformation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    let service = TransformationService::new(state.db.clone());
    match service.get(id).await {
        Ok(Some(transformation)) => Ok(Json(transformation)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(err) => {
            error!("Failed to get transformation: {:#}", err);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
