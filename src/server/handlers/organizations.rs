use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;
use uuid::Uuid;

use crate::server::app::AppState;
use crate::services::OrganizationService;

#[derive(Debug, Deserialize)]
pub struct CreateOrganizationRequest {
    pub name: String,
}

pub async fn create_organization(
    State(state): State<AppState>,
    Json(request): Json<CreateOrganizationRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "organization name is required"})),
        ));
    }
    let service = OrganizationService::new(state.db.clone());
    match service.create(name).await {
        Ok(organization) => Ok((StatusCode::CREATED, Json(organization))),
        Err(err) => {
            error!("Failed to create organization: {:#}", err);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "failed to create organization"})),
            ))
        }
    }
}

pub async fn list_organizations(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, StatusCode> {
    let service = OrganizationService::new(state.db.clone());
    match service.list().await {
        Ok(organizations) => Ok(Json(organizations)),
        Err(err) => {
            error!("Failed to list organizations: {:#}", err);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub async fn get_organization(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    let service = OrganizationService::new(state.db.clone());
    match service.get(id).await {
        Ok(Some(organization)) => Ok(Json(organization)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(err) => {
            error!("Failed to get organization: {:#}", err);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
