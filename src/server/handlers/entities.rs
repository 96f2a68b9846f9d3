use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::error;
use uuid::Uuid;

use crate::entity::{Entity, EntityFilter, PropertyFilter};
use crate::server::app::AppState;
use crate::services::EntityService;
use crate::store::EntityStore;

#[derive(Debug, Deserialize)]
pub struct CreateEntityRequest {
    pub organization_id: Uuid,
    pub entity_type: String,
    pub properties: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct ListEntitiesQuery {
    pub organization_id: Uuid,
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
    /// JSON-encoded property filter list, e.g.
    /// `[{"key":"status","value":"Active"}]`.
    #[serde(default)]
    pub filters: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EntityPageResponse {
    pub entities: Vec<Entity>,
    pub total_count: i64,
}

pub async fn create_entity(
    State(state): State<AppState>,
    Json(request): Json<CreateEntityRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    let entity_type = request.entity_type.trim();
    if entity_type.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "entity type is required"})),
        ));
    }
    let service = EntityService::new(state.db.clone());
    match service
        .create(request.organization_id, entity_type, request.properties)
        .await
    {
        Ok(entity) => Ok((StatusCode::CREATED, Json(entity))),
        Err(err) => {
            error!("Failed to create entity: {:#}", err);
            Err((
                StatusCode::BAD_REQUEST,
                Json(json!({"error": err.to_string()})),
            ))
        }
    }
}

pub async fn list_entities(
    State(state): State<AppState>,
    Query(query): Query<ListEntitiesQuery>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    let property_filters: Vec<PropertyFilter> = match query.filters.as_deref() {
        Some(raw) if !raw.trim().is_empty() => serde_json::from_str(raw).map_err(|err| {
            (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": format!("invalid filters: {}", err)})),
            )
        })?,
        _ => Vec::new(),
    };
    let filter = EntityFilter {
        entity_type: query.entity_type.unwrap_or_default(),
        property_filters,
    };
    let service = EntityService::new(state.db.clone());
    match service
        .list(
            query.organization_id,
            &filter,
            query.limit.unwrap_or(50),
            query.offset.unwrap_or(0),
        )
        .await
    {
        Ok((entities, total_count)) => Ok(Json(EntityPageResponse {
            entities,
            total_count,
        })),
        Err(err) => {
            error!("Failed to list entities: {:#}", err);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "failed to list entities"})),
            ))
        }
    }
}

pub async fn get_entity(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    let service = EntityService::new(state.db.clone());
    match service.get(id).await {
        Ok(Some(entity)) => Ok(Json(entity)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(err) => {
            error!("Failed to get entity: {:#}", err);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
