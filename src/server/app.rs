use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use sea_orm::DatabaseConnection;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

use crate::services::ExportService;

use super::handlers::{entities, exports, health, organizations, schemas, transformations};

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub export: ExportService,
}

pub async fn create_app(
    db: DatabaseConnection,
    export: ExportService,
    cors_origin: Option<&str>,
) -> Result<Router> {
    let state = AppState { db, export };

    let cors = match cors_origin {
        Some(origin) if origin != "*" => CorsLayer::new()
            .allow_origin(origin.parse::<axum::http::HeaderValue>()?)
            .allow_methods(Any)
            .allow_headers(Any),
        _ => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    };

    let app = Router::new()
        // Health check endpoint
        .route("/health", get(health::health_check))
        // API v1 routes
        .nest("/api/v1", api_v1_routes())
        // Add middleware
        .layer(ServiceBuilder::new().layer(cors))
        .with_state(state);

    Ok(app)
}

fn api_v1_routes() -> Router<AppState> {
    Router::new()
        // Organization routes
        .route("/organizations", get(organizations::list_organizations))
        .route("/organizations", post(organizations::create_organization))
        .route("/organizations/:id", get(organizations::get_organization))
        // Schema routes
        .route("/schemas", get(schemas::list_schemas))
        .route("/schemas", post(schemas::create_schema))
        .route("/schemas/:id", get(schemas::get_schema))
        // Entity routes
        .route("/entities", get(entities::list_entities))
        .route("/entities", post(entities::create_entity))
        .route("/entities/:id", get(entities::get_entity))
        // Transformation routes
        .route("/transformations", get(transformations::list_transformations))
        .route("/transformations", post(transformations::create_transformation))
        .route("/transformations/:id", get(transformations::get_transformation))
        // Export job routes
        .route("/exports/entity-type", post(exports::queue_entity_type_export))
        .route("/exports/transformation", post(exports::queue_transformation_export))
        .route("/exports", get(exports::list_export_jobs))
        .route("/exports/:id", get(exports::get_export_job))
        .route("/exports/:id/cancel", post(exports::cancel_export_job))
        .route("/exports/:id/logs", get(exports::list_export_logs))
        .route("/exports/:id/download-url", get(exports::get_download_url))
        .route("/exports/:id/download", get(exports::download_export_file))
}
