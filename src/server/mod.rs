pub mod app;
pub mod handlers;

use clap::Subcommand;

#[derive(Subcommand, Debug)]
pub enum MigrateDirection {
    Up,
    Down,
    Fresh,
}

use anyhow::Result;
use sea_orm_migration::prelude::*;
use tracing::info;

use crate::config::AppConfig;
use crate::database::{connection::*, migrations::Migrator};
use crate::services::ExportService;

pub async fn start_server(config: AppConfig) -> Result<()> {
    let database_url = get_database_url(Some(&config.database_path));
    let db = establish_connection(&database_url).await?;

    // Run migrations
    Migrator::up(&db, None).await?;
    info!("Database migrations completed");

    let export = ExportService::new(db.clone())
        .with_export_directory(&config.export_directory)
        .with_page_size(config.export_page_size)
        .with_job_timeout(config.job_timeout())
        .with_download_token_ttl(config.download_token_ttl());

    let app = app::create_app(db, export, config.cors_origin.as_deref()).await?;

    log_routes();

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server running on http://0.0.0.0:{}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}

fn log_routes() {
    info!("API Endpoints:");
    info!("  /health                         - Health check");
    info!("  /api/v1/organizations           - Organization CRUD");
    info!("  /api/v1/schemas                 - Entity schema CRUD");
    info!("  /api/v1/entities                - Entity CRUD and listing");
    info!("  /api/v1/transformations         - Transformation definitions");
    info!("  /api/v1/exports                 - Export jobs (queue, status, cancel, download)");
}

pub async fn migrate_database(database_path: &str, direction: MigrateDirection) -> Result<()> {
    let database_url = get_database_url(Some(database_path));
    let db = establish_connection(&database_url).await?;

    match direction {
        MigrateDirection::Up => {
            info!("Running migrations up");
            Migrator::up(&db, None).await?;
        }
        MigrateDirection::Down => {
            info!("Running migrations down");
            Migrator::down(&db, None).await?;
        }
        MigrateDirection::Fresh => {
            info!("Running fresh migrations (down then up)");
            Migrator::down(&db, None).await?;
            Migrator::up(&db, None).await?;
        }
    }

    info!("Database migration completed");
    Ok(())
}
