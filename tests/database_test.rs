//! Database functionality tests
//!
//! Tests for migrations, store services, and conditional job transitions.

use anyhow::Result;
use entigraph::database::setup_database;
use entigraph::entity::{EntityFilter, PropertyFilter};
use entigraph::export::{ExportJobStatus, NewExportJob, NewExportLog};
use entigraph::schema::{FieldDefinition, FieldType};
use entigraph::services::{
    EntityService, ExportJobService, OrganizationService, SchemaService, TransformationService,
};
use entigraph::store::{EntityStore, ExportJobStore, ExportResult};
use sea_orm::{Database, DatabaseConnection};
use serde_json::json;
use tempfile::NamedTempFile;
use uuid::Uuid;

/// Create a test database connection with migrations
async fn setup_test_db() -> Result<(DatabaseConnection, NamedTempFile)> {
    let temp_file = NamedTempFile::new()?;
    let db_url = format!("sqlite://{}?mode=rwc", temp_file.path().display());

    let db = Database::connect(&db_url).await?;
    setup_database(&db).await?;

    Ok((db, temp_file))
}

fn string_field(name: &str) -> FieldDefinition {
    FieldDefinition {
        name: name.to_string(),
        field_type: FieldType::String,
        required: false,
        description: None,
    }
}

fn object(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    serde_json::from_value(value).expect("object literal")
}

#[tokio::test]
async fn test_migrations_create_empty_tables() -> Result<()> {
    let (db, _temp_file) = setup_test_db().await?;

    let organizations = OrganizationService::new(db.clone()).list().await?;
    assert_eq!(organizations.len(), 0);

    let jobs = ExportJobService::new(db.clone())
        .list(None, &[], 10, 0)
        .await?;
    assert_eq!(jobs.len(), 0);

    Ok(())
}

#[tokio::test]
async fn test_schema_and_entity_crud() -> Result<()> {
    let (db, _temp_file) = setup_test_db().await?;

    let org = OrganizationService::new(db.clone())
        .create("Acme Water")
        .await?;

    let schemas = SchemaService::new(db.clone());
    let schema = schemas
        .create(
            org.id,
            "Facility",
            Some("Water facilities".to_string()),
            vec![string_field("name"), string_field("status")],
        )
        .await?;
    assert_eq!(schema.version, 1);

    let found = schemas
        .find_by_name(org.id, "Facility")
        .await?
        .expect("schema by name");
    assert_eq!(found.id, schema.id);
    assert_eq!(found.field_names(), vec!["name", "status"]);

    let entities = EntityService::new(db.clone());
    let created = entities
        .create(
            org.id,
            "Facility",
            object(json!({"name": "Pump House", "status": "Active"})),
        )
        .await?;
    assert_eq!(created.version, 1);
    assert_eq!(created.schema_id, schema.id);

    // Optimistic update: stale version loses.
    let updated = entities
        .update(created.id, 1, object(json!({"name": "Pump House", "status": "Retired"})))
        .await?
        .expect("update with current version");
    assert_eq!(updated.version, 2);
    let stale = entities
        .update(created.id, 1, object(json!({"name": "x"})))
        .await?;
    assert!(stale.is_none());

    Ok(())
}

#[tokio::test]
async fn test_entity_listing_filters_and_pages() -> Result<()> {
    let (db, _temp_file) = setup_test_db().await?;
    let org = OrganizationService::new(db.clone()).create("Acme").await?;
    SchemaService::new(db.clone())
        .create(org.id, "Facility", None, vec![string_field("name"), string_field("status")])
        .await?;

    let entities = EntityService::new(db.clone());
    for i in 0..10 {
        let status = if i % 2 == 0 { "Active" } else { "Retired" };
        entities
            .create(
                org.id,
                "Facility",
                object(json!({"name": format!("f{i}"), "status": status})),
            )
            .await?;
    }

    let filter = EntityFilter {
        entity_type: "Facility".to_string(),
        property_filters: vec![PropertyFilter::equals("status", "Active")],
    };
    let (page, total) = entities.list(org.id, &filter, 3, 0).await?;
    assert_eq!(total, 5);
    assert_eq!(page.len(), 3);

    let (rest, total) = entities.list(org.id, &filter, 3, 3).await?;
    assert_eq!(total, 5);
    assert_eq!(rest.len(), 2);

    Ok(())
}

#[tokio::test]
async fn test_transformation_create_rejects_invalid_graphs() -> Result<()> {
    let (db, _temp_file) = setup_test_db().await?;
    let org = OrganizationService::new(db.clone()).create("Acme").await?;
    let service = TransformationService::new(db.clone());

    use entigraph::transformations::{FilterConfig, LoadConfig, Node, NodeKind};

    let load = Node::new(
        NodeKind::Load(LoadConfig {
            alias: "facility".to_string(),
            entity_type: "Facility".to_string(),
            filters: vec![],
        }),
        vec![],
    );
    let valid = service
        .create(org.id, "loader", None, vec![load.clone()])
        .await;
    assert!(valid.is_ok());

    let dangling = Node::new(
        NodeKind::Filter(FilterConfig {
            alias: "facility".to_string(),
            filters: vec![],
        }),
        vec![Uuid::new_v4()],
    );
    let invalid = service.create(org.id, "broken", None, vec![dangling]).await;
    assert!(invalid.is_err());

    let stored = service
        .get(valid.expect("valid transformation").id)
        .await?
        .expect("stored transformation");
    assert_eq!(stored.nodes.len(), 1);
    assert_eq!(stored.nodes[0].id, load.id);

    Ok(())
}

#[tokio::test]
async fn test_export_job_lifecycle_transitions_are_conditional() -> Result<()> {
    let (db, _temp_file) = setup_test_db().await?;
    let org = OrganizationService::new(db.clone()).create("Acme").await?;
    let jobs = ExportJobService::new(db.clone());

    let job = jobs
        .create(NewExportJob {
            organization_id: org.id,
            entity_type: Some("Facility".to_string()),
            rows_requested: 42,
            ..Default::default()
        })
        .await?;
    assert_eq!(job.status, ExportJobStatus::Pending);
    assert_eq!(job.rows_requested, 42);

    // Exactly one claim wins.
    assert!(jobs.mark_running(job.id).await?);
    assert!(!jobs.mark_running(job.id).await?);

    jobs.update_progress(job.id, 10, 2048, Some(42)).await?;
    let running = jobs.get_by_id(job.id).await?.expect("job exists");
    assert_eq!(running.status, ExportJobStatus::Running);
    assert_eq!(running.rows_exported, 10);
    assert_eq!(running.bytes_written, 2048);

    assert!(
        jobs.mark_completed(
            job.id,
            ExportResult {
                rows_exported: 42,
                bytes_written: 4096,
                file_path: Some("/tmp/export.csv".to_string()),
                file_mime_type: Some("text/csv".to_string()),
                file_byte_size: Some(4096),
            },
        )
        .await?
    );
    let completed = jobs.get_by_id(job.id).await?.expect("job exists");
    assert_eq!(completed.status, ExportJobStatus::Completed);
    assert!(completed.completed_at.is_some());

    // Terminal states are final: no further transition lands.
    assert!(!jobs.mark_cancelled(job.id, "too late").await?);
    assert!(!jobs.mark_failed(job.id, "too late").await?);
    let unchanged = jobs.get_by_id(job.id).await?.expect("job exists");
    assert_eq!(unchanged.status, ExportJobStatus::Completed);

    Ok(())
}

#[tokio::test]
async fn test_cancel_from_pending_and_log_listing() -> Result<()> {
    let (db, _temp_file) = setup_test_db().await?;
    let org = OrganizationService::new(db.clone()).create("Acme").await?;
    let jobs = ExportJobService::new(db.clone());

    let job = jobs
        .create(NewExportJob {
            organization_id: org.id,
            entity_type: Some("Facility".to_string()),
            ..Default::default()
        })
        .await?;

    assert!(jobs.mark_cancelled(job.id, "cancelled by user").await?);
    let cancelled = jobs.get_by_id(job.id).await?.expect("job exists");
    assert_eq!(cancelled.status, ExportJobStatus::Cancelled);
    // The losing claim observes the cancel.
    assert!(!jobs.mark_running(job.id).await?);

    jobs.record_log(NewExportLog {
        export_job_id: job.id,
        organization_id: org.id,
        row_identifier: Some("17".to_string()),
        error_message: "row failed".to_string(),
    })
    .await?;
    let logs = jobs.list_logs(job.id, 10, 0).await?;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].row_identifier.as_deref(), Some("17"));
    assert_eq!(logs[0].error_message, "row failed");

    Ok(())
}

#[tokio::test]
async fn test_job_listing_filters_by_org_and_status() -> Result<()> {
    let (db, _temp_file) = setup_test_db().await?;
    let orgs = OrganizationService::new(db.clone());
    let first = orgs.create("First").await?;
    let second = orgs.create("Second").await?;
    let jobs = ExportJobService::new(db.clone());

    for org in [&first, &second] {
        let job = jobs
            .create(NewExportJob {
                organization_id: org.id,
                entity_type: Some("Facility".to_string()),
                ..Default::default()
            })
            .await?;
        if org.id == second.id {
            jobs.mark_running(job.id).await?;
        }
    }

    let all = jobs.list(None, &[], 10, 0).await?;
    assert_eq!(all.len(), 2);

    let first_only = jobs.list(Some(first.id), &[], 10, 0).await?;
    assert_eq!(first_only.len(), 1);
    assert_eq!(first_only[0].organization_id, first.id);

    let running = jobs
        .list(None, &[ExportJobStatus::Running], 10, 0)
        .await?;
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].organization_id, second.id);

    Ok(())
}
