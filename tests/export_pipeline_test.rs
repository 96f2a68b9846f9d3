//! End-to-end export pipeline tests over a real SQLite store: queue, worker
//! lifecycle, file contents, cancellation, and download tokens.

use std::time::Duration;

use anyhow::{anyhow, Result};
use entigraph::database::setup_database;
use entigraph::entity::PropertyFilter;
use entigraph::export::{ExportJobStatus, ExportJobType};
use entigraph::schema::{FieldDefinition, FieldType};
use entigraph::services::{
    EntityService, EntityTypeExportRequest, ExportService, OrganizationService, SchemaService,
    TransformationExportRequest, TransformationService,
};
use entigraph::transformations::{
    ExecutionOptions, LoadConfig, MaterializeConfig, MaterializeFieldMapping, MaterializeOutput,
    Node, NodeKind, SortConfig, SortDirection,
};
use sea_orm::{Database, DatabaseConnection};
use serde_json::json;
use tempfile::{NamedTempFile, TempDir};
use uuid::Uuid;

struct Harness {
    db: DatabaseConnection,
    export: ExportService,
    org_id: Uuid,
    _db_file: NamedTempFile,
    _export_dir: TempDir,
}

async fn setup(page_size: usize) -> Result<Harness> {
    let db_file = NamedTempFile::new()?;
    let db_url = format!("sqlite://{}?mode=rwc", db_file.path().display());
    let db = Database::connect(&db_url).await?;
    setup_database(&db).await?;

    let export_dir = TempDir::new()?;
    let export = ExportService::new(db.clone())
        .with_export_directory(export_dir.path())
        .with_page_size(page_size)
        .with_download_token_ttl(Duration::from_secs(60));

    let org = OrganizationService::new(db.clone()).create("Acme").await?;
    SchemaService::new(db.clone())
        .create(
            org.id,
            "Facility",
            None,
            vec![
                FieldDefinition {
                    name: "name".to_string(),
                    field_type: FieldType::String,
                    required: true,
                    description: None,
                },
                FieldDefinition {
                    name: "status".to_string(),
                    field_type: FieldType::String,
                    required: false,
                    description: None,
                },
            ],
        )
        .await?;

    Ok(Harness {
        db,
        export,
        org_id: org.id,
        _db_file: db_file,
        _export_dir: export_dir,
    })
}

async fn seed_facilities(harness: &Harness, count: usize) -> Result<()> {
    let entities = EntityService::new(harness.db.clone());
    for i in 0..count {
        let status = if i % 2 == 0 { "Active" } else { "Retired" };
        entities
            .create(
                harness.org_id,
                "Facility",
                serde_json::from_value(json!({
                    "name": format!("facility-{i:03}"),
                    "status": status,
                }))
                .expect("object literal"),
            )
            .await?;
    }
    Ok(())
}

async fn wait_for_terminal(
    export: &ExportService,
    job_id: Uuid,
) -> Result<entigraph::export::ExportJob> {
    for _ in 0..250 {
        let job = export.get_job(job_id).await.map_err(|e| anyhow!("{e}"))?;
        if job.status.is_terminal() {
            return Ok(job);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    Err(anyhow!("job {} never reached a terminal state", job_id))
}

#[tokio::test]
async fn entity_type_export_streams_all_pages_to_csv() -> Result<()> {
    let harness = setup(10).await?;
    seed_facilities(&harness, 25).await?;

    let job = harness
        .export
        .queue_entity_type_export(EntityTypeExportRequest {
            organization_id: harness.org_id,
            entity_type: "Facility".to_string(),
            filters: vec![],
        })
        .await
        .map_err(|e| anyhow!("{e}"))?;
    assert_eq!(job.status, ExportJobStatus::Pending);
    assert_eq!(job.job_type, ExportJobType::EntityType);
    assert_eq!(job.rows_requested, 25);

    let done = wait_for_terminal(&harness.export, job.id).await?;
    assert_eq!(done.status, ExportJobStatus::Completed, "error: {:?}", done.error_message);
    assert_eq!(done.rows_exported, 25);
    assert!(done.bytes_written > 0);
    assert_eq!(done.file_mime_type.as_deref(), Some("text/csv"));

    let path = done.file_path.clone().expect("file path");
    let content = std::fs::read_to_string(&path)?;
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 26);
    assert_eq!(lines[0], "name,status");
    // Store order is not asserted here; the row set must be complete.
    let mut rows: Vec<&str> = lines[1..].to_vec();
    rows.sort_unstable();
    assert_eq!(rows[0], "facility-000,Active");
    assert_eq!(rows[24], "facility-024,Active");
    assert!(rows.contains(&"facility-013,Retired"));

    assert_eq!(done.file_byte_size, Some(content.len() as i64));
    Ok(())
}

#[tokio::test]
async fn entity_type_export_applies_property_filters() -> Result<()> {
    let harness = setup(10).await?;
    seed_facilities(&harness, 20).await?;

    let job = harness
        .export
        .queue_entity_type_export(EntityTypeExportRequest {
            organization_id: harness.org_id,
            entity_type: "Facility".to_string(),
            filters: vec![PropertyFilter::equals("status", "Active")],
        })
        .await
        .map_err(|e| anyhow!("{e}"))?;
    assert_eq!(job.rows_requested, 10);

    let done = wait_for_terminal(&harness.export, job.id).await?;
    assert_eq!(done.status, ExportJobStatus::Completed);
    assert_eq!(done.rows_exported, 10);

    let content = std::fs::read_to_string(done.file_path.expect("file path"))?;
    assert!(content.lines().skip(1).all(|line| line.ends_with(",Active")));
    Ok(())
}

#[tokio::test]
async fn empty_entity_type_export_produces_header_only_file() -> Result<()> {
    let harness = setup(10).await?;

    let job = harness
        .export
        .queue_entity_type_export(EntityTypeExportRequest {
            organization_id: harness.org_id,
            entity_type: "Facility".to_string(),
            filters: vec![],
        })
        .await
        .map_err(|e| anyhow!("{e}"))?;

    let done = wait_for_terminal(&harness.export, job.id).await?;
    assert_eq!(done.status, ExportJobStatus::Completed);
    assert_eq!(done.rows_exported, 0);

    let content = std::fs::read_to_string(done.file_path.expect("file path"))?;
    assert_eq!(content, "name,status\n");
    Ok(())
}

fn export_transformation_nodes() -> Vec<Node> {
    let load = Node::new(
        NodeKind::Load(LoadConfig {
            alias: "facility".to_string(),
            entity_type: "Facility".to_string(),
            filters: vec![],
        }),
        vec![],
    );
    let sort = Node::new(
        NodeKind::Sort(SortConfig {
            alias: "facility".to_string(),
            field: "name".to_string(),
            direction: SortDirection::Asc,
        }),
        vec![load.id],
    );
    let materialize = Node::new(
        NodeKind::Materialize(MaterializeConfig {
            outputs: vec![MaterializeOutput {
                alias: "facility".to_string(),
                fields: vec![
                    MaterializeFieldMapping {
                        source_alias: String::new(),
                        source_field: "name".to_string(),
                        output_field: "name".to_string(),
                    },
                    MaterializeFieldMapping {
                        source_alias: String::new(),
                        source_field: "status".to_string(),
                        output_field: "status".to_string(),
                    },
                ],
            }],
        }),
        vec![sort.id],
    );
    vec![load, sort, materialize]
}

#[tokio::test]
async fn transformation_export_pages_through_the_executor() -> Result<()> {
    let harness = setup(25).await?;
    seed_facilities(&harness, 60).await?;

    let transformation = TransformationService::new(harness.db.clone())
        .create(harness.org_id, "facility export", None, export_transformation_nodes())
        .await
        .map_err(|e| anyhow!("{e}"))?;

    let job = harness
        .export
        .queue_transformation_export(TransformationExportRequest {
            organization_id: harness.org_id,
            transformation_id: transformation.id,
            filters: vec![],
            options: ExecutionOptions::default(),
        })
        .await
        .map_err(|e| anyhow!("{e}"))?;
    assert_eq!(job.job_type, ExportJobType::Transformation);
    assert!(job.transformation.is_some(), "definition snapshot stored on the job");

    let done = wait_for_terminal(&harness.export, job.id).await?;
    assert_eq!(done.status, ExportJobStatus::Completed, "error: {:?}", done.error_message);
    assert_eq!(done.rows_exported, 60);

    let content = std::fs::read_to_string(done.file_path.expect("file path"))?;
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 61);
    assert_eq!(lines[0], "facility.name,facility.status");
    // Sorted by name, complete, and in order.
    assert_eq!(lines[1], "facility-000,Active");
    assert_eq!(lines[60], "facility-059,Retired");
    Ok(())
}

#[tokio::test]
async fn transformation_export_honors_limit_and_offset() -> Result<()> {
    let harness = setup(25).await?;
    seed_facilities(&harness, 60).await?;

    let transformation = TransformationService::new(harness.db.clone())
        .create(harness.org_id, "windowed", None, export_transformation_nodes())
        .await
        .map_err(|e| anyhow!("{e}"))?;

    let job = harness
        .export
        .queue_transformation_export(TransformationExportRequest {
            organization_id: harness.org_id,
            transformation_id: transformation.id,
            filters: vec![],
            options: ExecutionOptions { limit: 10, offset: 50 },
        })
        .await
        .map_err(|e| anyhow!("{e}"))?;
    assert_eq!(job.rows_requested, 10);

    let done = wait_for_terminal(&harness.export, job.id).await?;
    assert_eq!(done.status, ExportJobStatus::Completed);
    assert_eq!(done.rows_exported, 10);

    let content = std::fs::read_to_string(done.file_path.expect("file path"))?;
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 11);
    assert_eq!(lines[1], "facility-050,Active");
    Ok(())
}

#[tokio::test]
async fn queued_jobs_keep_their_definition_snapshot() -> Result<()> {
    let harness = setup(25).await?;
    seed_facilities(&harness, 5).await?;

    let service = TransformationService::new(harness.db.clone());
    let transformation = service
        .create(harness.org_id, "snapshot", None, export_transformation_nodes())
        .await
        .map_err(|e| anyhow!("{e}"))?;

    let job = harness
        .export
        .queue_transformation_export(TransformationExportRequest {
            organization_id: harness.org_id,
            transformation_id: transformation.id,
            filters: vec![],
            options: ExecutionOptions::default(),
        })
        .await
        .map_err(|e| anyhow!("{e}"))?;

    let snapshot = job.transformation.expect("snapshot");
    assert_eq!(snapshot.id, transformation.id);
    assert_eq!(snapshot.nodes.len(), 3);
    Ok(())
}

#[tokio::test]
async fn transformation_without_materialize_fails_the_job() -> Result<()> {
    let harness = setup(25).await?;
    seed_facilities(&harness, 3).await?;

    let load = Node::new(
        NodeKind::Load(LoadConfig {
            alias: "facility".to_string(),
            entity_type: "Facility".to_string(),
            filters: vec![],
        }),
        vec![],
    );
    let transformation = TransformationService::new(harness.db.clone())
        .create(harness.org_id, "no materialize", None, vec![load])
        .await
        .map_err(|e| anyhow!("{e}"))?;

    let job = harness
        .export
        .queue_transformation_export(TransformationExportRequest {
            organization_id: harness.org_id,
            transformation_id: transformation.id,
            filters: vec![],
            options: ExecutionOptions::default(),
        })
        .await
        .map_err(|e| anyhow!("{e}"))?;

    let done = wait_for_terminal(&harness.export, job.id).await?;
    assert_eq!(done.status, ExportJobStatus::Failed);
    let message = done.error_message.expect("failure message");
    assert!(message.contains("materialize"), "message: {}", message);

    // The failure is also visible in the job's log stream.
    let logs = harness
        .export
        .list_logs(job.id, 10, 0)
        .await
        .map_err(|e| anyhow!("{e}"))?;
    assert_eq!(logs.len(), 1);
    Ok(())
}

#[tokio::test]
async fn cancel_is_idempotent_on_terminal_jobs() -> Result<()> {
    let harness = setup(10).await?;
    seed_facilities(&harness, 5).await?;

    let job = harness
        .export
        .queue_entity_type_export(EntityTypeExportRequest {
            organization_id: harness.org_id,
            entity_type: "Facility".to_string(),
            filters: vec![],
        })
        .await
        .map_err(|e| anyhow!("{e}"))?;
    let done = wait_for_terminal(&harness.export, job.id).await?;
    assert_eq!(done.status, ExportJobStatus::Completed);

    let after_cancel = harness
        .export
        .cancel_job(job.id)
        .await
        .map_err(|e| anyhow!("{e}"))?;
    assert_eq!(after_cancel.status, ExportJobStatus::Completed);
    assert_eq!(after_cancel.rows_exported, done.rows_exported);
    assert_eq!(after_cancel.completed_at, done.completed_at);
    Ok(())
}

#[tokio::test]
async fn queue_validation_rejects_bad_input_without_creating_jobs() -> Result<()> {
    let harness = setup(10).await?;

    let missing_type = harness
        .export
        .queue_entity_type_export(EntityTypeExportRequest {
            organization_id: harness.org_id,
            entity_type: "   ".to_string(),
            filters: vec![],
        })
        .await;
    assert!(missing_type.is_err());

    let unknown_schema = harness
        .export
        .queue_entity_type_export(EntityTypeExportRequest {
            organization_id: harness.org_id,
            entity_type: "Unknown".to_string(),
            filters: vec![],
        })
        .await;
    assert!(unknown_schema.is_err());

    let unknown_transformation = harness
        .export
        .queue_transformation_export(TransformationExportRequest {
            organization_id: harness.org_id,
            transformation_id: Uuid::new_v4(),
            filters: vec![],
            options: ExecutionOptions::default(),
        })
        .await;
    assert!(unknown_transformation.is_err());

    let jobs = harness
        .export
        .list_jobs(Some(harness.org_id), &[], 10, 0)
        .await
        .map_err(|e| anyhow!("{e}"))?;
    assert!(jobs.is_empty());
    Ok(())
}

#[tokio::test]
async fn download_tokens_are_scoped_and_expire() -> Result<()> {
    let harness = setup(10).await?;
    seed_facilities(&harness, 3).await?;

    let queue = |_: ()| {
        harness.export.queue_entity_type_export(EntityTypeExportRequest {
            organization_id: harness.org_id,
            entity_type: "Facility".to_string(),
            filters: vec![],
        })
    };
    let first = queue(()).await.map_err(|e| anyhow!("{e}"))?;
    let second = queue(()).await.map_err(|e| anyhow!("{e}"))?;
    let first = wait_for_terminal(&harness.export, first.id).await?;
    let _second = wait_for_terminal(&harness.export, second.id).await?;

    let url = harness
        .export
        .build_download_url(&first)
        .expect("download URL for completed job");
    let token = url
        .split("token=")
        .nth(1)
        .expect("token query parameter")
        .to_string();

    assert!(harness.export.validate_download_token(first.id, &token).is_ok());
    // Valid signature, wrong job.
    assert!(harness
        .export
        .validate_download_token(second.id, &token)
        .is_err());
    assert!(harness
        .export
        .validate_download_token(first.id, "garbage")
        .is_err());
    Ok(())
}

#[tokio::test]
async fn pending_jobs_have_no_download_url() -> Result<()> {
    let harness = setup(10).await?;
    seed_facilities(&harness, 3).await?;

    let job = harness
        .export
        .queue_entity_type_export(EntityTypeExportRequest {
            organization_id: harness.org_id,
            entity_type: "Facility".to_string(),
            filters: vec![],
        })
        .await
        .map_err(|e| anyhow!("{e}"))?;
    // Race-free check: a Pending snapshot never yields a URL, whatever the
    // worker has done since.
    assert!(harness.export.build_download_url(&job).is_none());

    wait_for_terminal(&harness.export, job.id).await?;
    Ok(())
}
