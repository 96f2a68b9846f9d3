//! API integration tests
//!
//! Drives the REST surface end to end: CRUD, export queueing, job polling,
//! cancellation, and signed downloads.

use std::time::Duration;

use anyhow::{anyhow, Result};
use axum::http::StatusCode;
use axum_test::TestServer;
use entigraph::database::connection::setup_database;
use entigraph::server::app::create_app;
use entigraph::services::ExportService;
use sea_orm::Database;
use serde_json::{json, Value};
use tempfile::{NamedTempFile, TempDir};

struct TestContext {
    server: TestServer,
    _db_file: NamedTempFile,
    _export_dir: TempDir,
}

/// Create a test server with a throwaway database and export directory.
async fn setup_test_server() -> Result<TestContext> {
    let db_file = NamedTempFile::new()?;
    let db_url = format!("sqlite://{}?mode=rwc", db_file.path().display());

    let db = Database::connect(&db_url).await?;
    setup_database(&db).await?;

    let export_dir = TempDir::new()?;
    let export = ExportService::new(db.clone())
        .with_export_directory(export_dir.path())
        .with_page_size(10)
        .with_download_token_ttl(Duration::from_secs(60));

    let app = create_app(db, export, Some("*")).await?;
    let server = TestServer::new(app).map_err(|e| anyhow!("{e}"))?;

    Ok(TestContext {
        server,
        _db_file: db_file,
        _export_dir: export_dir,
    })
}

async fn create_fixture_org(server: &TestServer) -> Value {
    let response = server
        .post("/api/v1/organizations")
        .json(&json!({"name": "Acme Water"}))
        .await;
    assert_eq!(response.status_code(), StatusCode::CREATED);
    let organization: Value = response.json();

    let response = server
        .post("/api/v1/schemas")
        .json(&json!({
            "organization_id": organization["id"],
            "name": "Facility",
            "fields": [
                {"name": "name", "type": "string", "required": true},
                {"name": "status", "type": "string"},
            ],
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::CREATED);

    organization
}

async fn create_facility(server: &TestServer, organization: &Value, name: &str, status: &str) {
    let response = server
        .post("/api/v1/entities")
        .json(&json!({
            "organization_id": organization["id"],
            "entity_type": "Facility",
            "properties": {"name": name, "status": status},
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::CREATED);
}

async fn wait_for_terminal(server: &TestServer, job_id: &str) -> Value {
    for _ in 0..250 {
        let response = server.get(&format!("/api/v1/exports/{}", job_id)).await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let job: Value = response.json();
        let status = job["status"].as_str().unwrap_or_default().to_string();
        if matches!(status.as_str(), "COMPLETED" | "FAILED" | "CANCELLED") {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("export job {} never reached a terminal state", job_id);
}

#[tokio::test]
async fn test_health_endpoint() -> Result<()> {
    let ctx = setup_test_server().await?;

    let response = ctx.server.get("/health").await;

    assert_eq!(response.status_code(), StatusCode::OK);

    let body: Value = response.json();
    assert_eq!(body["service"], "entigraph-server");
    assert_eq!(body["status"], "healthy");
    assert!(body["version"].is_string());

    Ok(())
}

#[tokio::test]
async fn test_organization_and_schema_crud() -> Result<()> {
    let ctx = setup_test_server().await?;
    let organization = create_fixture_org(&ctx.server).await;
    let org_id = organization["id"].as_str().expect("organization id");

    let response = ctx.server.get("/api/v1/organizations").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let organizations: Vec<Value> = response.json();
    assert_eq!(organizations.len(), 1);
    assert_eq!(organizations[0]["name"], "Acme Water");

    let response = ctx
        .server
        .get(&format!("/api/v1/schemas?organization_id={}", org_id))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let schemas: Vec<Value> = response.json();
    assert_eq!(schemas.len(), 1);
    assert_eq!(schemas[0]["name"], "Facility");

    // Blank names are rejected before touching the store.
    let response = ctx
        .server
        .post("/api/v1/organizations")
        .json(&json!({"name": "  "}))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    Ok(())
}

#[tokio::test]
async fn test_entity_creation_and_filtered_listing() -> Result<()> {
    let ctx = setup_test_server().await?;
    let organization = create_fixture_org(&ctx.server).await;
    let org_id = organization["id"].as_str().expect("organization id");

    create_facility(&ctx.server, &organization, "pump-house", "Active").await;
    create_facility(&ctx.server, &organization, "old-mill", "Retired").await;

    let filters = r#"[{"key":"status","value":"Active"}]"#;
    let response = ctx
        .server
        .get(&format!(
            "/api/v1/entities?organization_id={}&entity_type=Facility&filters={}",
            org_id,
            urlencode(filters)
        ))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let page: Value = response.json();
    assert_eq!(page["total_count"], 1);
    assert_eq!(page["entities"][0]["properties"]["name"], "pump-house");

    // Creating an entity without a schema fails.
    let response = ctx
        .server
        .post("/api/v1/entities")
        .json(&json!({
            "organization_id": org_id,
            "entity_type": "Unknown",
            "properties": {},
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    Ok(())
}

#[tokio::test]
async fn test_export_queue_poll_and_download_flow() -> Result<()> {
    let ctx = setup_test_server().await?;
    let organization = create_fixture_org(&ctx.server).await;
    for i in 0..15 {
        create_facility(&ctx.server, &organization, &format!("facility-{i:02}"), "Active").await;
    }

    let response = ctx
        .server
        .post("/api/v1/exports/entity-type")
        .json(&json!({
            "organization_id": organization["id"],
            "entity_type": "Facility",
            "filters": [],
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::ACCEPTED);
    let job: Value = response.json();
    assert_eq!(job["status"], "PENDING");
    assert_eq!(job["rows_requested"], 15);
    let job_id = job["id"].as_str().expect("job id").to_string();

    let done = wait_for_terminal(&ctx.server, &job_id).await;
    assert_eq!(done["status"], "COMPLETED", "error: {}", done["error_message"]);
    assert_eq!(done["rows_exported"], 15);

    // Signed URL, then the actual file.
    let response = ctx
        .server
        .get(&format!("/api/v1/exports/{}/download-url", job_id))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    let url = body["url"].as_str().expect("download url");

    let response = ctx.server.get(url).await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let disposition = response.header("content-disposition");
    let disposition = disposition.to_str()?;
    assert!(disposition.contains("attachment"));
    assert!(disposition.contains(".csv"));
    let content = response.text();
    assert!(content.starts_with("name,status\n"));
    assert_eq!(content.lines().count(), 16);

    // Bad token and unknown job.
    let response = ctx
        .server
        .get(&format!("/api/v1/exports/{}/download?token=garbage", job_id))
        .await;
    assert_eq!(response.status_code(), StatusCode::FORBIDDEN);

    let response = ctx
        .server
        .get(&format!(
            "/api/v1/exports/{}/download?token=garbage",
            uuid::Uuid::new_v4()
        ))
        .await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test]
async fn test_queue_transformation_requires_an_existing_transformation() -> Result<()> {
    let ctx = setup_test_server().await?;
    let organization = create_fixture_org(&ctx.server).await;

    let response = ctx
        .server
        .post("/api/v1/exports/transformation")
        .json(&json!({
            "organization_id": organization["id"],
            "transformation_id": uuid::Uuid::new_v4(),
            "filters": [],
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);

    // And no job row was created by the rejected queue call.
    let response = ctx
        .server
        .get(&format!(
            "/api/v1/exports?organization_id={}",
            organization["id"].as_str().expect("organization id")
        ))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let jobs: Vec<Value> = response.json();
    assert!(jobs.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_cancel_endpoint_is_idempotent() -> Result<()> {
    let ctx = setup_test_server().await?;
    let organization = create_fixture_org(&ctx.server).await;
    create_facility(&ctx.server, &organization, "solo", "Active").await;

    let response = ctx
        .server
        .post("/api/v1/exports/entity-type")
        .json(&json!({
            "organization_id": organization["id"],
            "entity_type": "Facility",
            "filters": [],
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::ACCEPTED);
    let job: Value = response.json();
    let job_id = job["id"].as_str().expect("job id").to_string();

    let done = wait_for_terminal(&ctx.server, &job_id).await;
    assert_eq!(done["status"], "COMPLETED");

    let response = ctx
        .server
        .post(&format!("/api/v1/exports/{}/cancel", job_id))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let after: Value = response.json();
    assert_eq!(after["status"], "COMPLETED");
    assert_eq!(after["rows_exported"], done["rows_exported"]);

    Ok(())
}

#[tokio::test]
async fn test_transformation_crud_and_validation() -> Result<()> {
    let ctx = setup_test_server().await?;
    let organization = create_fixture_org(&ctx.server).await;
    let org_id = organization["id"].as_str().expect("organization id");

    let load_id = uuid::Uuid::new_v4();
    let materialize_id = uuid::Uuid::new_v4();
    let response = ctx
        .server
        .post("/api/v1/transformations")
        .json(&json!({
            "organization_id": org_id,
            "name": "facility export",
            "nodes": [
                {
                    "id": load_id,
                    "inputs": [],
                    "type": "LOAD",
                    "alias": "facility",
                    "entity_type": "Facility",
                },
                {
                    "id": materialize_id,
                    "inputs": [load_id],
                    "type": "MATERIALIZE",
                    "outputs": [
                        {
                            "alias": "facility",
                            "fields": [
                                {"source_field": "name", "output_field": "name"},
                            ],
                        },
                    ],
                },
            ],
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::CREATED);
    let transformation: Value = response.json();
    assert_eq!(transformation["nodes"].as_array().map(Vec::len), Some(2));

    // A cyclic graph is rejected with a validation error.
    let a = uuid::Uuid::new_v4();
    let b = uuid::Uuid::new_v4();
    let response = ctx
        .server
        .post("/api/v1/transformations")
        .json(&json!({
            "organization_id": org_id,
            "name": "cyclic",
            "nodes": [
                {"id": a, "inputs": [b], "type": "FILTER", "alias": "x", "filters": []},
                {"id": b, "inputs": [a], "type": "FILTER", "alias": "x", "filters": []},
            ],
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    Ok(())
}

fn urlencode(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len() * 3);
    for byte in value.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            other => encoded.push_str(&format!("%{:02X}", other)),
        }
    }
    encoded
}
