use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderValue, Request, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::error;
use uuid::Uuid;

use crate::entity::PropertyFilter;
use crate::export::ExportJobStatus;
use crate::server::app::AppState;
use crate::services::{EntityTypeExportRequest, ExportService, TransformationExportRequest};
use crate::transformations::ExecutionOptions;

use super::error_response;

#[derive(Debug, Deserialize)]
pub struct QueueEntityTypeExportRequest {
    pub organization_id: Uuid,
    pub entity_type: String,
    #[serde(default)]
    pub filters: Vec<PropertyFilter>,
}

#[derive(Debug, Deserialize)]
pub struct QueueTransformationExportRequest {
    pub organization_id: Uuid,
    pub transformation_id: Uuid,
    #[serde(default)]
    pub filters: Vec<PropertyFilter>,
    #[serde(default)]
    pub options: ExecutionOptions,
}

#[derive(Debug, Deserialize)]
pub struct ListExportJobsQuery {
    #[serde(default)]
    pub organization_id: Option<Uuid>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ListExportLogsQuery {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// Queues an entity-type export and returns 202 with the pending job.
pub async fn queue_entity_type_export(
    State(state): State<AppState>,
    Json(request): Json<QueueEntityTypeExportRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    match state
        .export
        .queue_entity_type_export(EntityTypeExportRequest {
            organization_id: request.organization_id,
            entity_type: request.entity_type,
            filters: request.filters,
        })
        .await
    {
        Ok(job) => Ok((StatusCode::ACCEPTED, Json(job))),
        Err(err) => Err(error_response(err)),
    }
}

/// Queues a transformation export and returns 202 with the pending job.
pub async fn queue_transformation_export(
    State(state): State<AppState>,
    Json(request): Json<QueueTransformationExportRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    match state
        .export
        .queue_transformation_export(TransformationExportRequest {
            organization_id: request.organization_id,
            transformation_id: request.transformation_id,
            filters: request.filters,
            options: request.options,
        })
        .await
    {
        Ok(job) => Ok((StatusCode::ACCEPTED, Json(job))),
        Err(err) => Err(error_response(err)),
    }
}

pub async fn list_export_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListExportJobsQuery>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    let statuses: Vec<ExportJobStatus> = match query.status.as_deref() {
        Some(raw) if !raw.trim().is_empty() => match ExportJobStatus::parse(raw.trim()) {
            Some(status) => vec![status],
            None => {
                return Err((
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": format!("unknown status {}", raw)})),
                ))
            }
        },
        _ => Vec::new(),
    };
    match state
        .export
        .list_jobs(
            query.organization_id,
            &statuses,
            query.limit.unwrap_or(0),
            query.offset.unwrap_or(0),
        )
        .await
    {
        Ok(jobs) => Ok(Json(jobs)),
        Err(err) => Err(error_response(err)),
    }
}

pub async fn get_export_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    match state.export.get_job(id).await {
        Ok(job) => Ok(Json(job)),
        Err(err) => Err(error_response(err)),
    }
}

/// Cancels a job. Jobs already in a terminal state come back unchanged.
pub async fn cancel_export_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    match state.export.cancel_job(id).await {
        Ok(job) => Ok(Json(job)),
        Err(err) => Err(error_response(err)),
    }
}

pub async fn list_export_logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ListExportLogsQuery>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    match state
        .export
        .list_logs(id, query.limit.unwrap_or(0), query.offset.unwrap_or(0))
        .await
    {
        Ok(logs) => Ok(Json(logs)),
        Err(err) => Err(error_response(err)),
    }
}

/// Returns a signed, short-lived download URL for a completed job.
pub async fn get_download_url(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    let job = state.export.get_job(id).await.map_err(error_response)?;
    match state.export.build_download_url(&job) {
        Some(url) => Ok(Json(json!({ "url": url }))),
        None => Err((
            StatusCode::CONFLICT,
            Json(json!({"error": "export is not completed"})),
        )),
    }
}

/// Streams the export file. 403 on a bad or expired token, 404 on an
/// unknown job, 409 while the job has not completed.
pub async fn download_export_file(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<DownloadQuery>,
) -> Response {
    let job = match state.export.get_job(id).await {
        Ok(job) => job,
        Err(err) => {
            let (status, body) = error_response(err);
            return (status, body).into_response();
        }
    };

    let token = query.token.unwrap_or_default();
    if let Err(err) = state.export.validate_download_token(id, &token) {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({"error": err.to_string()})),
        )
            .into_response();
    }

    if job.status != ExportJobStatus::Completed {
        return (
            StatusCode::CONFLICT,
            Json(json!({"error": "export is not completed"})),
        )
            .into_response();
    }
    let Some(path) = job.file_path.clone().filter(|p| !p.trim().is_empty()) else {
        return (
            StatusCode::CONFLICT,
            Json(json!({"error": "export file is unavailable"})),
        )
            .into_response();
    };

    let request = Request::builder()
        .body(Body::empty())
        .expect("empty download request");
    match ServeFile::new(&path).oneshot(request).await {
        Ok(file_response) => {
            let mut response = file_response.map(Body::new);
            let file_name = ExportService::download_file_name(&job);
            if let Ok(disposition) =
                HeaderValue::from_str(&format!("attachment; filename=\"{}\"", file_name))
            {
                response
                    .headers_mut()
                    .insert(header::CONTENT_DISPOSITION, disposition);
            }
            if let Some(mime) = job.file_mime_type.as_deref() {
                if let Ok(content_type) = HeaderValue::from_str(mime) {
                    response.headers_mut().insert(header::CONTENT_TYPE, content_type);
                }
            }
            response.into_response()
        }
        Err(err) => {
            error!("Failed to stream export file for job {}: {}", id, err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
