use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde_json::Value;
use uuid::Uuid;

use crate::database::entities::{export_jobs, export_logs};
use crate::export::{ExportJob, ExportJobStatus, ExportJobType, ExportLog, NewExportJob, NewExportLog};
use crate::store::{ExportJobStore, ExportResult};

const DEFAULT_LIST_LIMIT: u64 = 20;

/// Export job persistence. Every lifecycle transition is a conditional
/// update filtered on the expected source status, so races between workers
/// and the request path resolve in the database rather than in process.
pub struct ExportJobService {
    db: DatabaseConnection,
}

impl ExportJobService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ExportJobStore for ExportJobService {
    async fn create(&self, job: NewExportJob) -> Result<ExportJob> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let job_type = job.job_type();
        let model = export_jobs::ActiveModel {
            id: Set(id.to_string()),
            organization_id: Set(job.organization_id.to_string()),
            job_type: Set(job_type.as_str().to_string()),
            entity_type: Set(job.entity_type.clone()),
            transformation_id: Set(job.transformation_id.map(|t| t.to_string())),
            transformation_definition: Set(job
                .transformation
                .as_ref()
                .map(serde_json::to_value)
                .transpose()
                .context("serialize transformation snapshot")?),
            transformation_options: Set(job
                .transformation_options
                .as_ref()
                .map(serde_json::to_value)
                .transpose()
                .context("serialize transformation options")?),
            filters: Set(serde_json::to_value(&job.filters).context("serialize export filters")?),
            rows_requested: Set(job.rows_requested.max(0)),
            rows_exported: Set(0),
            bytes_written: Set(0),
            file_path: Set(None),
            file_mime_type: Set(None),
            file_byte_size: Set(None),
            status: Set(ExportJobStatus::Pending.as_str().to_string()),
            error_message: Set(None),
            enqueued_at: Set(now),
            started_at: Set(None),
            completed_at: Set(None),
            updated_at: Set(now),
        };
        model.insert(&self.db).await.context("insert export job")?;
        self.get_by_id(id)
            .await?
            .ok_or_else(|| anyhow!("export job {} vanished after insert", id))
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<ExportJob>> {
        let model = export_jobs::Entity::find()
            .filter(export_jobs::Column::Id.eq(id.to_string()))
            .one(&self.db)
            .await
            .context("get export job")?;
        model.map(to_domain).transpose()
    }

    async fn list(
        &self,
        organization_id: Option<Uuid>,
        statuses: &[ExportJobStatus],
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ExportJob>> {
        let mut query = export_jobs::Entity::find();
        if let Some(organization_id) = organization_id {
            query =
                query.filter(export_jobs::Column::OrganizationId.eq(organization_id.to_string()));
        }
        if !statuses.is_empty() {
            let values: Vec<&str> = statuses.iter().map(ExportJobStatus::as_str).collect();
            query = query.filter(export_jobs::Column::Status.is_in(values));
        }
        let limit = if limit > 0 { limit as u64 } else { DEFAULT_LIST_LIMIT };
        let offset = offset.max(0) as u64;
        let models = query
            .order_by_desc(export_jobs::Column::EnqueuedAt)
            .order_by_desc(export_jobs::Column::Id)
            .offset(offset)
            .limit(limit)
            .all(&self.db)
            .await
            .context("list export jobs")?;
        models.into_iter().map(to_domain).collect()
    }

    async fn mark_running(&self, id: Uuid) -> Result<bool> {
        let now = Utc::now();
        let update = export_jobs::ActiveModel {
            status: Set(ExportJobStatus::Running.as_str().to_string()),
            started_at: Set(Some(now)),
            updated_at: Set(now),
            ..Default::default()
        };
        let result = export_jobs::Entity::update_many()
            .set(update)
            .filter(export_jobs::Column::Id.eq(id.to_string()))
            .filter(export_jobs::Column::Status.eq(ExportJobStatus::Pending.as_str()))
            .exec(&self.db)
            .await
            .context("mark export job running")?;
        Ok(result.rows_affected > 0)
    }

    async fn update_progress(
        &self,
        id: Uuid,
        rows_exported: i64,
        bytes_written: i64,
        rows_requested: Option<i64>,
    ) -> Result<()> {
        let mut update = export_jobs::ActiveModel {
            rows_exported: Set(rows_exported.max(0)),
            bytes_written: Set(bytes_written.max(0)),
            updated_at: Set(Utc::now()),
            ..Default::default()
        };
        if let Some(requested) = rows_requested {
            // The estimate can lag behind reality when rows appear mid-export.
            update.rows_requested = Set(requested.max(rows_exported).max(0));
        }
        export_jobs::Entity::update_many()
            .set(update)
            .filter(export_jobs::Column::Id.eq(id.to_string()))
            .exec(&self.db)
            .await
            .context("update export job progress")?;
        Ok(())
    }

    async fn mark_completed(&self, id: Uuid, result: ExportResult) -> Result<bool> {
        let now = Utc::now();
        let update = export_jobs::ActiveModel {
            status: Set(ExportJobStatus::Completed.as_str().to_string()),
            rows_exported: Set(result.rows_exported.max(0)),
            bytes_written: Set(result.bytes_written.max(0)),
            file_path: Set(result.file_path),
            file_mime_type: Set(result.file_mime_type),
            file_byte_size: Set(result.file_byte_size),
            completed_at: Set(Some(now)),
            updated_at: Set(now),
            ..Default::default()
        };
        let outcome = export_jobs::Entity::update_many()
            .set(update)
            .filter(export_jobs::Column::Id.eq(id.to_string()))
            .filter(export_jobs::Column::Status.eq(ExportJobStatus::Running.as_str()))
            .exec(&self.db)
            .await
            .context("mark export job completed")?;
        Ok(outcome.rows_affected > 0)
    }

    async fn mark_failed(&self, id: Uuid, error_message: &str) -> Result<bool> {
        let now = Utc::now();
        let update = export_jobs::ActiveModel {
            status: Set(ExportJobStatus::Failed.as_str().to_string()),
            error_message: Set(Some(error_message.to_string())),
            completed_at: Set(Some(now)),
            updated_at: Set(now),
            ..Default::default()
        };
        let outcome = export_jobs::Entity::update_many()
            .set(update)
            .filter(export_jobs::Column::Id.eq(id.to_string()))
            .filter(export_jobs::Column::Status.is_in([
                ExportJobStatus::Pending.as_str(),
                ExportJobStatus::Running.as_str(),
            ]))
            .exec(&self.db)
            .await
            .context("mark export job failed")?;
        Ok(outcome.rows_affected > 0)
    }

    async fn mark_cancelled(&self, id: Uuid, reason: &str) -> Result<bool> {
        let now = Utc::now();
        let update = export_jobs::ActiveModel {
            status: Set(ExportJobStatus::Cancelled.as_str().to_string()),
            error_message: Set(Some(reason.to_string())),
            completed_at: Set(Some(now)),
            updated_at: Set(now),
            ..Default::default()
        };
        let outcome = export_jobs::Entity::update_many()
            .set(update)
            .filter(export_jobs::Column::Id.eq(id.to_string()))
            .filter(export_jobs::Column::Status.is_in([
                ExportJobStatus::Pending.as_str(),
                ExportJobStatus::Running.as_str(),
            ]))
            .exec(&self.db)
            .await
            .context("mark export job cancelled")?;
        Ok(outcome.rows_affected > 0)
    }

    async fn record_log(&self, entry: NewExportLog) -> Result<()> {
        let model = export_logs::ActiveModel {
            export_job_id: Set(entry.export_job_id.to_string()),
            organization_id: Set(entry.organization_id.to_string()),
            row_identifier: Set(entry.row_identifier),
            error_message: Set(entry.error_message),
            created_at: Set(Utc::now()),
            ..Default::default()
        };
        export_logs::Entity::insert(model)
            .exec(&self.db)
            .await
            .context("record export log")?;
        Ok(())
    }

    async fn list_logs(&self, job_id: Uuid, limit: i64, offset: i64) -> Result<Vec<ExportLog>> {
        let limit = if limit > 0 { limit as u64 } else { DEFAULT_LIST_LIMIT };
        let offset = offset.max(0) as u64;
        let models = export_logs::Entity::find()
            .filter(export_logs::Column::ExportJobId.eq(job_id.to_string()))
            .order_by_asc(export_logs::Column::CreatedAt)
            .order_by_asc(export_logs::Column::Id)
            .offset(offset)
            .limit(limit)
            .all(&self.db)
            .await
            .context("list export logs")?;
        models.into_iter().map(log_to_domain).collect()
    }
}

fn to_domain(model: export_jobs::Model) -> Result<ExportJob> {
    let job_type = ExportJobType::parse(&model.job_type)
        .ok_or_else(|| anyhow!("unknown export job type {}", model.job_type))?;
    let status = ExportJobStatus::parse(&model.status)
        .ok_or_else(|| anyhow!("unknown export job status {}", model.status))?;
    let filters = match model.filters {
        Value::Null => Vec::new(),
        other => serde_json::from_value(other).context("parse export filters")?,
    };
    Ok(ExportJob {
        id: Uuid::parse_str(&model.id).context("parse export job id")?,
        organization_id: Uuid::parse_str(&model.organization_id)
            .context("parse export job organization id")?,
        job_type,
        entity_type: model.entity_type,
        transformation_id: model
            .transformation_id
            .as_deref()
            .map(Uuid::parse_str)
            .transpose()
            .context("parse export job transformation id")?,
        transformation: model
            .transformation_definition
            .map(serde_json::from_value)
            .transpose()
            .context("parse transformation snapshot")?,
        transformation_options: model
            .transformation_options
            .map(serde_json::from_value)
            .transpose()
            .context("parse transformation options")?,
        filters,
        rows_requested: model.rows_requested,
        rows_exported: model.rows_exported,
        bytes_written: model.bytes_written,
        file_path: model.file_path,
        file_mime_type: model.file_mime_type,
        file_byte_size: model.file_byte_size,
        status,
        error_message: model.error_message,
        enqueued_at: model.enqueued_at,
        started_at: model.started_at,
        completed_at: model.completed_at,
        updated_at: model.updated_at,
    })
}

fn log_to_domain(model: export_logs::Model) -> Result<ExportLog> {
    Ok(ExportLog {
        id: model.id,
        export_job_id: Uuid::parse_str(&model.export_job_id).context("parse export log job id")?,
        organization_id: Uuid::parse_str(&model.organization_id)
            .context("parse export log organization id")?,
        row_identifier: model.row_identifier,
        error_message: model.error_message,
        created_at: model.created_at,
    })
}
