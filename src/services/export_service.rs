//! Export job orchestration.
//!
//! Queueing validates input, persists a Pending job row, and spawns one
//! worker task. The worker claims the row (Pending -> Running), streams
//! pages into a temporary CSV file, persists progress after every page, and
//! promotes the file on success. Manual cancellation and the per-job timeout
//! are cooperative: workers check between pages. A supervisor converts every
//! worker fault, including panics, into a Failed job row.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::entity::{EntityFilter, PropertyFilter};
use crate::errors::ServiceError;
use crate::export::{
    format_cell, sanitize_file_component, ByteCounter, CountingWriter, DownloadSigner,
    DownloadTokenError, ExportJob, ExportJobStatus, ExportJobType, ExportLog,
    MaterializeProjection, NewExportJob, NewExportLog,
};
use crate::store::{
    EntityStore, ExportJobStore, ExportResult, OrganizationStore, SchemaStore, TransformationStore,
};
use crate::transformations::{
    validate_nodes, ExecutionOptions, Transformation, TransformationExecutor,
};

use super::{
    CancellationRegistry, EntityService, ExportJobService, OrganizationService, SchemaService,
    TransformationService,
};

const DEFAULT_PAGE_SIZE: usize = 1000;
const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const MAX_ERROR_MESSAGE_CHARS: usize = 512;
const CSV_BUFFER_SIZE: usize = 1 << 20;

#[derive(Debug, Clone)]
pub struct EntityTypeExportRequest {
    pub organization_id: Uuid,
    pub entity_type: String,
    pub filters: Vec<PropertyFilter>,
}

#[derive(Debug, Clone)]
pub struct TransformationExportRequest {
    pub organization_id: Uuid,
    pub transformation_id: Uuid,
    pub filters: Vec<PropertyFilter>,
    pub options: ExecutionOptions,
}

/// Worker-side failure classification. `NotRunnable` and `Cancelled` are
/// control flow, not faults; everything else marks the job Failed.
#[derive(Debug, thiserror::Error)]
enum WorkerError {
    #[error("export job is no longer runnable")]
    NotRunnable,
    #[error("export job cancelled")]
    Cancelled,
    #[error("export job timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Clone)]
pub struct ExportService {
    organizations: Arc<dyn OrganizationStore>,
    schemas: Arc<dyn SchemaStore>,
    entities: Arc<dyn EntityStore>,
    transformations: Arc<dyn TransformationStore>,
    jobs: Arc<dyn ExportJobStore>,
    executor: Arc<TransformationExecutor>,
    export_dir: PathBuf,
    job_timeout: Duration,
    page_size: usize,
    signer: DownloadSigner,
    registry: CancellationRegistry,
}

impl ExportService {
    pub fn new(db: DatabaseConnection) -> Self {
        let entities: Arc<dyn EntityStore> = Arc::new(EntityService::new(db.clone()));
        Self::with_stores(
            Arc::new(OrganizationService::new(db.clone())),
            Arc::new(SchemaService::new(db.clone())),
            entities,
            Arc::new(TransformationService::new(db.clone())),
            Arc::new(ExportJobService::new(db)),
        )
    }

    pub fn with_stores(
        organizations: Arc<dyn OrganizationStore>,
        schemas: Arc<dyn SchemaStore>,
        entities: Arc<dyn EntityStore>,
        transformations: Arc<dyn TransformationStore>,
        jobs: Arc<dyn ExportJobStore>,
    ) -> Self {
        let executor = Arc::new(TransformationExecutor::new(entities.clone()));
        Self {
            organizations,
            schemas,
            entities,
            transformations,
            jobs,
            executor,
            export_dir: std::env::temp_dir().join("entigraph-exports"),
            job_timeout: DEFAULT_JOB_TIMEOUT,
            page_size: DEFAULT_PAGE_SIZE,
            signer: DownloadSigner::new(Duration::ZERO),
            registry: CancellationRegistry::new(),
        }
    }

    pub fn with_export_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        if !dir.as_os_str().is_empty() {
            self.export_dir = dir;
        }
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.job_timeout = timeout;
        }
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        if page_size > 0 {
            self.page_size = page_size;
        }
        self
    }

    pub fn with_download_token_ttl(mut self, ttl: Duration) -> Self {
        if !ttl.is_zero() {
            self.signer = DownloadSigner::new(ttl);
        }
        self
    }

    /// Validates the request, persists a Pending job with a row-count
    /// estimate, launches its worker, and returns without waiting for it.
    pub async fn queue_entity_type_export(
        &self,
        request: EntityTypeExportRequest,
    ) -> Result<ExportJob, ServiceError> {
        if request.organization_id.is_nil() {
            return Err(ServiceError::validation("organization id is required"));
        }
        let entity_type = request.entity_type.trim().to_string();
        if entity_type.is_empty() {
            return Err(ServiceError::validation("entity type is required"));
        }
        self.organizations
            .get_by_id(request.organization_id)
            .await?
            .ok_or_else(|| {
                ServiceError::not_found(format!("organization {} not found", request.organization_id))
            })?;
        self.schemas
            .get_by_name(request.organization_id, &entity_type)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("no schema named {}", entity_type)))?;

        let filter = EntityFilter {
            entity_type: entity_type.clone(),
            property_filters: request.filters.clone(),
        };
        let (_, total) = self
            .entities
            .list(request.organization_id, &filter, 1, 0)
            .await
            .context("estimate export rows")?;

        let job = self
            .jobs
            .create(NewExportJob {
                organization_id: request.organization_id,
                entity_type: Some(entity_type),
                filters: request.filters,
                rows_requested: total,
                ..Default::default()
            })
            .await?;
        self.launch_worker(job.clone());
        Ok(job)
    }

    /// Snapshots the transformation definition at queue time; later edits to
    /// the stored transformation do not alter the queued job.
    pub async fn queue_transformation_export(
        &self,
        request: TransformationExportRequest,
    ) -> Result<ExportJob, ServiceError> {
        if request.organization_id.is_nil() {
            return Err(ServiceError::validation("organization id is required"));
        }
        if request.transformation_id.is_nil() {
            return Err(ServiceError::validation("transformation id is required"));
        }
        self.organizations
            .get_by_id(request.organization_id)
            .await?
            .ok_or_else(|| {
                ServiceError::not_found(format!("organization {} not found", request.organization_id))
            })?;
        let transformation = self
            .transformations
            .get_by_id(request.transformation_id)
            .await?
            .ok_or_else(|| {
                ServiceError::not_found(format!(
                    "transformation {} not found",
                    request.transformation_id
                ))
            })?;
        if transformation.organization_id != request.organization_id {
            return Err(ServiceError::not_found(format!(
                "transformation {} not found",
                request.transformation_id
            )));
        }
        validate_nodes(&transformation.nodes)
            .map_err(|err| ServiceError::validation(err.to_string()))?;

        let rows_requested = request.options.limit.max(0);
        let job = self
            .jobs
            .create(NewExportJob {
                organization_id: request.organization_id,
                transformation_id: Some(request.transformation_id),
                transformation: Some(transformation),
                transformation_options: Some(request.options),
                filters: request.filters,
                rows_requested,
                ..Default::default()
            })
            .await?;
        self.launch_worker(job.clone());
        Ok(job)
    }

    pub async fn get_job(&self, id: Uuid) -> Result<ExportJob, ServiceError> {
        self.jobs
            .get_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("export job {} not found", id)))
    }

    pub async fn list_jobs(
        &self,
        organization_id: Option<Uuid>,
        statuses: &[ExportJobStatus],
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ExportJob>, ServiceError> {
        Ok(self.jobs.list(organization_id, statuses, limit, offset).await?)
    }

    pub async fn list_logs(
        &self,
        job_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ExportLog>, ServiceError> {
        Ok(self.jobs.list_logs(job_id, limit, offset).await?)
    }

    /// Cancels a Pending or Running job and fires the worker's trigger.
    /// Idempotent: a job already in a terminal state is returned unchanged.
    pub async fn cancel_job(&self, id: Uuid) -> Result<ExportJob, ServiceError> {
        let job = self.get_job(id).await?;
        if job.status.is_terminal() {
            return Ok(job);
        }
        let cancelled = self.jobs.mark_cancelled(id, "cancelled by user").await?;
        if cancelled {
            self.registry.trigger(id).await;
            info!("export job {} cancelled", id);
        }
        // Lost race: another writer reached a terminal state first. Either
        // way the current row is the answer.
        self.get_job(id).await
    }

    /// Signed download URL for a completed job with a file; `None` otherwise.
    pub fn build_download_url(&self, job: &ExportJob) -> Option<String> {
        if job.status != ExportJobStatus::Completed {
            return None;
        }
        let path = job.file_path.as_deref()?.trim();
        if path.is_empty() {
            return None;
        }
        let token = self.signer.sign(job.id, Utc::now());
        Some(format!("/api/v1/exports/{}/download?token={}", job.id, token))
    }

    pub fn validate_download_token(
        &self,
        job_id: Uuid,
        token: &str,
    ) -> Result<(), DownloadTokenError> {
        self.signer.verify(job_id, token, Utc::now())
    }

    /// File name presented in the download disposition.
    pub fn download_file_name(job: &ExportJob) -> String {
        let base = match job.job_type {
            ExportJobType::EntityType => job
                .entity_type
                .as_deref()
                .map(sanitize_file_component)
                .unwrap_or_else(|| "entity-export".to_string()),
            ExportJobType::Transformation => "transformation".to_string(),
        };
        format!("{}-{}.csv", base, job.id)
    }

    fn launch_worker(&self, job: ExportJob) {
        let service = self.clone();
        tokio::spawn(async move {
            let job_id = job.id;
            let mut cancel = service.registry.register(job_id).await;
            let deadline = Instant::now() + service.job_timeout;

            let worker = {
                let service = service.clone();
                tokio::spawn(async move { service.run_export(&job, &mut cancel, deadline).await })
            };

            match worker.await {
                Ok(Ok(())) => {}
                Ok(Err(WorkerError::NotRunnable)) => {
                    debug!("export job {} not runnable, skipping", job_id);
                }
                Ok(Err(WorkerError::Cancelled)) => {
                    info!("export job {} stopped on cancellation", job_id);
                }
                Ok(Err(err @ WorkerError::TimedOut(_))) => {
                    service.fail_job(job_id, &err.to_string()).await;
                }
                Ok(Err(WorkerError::Other(err))) => {
                    service.fail_job(job_id, &format!("{:#}", err)).await;
                }
                Err(join_err) => {
                    // The guard of last resort: a panicking worker must still
                    // leave a terminal job row behind.
                    service
                        .fail_job(job_id, &format!("export worker panicked: {}", join_err))
                        .await;
                }
            }
            service.registry.remove(job_id).await;
        });
    }

    async fn fail_job(&self, job_id: Uuid, message: &str) {
        let message = truncate_error(message);
        match self.jobs.mark_failed(job_id, &message).await {
            Ok(true) => {
                error!("export job {} failed: {}", job_id, message);
                if let Ok(Some(job)) = self.jobs.get_by_id(job_id).await {
                    let _ = self
                        .jobs
                        .record_log(NewExportLog {
                            export_job_id: job_id,
                            organization_id: job.organization_id,
                            row_identifier: None,
                            error_message: message,
                        })
                        .await;
                }
            }
            Ok(false) => {
                warn!(
                    "export job {} already terminal, failure not recorded: {}",
                    job_id, message
                );
            }
            Err(err) => {
                // Last-ditch out-of-band log so the job never silently
                // appears to run forever without an attempted terminal write.
                error!(
                    "failed to mark export job {} as failed: {:#} (original error: {})",
                    job_id, err, message
                );
            }
        }
    }

    async fn run_export(
        &self,
        job: &ExportJob,
        cancel: &mut watch::Receiver<bool>,
        deadline: Instant,
    ) -> Result<(), WorkerError> {
        match job.job_type {
            ExportJobType::EntityType => self.run_entity_type_export(job, cancel, deadline).await,
            ExportJobType::Transformation => {
                self.run_transformation_export(job, cancel, deadline).await
            }
        }
    }

    async fn run_entity_type_export(
        &self,
        job: &ExportJob,
        cancel: &mut watch::Receiver<bool>,
        deadline: Instant,
    ) -> Result<(), WorkerError> {
        let entity_type = job
            .entity_type
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| anyhow!("export job missing entity type"))?
            .to_string();

        if !self.jobs.mark_running(job.id).await? {
            return Err(WorkerError::NotRunnable);
        }

        let schema = self
            .schemas
            .get_by_name(job.organization_id, &entity_type)
            .await?
            .ok_or_else(|| anyhow!("schema {} not found", entity_type))?;
        let headers = schema.field_names();

        let tmp_path = self.temp_file_path(job.id)?;
        let outcome = self
            .stream_entity_rows(job, &entity_type, &headers, &tmp_path, cancel, deadline)
            .await;
        match outcome {
            Ok((rows_exported, bytes_written)) => {
                self.promote_and_complete(job, &tmp_path, rows_exported, bytes_written)
                    .await
            }
            Err(err) => {
                let _ = fs::remove_file(&tmp_path);
                Err(err)
            }
        }
    }

    async fn stream_entity_rows(
        &self,
        job: &ExportJob,
        entity_type: &str,
        headers: &[String],
        tmp_path: &Path,
        cancel: &mut watch::Receiver<bool>,
        deadline: Instant,
    ) -> Result<(i64, i64), WorkerError> {
        let (mut writer, counter) = open_csv_writer(tmp_path)?;
        if !headers.is_empty() {
            writer.write_record(headers).context("write header")?;
        }
        writer.flush().context("flush header")?;

        let filter = EntityFilter {
            entity_type: entity_type.to_string(),
            property_filters: job.filters.clone(),
        };
        let page_size = self.page_size as i64;
        let mut rows_target = job.rows_requested;
        let mut rows_exported = 0i64;
        let mut offset = 0i64;
        let mut row = vec![String::new(); headers.len()];

        loop {
            self.check_for_stop(cancel, deadline)?;
            let (entities, total) = self
                .entities
                .list(job.organization_id, &filter, page_size, offset)
                .await
                .context("list entities")?;
            if offset == 0 && total > 0 {
                rows_target = total;
            }
            if entities.is_empty() {
                break;
            }
            let batch = entities.len() as i64;
            for entity in &entities {
                for (cell, field) in row.iter_mut().zip(headers) {
                    *cell = format_cell(entity.properties.get(field));
                }
                writer.write_record(&row).context("write entity row")?;
                rows_exported += 1;
            }
            // Release the page before persisting progress.
            drop(entities);
            writer.flush().context("flush rows")?;
            self.persist_progress(job.id, rows_exported, &counter, rows_target)
                .await?;
            if rows_target > 0 && rows_exported >= rows_target {
                break;
            }
            if batch < page_size {
                break;
            }
            offset += batch;
        }

        finish_csv(writer)?;
        Ok((rows_exported, counter.bytes() as i64))
    }

    async fn run_transformation_export(
        &self,
        job: &ExportJob,
        cancel: &mut watch::Receiver<bool>,
        deadline: Instant,
    ) -> Result<(), WorkerError> {
        if !self.jobs.mark_running(job.id).await? {
            return Err(WorkerError::NotRunnable);
        }

        // Prefer the snapshot taken at queue time; fall back to the stored
        // definition for rows queued before snapshots existed.
        let transformation: Transformation = match (&job.transformation, job.transformation_id) {
            (Some(snapshot), _) => snapshot.clone(),
            (None, Some(id)) => self
                .transformations
                .get_by_id(id)
                .await?
                .ok_or_else(|| anyhow!("transformation {} not found", id))?,
            (None, None) => {
                return Err(anyhow!("export job missing transformation definition").into())
            }
        };

        let projection = transformation
            .materialize_config()
            .map(MaterializeProjection::from_config)
            .map_err(|err| anyhow!("transformation {}: {}", transformation.id, err))?;

        let tmp_path = self.temp_file_path(job.id)?;
        let outcome = self
            .stream_transformation_rows(job, &transformation, &projection, &tmp_path, cancel, deadline)
            .await;
        match outcome {
            Ok((rows_exported, bytes_written)) => {
                self.promote_and_complete(job, &tmp_path, rows_exported, bytes_written)
                    .await
            }
            Err(err) => {
                let _ = fs::remove_file(&tmp_path);
                Err(err)
            }
        }
    }

    async fn stream_transformation_rows(
        &self,
        job: &ExportJob,
        transformation: &Transformation,
        projection: &MaterializeProjection,
        tmp_path: &Path,
        cancel: &mut watch::Receiver<bool>,
        deadline: Instant,
    ) -> Result<(i64, i64), WorkerError> {
        let (mut writer, counter) = open_csv_writer(tmp_path)?;
        if !projection.is_empty() {
            writer
                .write_record(projection.headers())
                .context("write header")?;
        }
        writer.flush().context("flush header")?;

        let options = job.transformation_options.unwrap_or_default();
        let base_offset = options.offset.max(0);
        let requested = options.limit.max(0);
        let mut rows_target = requested;
        let mut rows_exported = 0i64;

        loop {
            self.check_for_stop(cancel, deadline)?;
            let mut limit = self.page_size as i64;
            if requested > 0 {
                let remaining = requested - rows_exported;
                if remaining <= 0 {
                    break;
                }
                limit = limit.min(remaining);
            }
            // Full re-evaluation per page: the graph is stateless, so every
            // page observes current entity state.
            let page_options = ExecutionOptions {
                limit,
                offset: base_offset + rows_exported,
            };
            let result = self
                .executor
                .execute_streaming(transformation, page_options)
                .await
                .map_err(|err| anyhow!(err).context("execute transformation"))?;
            if rows_exported == 0 && rows_target == 0 && result.total_count > 0 {
                rows_target = (result.total_count - base_offset).max(0);
            }
            if result.records.is_empty() {
                break;
            }
            let batch = result.records.len() as i64;
            for record in &result.records {
                writer
                    .write_record(projection.cells(record))
                    .context("write transformation row")?;
                rows_exported += 1;
            }
            drop(result);
            writer.flush().context("flush rows")?;
            self.persist_progress(job.id, rows_exported, &counter, rows_target)
                .await?;
            if rows_target > 0 && rows_exported >= rows_target {
                break;
            }
            if batch < limit {
                break;
            }
        }

        finish_csv(writer)?;
        Ok((rows_exported, counter.bytes() as i64))
    }

    fn check_for_stop(
        &self,
        cancel: &watch::Receiver<bool>,
        deadline: Instant,
    ) -> Result<(), WorkerError> {
        if *cancel.borrow() {
            return Err(WorkerError::Cancelled);
        }
        if Instant::now() >= deadline {
            return Err(WorkerError::TimedOut(self.job_timeout));
        }
        Ok(())
    }

    async fn persist_progress(
        &self,
        job_id: Uuid,
        rows_exported: i64,
        counter: &ByteCounter,
        rows_target: i64,
    ) -> Result<(), WorkerError> {
        self.jobs
            .update_progress(
                job_id,
                rows_exported,
                counter.bytes() as i64,
                (rows_target > 0).then_some(rows_target),
            )
            .await
            .context("update export progress")?;
        Ok(())
    }

    fn temp_file_path(&self, job_id: Uuid) -> Result<PathBuf, WorkerError> {
        fs::create_dir_all(&self.export_dir).context("ensure export directory")?;
        Ok(self.export_dir.join(format!("{}.csv.partial", job_id)))
    }

    async fn promote_and_complete(
        &self,
        job: &ExportJob,
        tmp_path: &Path,
        rows_exported: i64,
        bytes_written: i64,
    ) -> Result<(), WorkerError> {
        let final_path = self.export_dir.join(Self::download_file_name(job));
        fs::rename(tmp_path, &final_path).context("promote export file")?;
        let size = fs::metadata(&final_path)
            .context("stat export file")?
            .len() as i64;
        let bytes_written = if bytes_written > 0 { bytes_written } else { size };

        let completed = self
            .jobs
            .mark_completed(
                job.id,
                ExportResult {
                    rows_exported,
                    bytes_written,
                    file_path: Some(final_path.to_string_lossy().into_owned()),
                    file_mime_type: Some("text/csv".to_string()),
                    file_byte_size: Some(size),
                },
            )
            .await
            .context("mark export completed")?;
        if completed {
            info!(
                "export job {} completed (rows={} path={})",
                job.id,
                rows_exported,
                final_path.display()
            );
        } else {
            // The row reached a terminal state while we were finishing,
            // almost always a cancellation racing the final page.
            warn!(
                "export job {} finished writing but was already terminal",
                job.id
            );
        }
        Ok(())
    }
}

fn open_csv_writer(
    path: &Path,
) -> Result<(csv::Writer<CountingWriter<BufWriter<File>>>, ByteCounter), WorkerError> {
    let file = File::create(path).context("create temp export file")?;
    let buffered = BufWriter::with_capacity(CSV_BUFFER_SIZE, file);
    let (counting, counter) = CountingWriter::new(buffered);
    Ok((csv::Writer::from_writer(counting), counter))
}

fn finish_csv(mut writer: csv::Writer<CountingWriter<BufWriter<File>>>) -> Result<(), WorkerError> {
    writer.flush().context("final csv flush")?;
    let counting = writer
        .into_inner()
        .map_err(|err| anyhow!("finish csv stream: {}", err))?;
    let buffered = counting.into_inner();
    let file = buffered
        .into_inner()
        .map_err(|err| anyhow!("flush buffered export file: {}", err))?;
    file.sync_all().context("sync export file")?;
    Ok(())
}

fn truncate_error(message: &str) -> String {
    if message.chars().count() <= MAX_ERROR_MESSAGE_CHARS {
        return message.to_string();
    }
    message.chars().take(MAX_ERROR_MESSAGE_CHARS).collect()
}
