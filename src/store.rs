//! Storage interfaces consumed by the transformation executor and the export
//! orchestrator. Production implementations live in `services`; tests swap in
//! lightweight in-memory versions.

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::entity::{Entity, EntityFilter};
use crate::export::{ExportJob, ExportJobStatus, ExportLog, NewExportJob, NewExportLog};
use crate::schema::{EntitySchema, Organization};
use crate::transformations::Transformation;

/// Paginated entity listing. Implementations must return the page plus the
/// total number of rows matching the filter, and must yield a deterministic
/// order so consecutive pages reconstruct the full result set.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn list(
        &self,
        organization_id: Uuid,
        filter: &EntityFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Entity>, i64)>;
}

#[async_trait]
pub trait SchemaStore: Send + Sync {
    async fn get_by_name(&self, organization_id: Uuid, name: &str) -> Result<Option<EntitySchema>>;
    async fn get_by_id(&self, id: Uuid) -> Result<Option<EntitySchema>>;
}

#[async_trait]
pub trait OrganizationStore: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> Result<Option<Organization>>;
}

#[async_trait]
pub trait TransformationStore: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> Result<Option<Transformation>>;
}

/// Export job persistence. Status transitions are conditional updates: the
/// `mark_*` methods return `false` when the row was not in the expected
/// source state, which callers treat as a lost race rather than an error.
#[async_trait]
pub trait ExportJobStore: Send + Sync {
    async fn create(&self, job: NewExportJob) -> Result<ExportJob>;
    async fn get_by_id(&self, id: Uuid) -> Result<Option<ExportJob>>;
    async fn list(
        &self,
        organization_id: Option<Uuid>,
        statuses: &[ExportJobStatus],
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ExportJob>>;

    /// Pending -> Running. Returns `false` if another worker won the claim.
    async fn mark_running(&self, id: Uuid) -> Result<bool>;

    /// Progress counters persisted after each page.
    async fn update_progress(
        &self,
        id: Uuid,
        rows_exported: i64,
        bytes_written: i64,
        rows_requested: Option<i64>,
    ) -> Result<()>;

    /// Running -> Completed with the final file metadata.
    async fn mark_completed(&self, id: Uuid, result: ExportResult) -> Result<bool>;

    /// Running -> Failed. `false` means the job already reached another
    /// terminal state (e.g. it was cancelled while the worker unwound).
    async fn mark_failed(&self, id: Uuid, error_message: &str) -> Result<bool>;

    /// Pending|Running -> Cancelled.
    async fn mark_cancelled(&self, id: Uuid, reason: &str) -> Result<bool>;

    async fn record_log(&self, entry: NewExportLog) -> Result<()>;
    async fn list_logs(&self, job_id: Uuid, limit: i64, offset: i64) -> Result<Vec<ExportLog>>;
}

/// Terminal payload written when a job completes.
#[derive(Debug, Clone, Default)]
pub struct ExportResult {
    pub rows_exported: i64,
    pub bytes_written: i64,
    pub file_path: Option<String>,
    pub file_mime_type: Option<String>,
    pub file_byte_size: Option<i64>,
}
