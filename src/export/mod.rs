//! Export job domain model and file plumbing.
//!
//! Jobs are queued by the export service, claimed by exactly one worker, and
//! stream CSV to disk. The submodules hold the streaming writer pieces and
//! the signed download tokens.

pub mod csv_stream;
pub mod download;

pub use csv_stream::{format_cell, sanitize_file_component, ByteCounter, CountingWriter, MaterializeProjection};
pub use download::{DownloadSigner, DownloadTokenError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::PropertyFilter;
use crate::transformations::{ExecutionOptions, Transformation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExportJobType {
    EntityType,
    Transformation,
}

impl ExportJobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EntityType => "ENTITY_TYPE",
            Self::Transformation => "TRANSFORMATION",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "ENTITY_TYPE" => Some(Self::EntityType),
            "TRANSFORMATION" => Some(Self::Transformation),
            _ => None,
        }
    }
}

/// Job lifecycle. Pending -> Running is won by exactly one worker; the
/// terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExportJobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExportJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "PENDING" => Some(Self::Pending),
            "RUNNING" => Some(Self::Running),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Persisted export job metadata, mirrored for workers and dashboards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportJob {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub job_type: ExportJobType,
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub transformation_id: Option<Uuid>,
    /// Snapshot of the definition taken when the job was queued.
    #[serde(default)]
    pub transformation: Option<Transformation>,
    #[serde(default)]
    pub transformation_options: Option<ExecutionOptions>,
    #[serde(default)]
    pub filters: Vec<PropertyFilter>,
    pub rows_requested: i64,
    pub rows_exported: i64,
    pub bytes_written: i64,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub file_mime_type: Option<String>,
    #[serde(default)]
    pub file_byte_size: Option<i64>,
    pub status: ExportJobStatus,
    #[serde(default)]
    pub error_message: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Fields the queueing call provides; the store fills in id, status, and
/// timestamps.
#[derive(Debug, Clone, Default)]
pub struct NewExportJob {
    pub organization_id: Uuid,
    pub entity_type: Option<String>,
    pub transformation_id: Option<Uuid>,
    pub transformation: Option<Transformation>,
    pub transformation_options: Option<ExecutionOptions>,
    pub filters: Vec<PropertyFilter>,
    pub rows_requested: i64,
}

impl NewExportJob {
    pub fn job_type(&self) -> ExportJobType {
        if self.transformation_id.is_some() || self.transformation.is_some() {
            ExportJobType::Transformation
        } else {
            ExportJobType::EntityType
        }
    }
}

/// One append-only failure log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportLog {
    pub id: i32,
    pub export_job_id: Uuid,
    pub organization_id: Uuid,
    #[serde(default)]
    pub row_identifier: Option<String>,
    pub error_message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewExportLog {
    pub export_job_id: Uuid,
    pub organization_id: Uuid,
    pub row_identifier: Option<String>,
    pub error_message: String,
}
