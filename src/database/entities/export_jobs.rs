use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Export job rows. Transformation jobs embed a JSON snapshot of the
/// definition taken at queue time so later edits cannot alter a queued job.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "export_jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub organization_id: String,
    pub job_type: String,
    pub entity_type: Option<String>,
    pub transformation_id: Option<String>,
    pub transformation_definition: Option<Json>,
    pub transformation_options: Option<Json>,
    pub filters: Json,
    pub rows_requested: i64,
    pub rows_exported: i64,
    pub bytes_written: i64,
    pub file_path: Option<String>,
    pub file_mime_type: Option<String>,
    pub file_byte_size: Option<i64>,
    pub status: String,
    pub error_message: Option<String>,
    pub enqueued_at: ChronoDateTimeUtc,
    pub started_at: Option<ChronoDateTimeUtc>,
    pub completed_at: Option<ChronoDateTimeUtc>,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::organizations::Entity",
        from = "Column::OrganizationId",
        to = "super::organizations::Column::Id"
    )]
    Organizations,
    #[sea_orm(has_many = "super::export_logs::Entity")]
    ExportLogs,
}

impl Related<super::organizations::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Organizations.def()
    }
}

impl Related<super::export_logs::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ExportLogs.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
