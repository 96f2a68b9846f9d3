use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Append-only per-row failure log entries for export jobs.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "export_logs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub export_job_id: String,
    pub organization_id: String,
    pub row_identifier: Option<String>,
    pub error_message: String,
    pub created_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::export_jobs::Entity",
        from = "Column::ExportJobId",
        to = "super::export_jobs::Column::Id"
    )]
    ExportJobs,
}

impl Related<super::export_jobs::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ExportJobs.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
