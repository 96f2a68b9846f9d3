use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "organizations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub name: String,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::entity_schemas::Entity")]
    EntitySchemas,
    #[sea_orm(has_many = "super::entities::Entity")]
    Entities,
    #[sea_orm(has_many = "super::export_jobs::Entity")]
    ExportJobs,
}

impl Related<super::entity_schemas::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::EntitySchemas.def()
    }
}

impl Related<super::entities::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Entities.def()
    }
}

impl Related<super::export_jobs::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ExportJobs.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
