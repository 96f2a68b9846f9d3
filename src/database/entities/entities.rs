use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Dynamic entity rows. `properties` is the JSON property bag; `version`
/// supports optimistic updates.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "entities")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub organization_id: String,
    pub schema_id: String,
    pub entity_type: String,
    pub properties: Json,
    pub version: i32,
    pub created_at: ChronoDateTimeUtc,
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
    #[sea_orm(
        belongs_to = "super::entity_schemas::Entity",
        from = "Column::SchemaId",
        to = "super::entity_schemas::Column::Id"
    )]
    EntitySchemas,
}

impl Related<super::organizations::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Organizations.def()
    }
}

impl Related<super::entity_schemas::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::EntitySchemas.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
