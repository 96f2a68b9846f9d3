use anyhow::{Context, Result};
use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

use crate::database::entities::entity_schemas;
use crate::schema::{EntitySchema, FieldDefinition};
use crate::store::SchemaStore;

pub struct SchemaService {
    db: DatabaseConnection,
}

impl SchemaService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn create(
        &self,
        organization_id: Uuid,
        name: &str,
        description: Option<String>,
        fields: Vec<FieldDefinition>,
    ) -> Result<EntitySchema> {
        let mut schema = EntitySchema::new(organization_id, name, fields);
        schema.description = description;
        let model = entity_schemas::ActiveModel {
            id: Set(schema.id.to_string()),
            organization_id: Set(schema.organization_id.to_string()),
            name: Set(schema.name.clone()),
            description: Set(schema.description.clone()),
            fields: Set(serde_json::to_value(&schema.fields).context("serialize schema fields")?),
            version: Set(schema.version),
            created_at: Set(schema.created_at),
            updated_at: Set(schema.updated_at),
        };
        model.insert(&self.db).await.context("insert entity schema")?;
        Ok(schema)
    }

    pub async fn list(&self, organization_id: Uuid) -> Result<Vec<EntitySchema>> {
        let models = entity_schemas::Entity::find()
            .filter(entity_schemas::Column::OrganizationId.eq(organization_id.to_string()))
            .order_by_asc(entity_schemas::Column::Name)
            .all(&self.db)
            .await
            .context("list entity schemas")?;
        models.into_iter().map(to_domain).collect()
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<EntitySchema>> {
        let model = entity_schemas::Entity::find()
            .filter(entity_schemas::Column::Id.eq(id.to_string()))
            .one(&self.db)
            .await
            .context("get entity schema")?;
        model.map(to_domain).transpose()
    }

    pub async fn find_by_name(&self, organization_id: Uuid, name: &str) -> Result<Option<EntitySchema>> {
        let model = entity_schemas::Entity::find()
            .filter(entity_schemas::Column::OrganizationId.eq(organization_id.to_string()))
            .filter(entity_schemas::Column::Name.eq(name))
            .one(&self.db)
            .await
            .context("get entity schema by name")?;
        model.map(to_domain).transpose()
    }
}

#[async_trait]
impl SchemaStore for SchemaService {
    async fn get_by_name(&self, organization_id: Uuid, name: &str) -> Result<Option<EntitySchema>> {
        self.find_by_name(organization_id, name).await
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<EntitySchema>> {
        self.get(id).await
    }
}

fn to_domain(model: entity_schemas::Model) -> Result<EntitySchema> {
    Ok(EntitySchema {
        id: Uuid::parse_str(&model.id).context("parse schema id")?,
        organization_id: Uuid::parse_str(&model.organization_id)
            .context("parse schema organization id")?,
        name: model.name,
        description: model.description,
        fields: serde_json::from_value(model.fields).context("parse schema fields")?,
        version: model.version,
        created_at: model.created_at,
        updated_at: model.updated_at,
    })
}
