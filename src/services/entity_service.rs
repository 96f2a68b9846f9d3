use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::database::entities::entities;
use crate::entity::{matches_property_filters, Entity, EntityFilter};
use crate::store::EntityStore;

use super::SchemaService;

/// Entity persistence over the SQLite store. Property filters are applied
/// in memory after the coarse organization/type query; the listing order is
/// fixed (created_at, then id) so export pagination is deterministic.
pub struct EntityService {
    db: DatabaseConnection,
}

impl EntityService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn create(
        &self,
        organization_id: Uuid,
        entity_type: &str,
        properties: Map<String, Value>,
    ) -> Result<Entity> {
        let schemas = SchemaService::new(self.db.clone());
        let schema = schemas
            .find_by_name(organization_id, entity_type)
            .await?
            .ok_or_else(|| anyhow!("no schema named {} in organization", entity_type))?;

        let entity = Entity::new(organization_id, schema.id, entity_type, properties);
        let model = entities::ActiveModel {
            id: Set(entity.id.to_string()),
            organization_id: Set(entity.organization_id.to_string()),
            schema_id: Set(entity.schema_id.to_string()),
            entity_type: Set(entity.entity_type.clone()),
            properties: Set(Value::Object(entity.properties.clone())),
            version: Set(entity.version),
            created_at: Set(entity.created_at),
            updated_at: Set(entity.updated_at),
        };
        model.insert(&self.db).await.context("insert entity")?;
        Ok(entity)
    }

    /// Optimistic update: the caller supplies the version it read, and the
    /// write only lands if the row still carries it.
    pub async fn update(
        &self,
        id: Uuid,
        expected_version: i32,
        properties: Map<String, Value>,
    ) -> Result<Option<Entity>> {
        let update = entities::ActiveModel {
            properties: Set(Value::Object(properties)),
            version: Set(expected_version + 1),
            updated_at: Set(Utc::now()),
            ..Default::default()
        };
        let result = entities::Entity::update_many()
            .set(update)
            .filter(entities::Column::Id.eq(id.to_string()))
            .filter(entities::Column::Version.eq(expected_version))
            .exec(&self.db)
            .await
            .context("update entity")?;
        if result.rows_affected == 0 {
            return Ok(None);
        }
        self.get(id).await
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Entity>> {
        let model = entities::Entity::find()
            .filter(entities::Column::Id.eq(id.to_string()))
            .one(&self.db)
            .await
            .context("get entity")?;
        model.map(to_domain).transpose()
    }
}

#[async_trait]
impl EntityStore for EntityService {
    async fn list(
        &self,
        organization_id: Uuid,
        filter: &EntityFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Entity>, i64)> {
        let mut query = entities::Entity::find()
            .filter(entities::Column::OrganizationId.eq(organization_id.to_string()));
        if !filter.entity_type.is_empty() {
            query = query.filter(entities::Column::EntityType.eq(filter.entity_type.as_str()));
        }
        let models = query
            .order_by_asc(entities::Column::CreatedAt)
            .order_by_asc(entities::Column::Id)
            .all(&self.db)
            .await
            .context("list entities")?;

        let mut matching = Vec::with_capacity(models.len());
        for model in models {
            let entity = to_domain(model)?;
            if matches_property_filters(&entity, &filter.property_filters) {
                matching.push(entity);
            }
        }
        let total = matching.len() as i64;

        let offset = offset.max(0) as usize;
        let mut page: Vec<Entity> = matching.into_iter().skip(offset).collect();
        if limit > 0 {
            page.truncate(limit as usize);
        }
        Ok((page, total))
    }
}

fn to_domain(model: entities::Model) -> Result<Entity> {
    let properties = match model.properties {
        Value::Object(map) => map,
        other => return Err(anyhow!("entity {} has non-object properties: {}", model.id, other)),
    };
    Ok(Entity {
        id: Uuid::parse_str(&model.id).context("parse entity id")?,
        organization_id: Uuid::parse_str(&model.organization_id)
            .context("parse entity organization id")?,
        schema_id: Uuid::parse_str(&model.schema_id).context("parse entity schema id")?,
        entity_type: model.entity_type,
        properties,
        version: model.version,
        created_at: model.created_at,
        updated_at: model.updated_at,
    })
}
