use anyhow::{Context, Result};
use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

use crate::database::entities::transformations;
use crate::errors::ServiceError;
use crate::store::TransformationStore;
use crate::transformations::{validate_nodes, Node, Transformation};

pub struct TransformationService {
    db: DatabaseConnection,
}

impl TransformationService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Validates the graph structurally (arity, dangling inputs, cycles)
    /// before persisting it.
    pub async fn create(
        &self,
        organization_id: Uuid,
        name: &str,
        description: Option<String>,
        nodes: Vec<Node>,
    ) -> Result<Transformation, ServiceError> {
        validate_nodes(&nodes).map_err(|err| ServiceError::validation(err.to_string()))?;
        let mut transformation = Transformation::new(organization_id, name, nodes);
        transformation.description = description;
        let model = transformations::ActiveModel {
            id: Set(transformation.id.to_string()),
            organization_id: Set(transformation.organization_id.to_string()),
            name: Set(transformation.name.clone()),
            description: Set(transformation.description.clone()),
            nodes: Set(serde_json::to_value(&transformation.nodes)
                .context("serialize transformation nodes")?),
            created_at: Set(transformation.created_at),
            updated_at: Set(transformation.updated_at),
        };
        model
            .insert(&self.db)
            .await
            .context("insert transformation")?;
        Ok(transformation)
    }

    pub async fn list(&self, organization_id: Uuid) -> Result<Vec<Transformation>> {
        let models = transformations::Entity::find()
            .filter(transformations::Column::OrganizationId.eq(organization_id.to_string()))
            .order_by_asc(transformations::Column::CreatedAt)
            .all(&self.db)
            .await
            .context("list transformations")?;
        models.into_iter().map(to_domain).collect()
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Transformation>> {
        let model = transformations::Entity::find()
            .filter(transformations::Column::Id.eq(id.to_string()))
            .one(&self.db)
            .await
            .context("get transformation")?;
        model.map(to_domain).transpose()
    }
}

#[async_trait]
impl TransformationStore for TransformationService {
    async fn get_by_id(&self, id: Uuid) -> Result<Option<Transformation>> {
        self.get(id).await
    }
}

fn to_domain(model: transformations::Model) -> Result<Transformation> {
    Ok(Transformation {
        id: Uuid::parse_str(&model.id).context("parse transformation id")?,
        organization_id: Uuid::parse_str(&model.organization_id)
            .context("parse transformation organization id")?,
        name: model.name,
        description: model.description,
        nodes: serde_json::from_value(model.nodes).context("parse transformation nodes")?,
        created_at: model.created_at,
        updated_at: model.updated_at,
    })
}
