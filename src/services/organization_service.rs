use anyhow::{Context, Result};
use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

use crate::database::entities::organizations;
use crate::schema::Organization;
use crate::store::OrganizationStore;

pub struct OrganizationService {
    db: DatabaseConnection,
}

impl OrganizationService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn create(&self, name: &str) -> Result<Organization> {
        let organization = Organization::new(name);
        let model = organizations::ActiveModel {
            id: Set(organization.id.to_string()),
            name: Set(organization.name.clone()),
            created_at: Set(organization.created_at),
            updated_at: Set(organization.updated_at),
        };
        model.insert(&self.db).await.context("insert organization")?;
        Ok(organization)
    }

    pub async fn list(&self) -> Result<Vec<Organization>> {
        let models = organizations::Entity::find()
            .order_by_asc(organizations::Column::CreatedAt)
            .all(&self.db)
            .await
            .context("list organizations")?;
        models.into_iter().map(to_domain).collect()
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Organization>> {
        let model = organizations::Entity::find()
            .filter(organizations::Column::Id.eq(id.to_string()))
            .one(&self.db)
            .await
            .context("get organization")?;
        model.map(to_domain).transpose()
    }
}

#[async_trait]
impl OrganizationStore for OrganizationService {
    async fn get_by_id(&self, id: Uuid) -> Result<Option<Organization>> {
        self.get(id).await
    }
}

fn to_domain(model: organizations::Model) -> Result<Organization> {
    Ok(Organization {
        id: Uuid::parse_str(&model.id).context("parse organization id")?,
        name: model.name,
        created_at: model.created_at,
        updated_at: model.updated_at,
    })
}
