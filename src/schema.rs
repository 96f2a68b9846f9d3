//! Organizations and versioned entity schemas.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tenant boundary. Every schema, entity, transformation, and export job is
/// scoped to exactly one organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Organization {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Value type of a schema field. Property bags remain dynamically typed; the
/// declared type drives ingestion validation and export header ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
    Timestamp,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: Option<String>,
}

/// A named, versioned description of one entity type's property bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySchema {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub fields: Vec<FieldDefinition>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EntitySchema {
    pub fn new(
        organization_id: Uuid,
        name: impl Into<String>,
        fields: Vec<FieldDefinition>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id,
            name: name.into(),
            description: None,
            fields,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Column headers for an entity-type export, in declaration order.
    pub fn field_names(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|field| !field.name.trim().is_empty())
            .map(|field| field.name.clone())
            .collect()
    }
}
