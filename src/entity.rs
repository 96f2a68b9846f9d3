//! Dynamic entities and property-level filtering.
//!
//! Entities carry a free-form JSON property bag whose shape is described by an
//! entity schema. All comparisons over the bag (filters, joins, sorting) go
//! through [`property_value_to_string`] so the engine stays agnostic of the
//! underlying value types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A dynamic entity instance. Properties are an open JSON object validated
/// against the owning schema at ingestion time, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub schema_id: Uuid,
    pub entity_type: String,
    pub properties: Map<String, Value>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    pub fn new(
        organization_id: Uuid,
        schema_id: Uuid,
        entity_type: impl Into<String>,
        properties: Map<String, Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id,
            schema_id,
            entity_type: entity_type.into(),
            properties,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

/// Listing criteria handed to the entity store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityFilter {
    pub entity_type: String,
    #[serde(default)]
    pub property_filters: Vec<PropertyFilter>,
}

/// One property-level constraint. Constraints in a list are ANDed together.
///
/// An empty `value` and empty `in_array` mean "unspecified"; `exists` is
/// tri-state (unset, must exist, must be absent/empty).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyFilter {
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub exists: Option<bool>,
    #[serde(default)]
    pub in_array: Vec<String>,
}

impl PropertyFilter {
    pub fn equals(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
            ..Default::default()
        }
    }

    pub fn exists(key: impl Into<String>, exists: bool) -> Self {
        Self {
            key: key.into(),
            exists: Some(exists),
            ..Default::default()
        }
    }

    pub fn one_of(key: impl Into<String>, candidates: Vec<String>) -> Self {
        Self {
            key: key.into(),
            in_array: candidates,
            ..Default::default()
        }
    }

    fn effective_value(&self) -> Option<&str> {
        self.value.as_deref().filter(|v| !v.is_empty())
    }
}

/// Applies the ANDed constraint list against an entity's property bag.
///
/// `exists=false` passes when the property is absent or empty-valued, unless
/// `value`/`in_array` is also given, in which case presence plus a match is
/// required. `exists=true` requires presence. A non-empty `value` requires
/// string-coerced equality and a non-empty `in_array` requires membership.
pub fn matches_property_filters(entity: &Entity, filters: &[PropertyFilter]) -> bool {
    for filter in filters {
        let current = entity.properties.get(&filter.key);
        let wants_match = filter.effective_value().is_some() || !filter.in_array.is_empty();

        match filter.exists {
            Some(true) => {
                if current.is_none() {
                    return false;
                }
            }
            Some(false) if !wants_match => {
                if let Some(value) = current {
                    if !property_value_is_empty(value) {
                        return false;
                    }
                }
            }
            _ => {}
        }

        if let Some(expected) = filter.effective_value() {
            match current {
                Some(value) if property_value_to_string(value) == expected => {}
                _ => return false,
            }
        }

        if !filter.in_array.is_empty() {
            match current {
                Some(value) => {
                    let coerced = property_value_to_string(value);
                    if !filter.in_array.iter().any(|candidate| *candidate == coerced) {
                        return false;
                    }
                }
                None => return false,
            }
        }
    }
    true
}

/// Canonical textual form of a property value. Used by filters, join keys,
/// sort keys, and CSV cells so they all agree on equality and ordering.
///
/// Nulls render empty, strings render as-is, booleans as `true`/`false`,
/// numbers in their default textual form, and arrays/objects as compact JSON.
pub fn property_value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// An absent, null, or empty-string value counts as empty for `exists=false`.
pub fn property_value_is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}
