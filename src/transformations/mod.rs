//! Declarative transformation graphs.
//!
//! A transformation is a DAG of typed nodes describing a multi-step query:
//! load entities into aliased slots, filter/project/join/union/sort/paginate
//! the resulting relation, and finally materialize it into flat output
//! columns. Validation orders the nodes; the executor in [`executor`]
//! evaluates them against an entity store.

pub mod executor;
pub mod validation;

pub use executor::{ExecuteError, TransformationExecutor};
pub use validation::{validate_nodes, GraphError};

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::{Entity, PropertyFilter};

/// A stored transformation definition scoped to one organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transformation {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub nodes: Vec<Node>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transformation {
    pub fn new(organization_id: Uuid, name: impl Into<String>, nodes: Vec<Node>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id,
            name: name.into(),
            description: None,
            nodes,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn node_by_id(&self, id: Uuid) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id == id)
    }

    /// The projection descriptor an export consumes. A transformation used
    /// for export must contain exactly one materialize node.
    pub fn materialize_config(&self) -> Result<&MaterializeConfig, GraphError> {
        let mut found = None;
        for node in &self.nodes {
            if let NodeKind::Materialize(config) = &node.kind {
                if found.is_some() {
                    return Err(GraphError::MissingMaterialize);
                }
                found = Some(config);
            }
        }
        found.ok_or(GraphError::MissingMaterialize)
    }
}

/// One node of the graph. `inputs` lists upstream node ids in positional
/// order (left input first for joins).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<Uuid>,
    #[serde(flatten)]
    pub kind: NodeKind,
}

impl Node {
    pub fn new(kind: NodeKind, inputs: Vec<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: String::new(),
            inputs,
            kind,
        }
    }
}

/// Node payloads, one variant per node type. The variant itself carries the
/// type-specific configuration so a node cannot be in an inconsistent state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeKind {
    Load(LoadConfig),
    Filter(FilterConfig),
    Project(ProjectConfig),
    Join(JoinConfig),
    LeftJoin(JoinConfig),
    AntiJoin(JoinConfig),
    Union,
    Sort(SortConfig),
    Paginate(PaginateConfig),
    Materialize(MaterializeConfig),
}

impl NodeKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Load(_) => "LOAD",
            Self::Filter(_) => "FILTER",
            Self::Project(_) => "PROJECT",
            Self::Join(_) => "JOIN",
            Self::LeftJoin(_) => "LEFT_JOIN",
            Self::AntiJoin(_) => "ANTI_JOIN",
            Self::Union => "UNION",
            Self::Sort(_) => "SORT",
            Self::Paginate(_) => "PAGINATE",
            Self::Materialize(_) => "MATERIALIZE",
        }
    }

    /// Expected input count: `None` means variadic (at least one).
    pub fn input_arity(&self) -> Option<usize> {
        match self {
            Self::Load(_) => Some(0),
            Self::Filter(_)
            | Self::Project(_)
            | Self::Sort(_)
            | Self::Paginate(_)
            | Self::Materialize(_) => Some(1),
            Self::Join(_) | Self::LeftJoin(_) | Self::AntiJoin(_) => Some(2),
            Self::Union => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadConfig {
    pub alias: String,
    pub entity_type: String,
    #[serde(default)]
    pub filters: Vec<PropertyFilter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    pub alias: String,
    #[serde(default)]
    pub filters: Vec<PropertyFilter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub alias: String,
    #[serde(default)]
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinConfig {
    pub left_alias: String,
    pub right_alias: String,
    pub on_field: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl Default for SortDirection {
    fn default() -> Self {
        Self::Asc
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortConfig {
    pub alias: String,
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

/// `limit` of zero or less means unbounded from `offset`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PaginateConfig {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterializeConfig {
    pub outputs: Vec<MaterializeOutput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterializeOutput {
    pub alias: String,
    pub fields: Vec<MaterializeFieldMapping>,
}

/// Maps one aliased source field into a flat output column. An empty
/// `source_alias` falls back to the output's alias; an empty `source_field`
/// falls back to the output field name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaterializeFieldMapping {
    #[serde(default)]
    pub source_alias: String,
    #[serde(default)]
    pub source_field: String,
    pub output_field: String,
}

/// One row of a relation: alias -> entity binding. A `None` binding marks an
/// unmatched outer-join side. The map is ordered so iteration (and therefore
/// anything derived from it) is deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    pub entities: BTreeMap<String, Option<Entity>>,
}

impl Record {
    pub fn single(alias: impl Into<String>, entity: Entity) -> Self {
        let mut entities = BTreeMap::new();
        entities.insert(alias.into(), Some(entity));
        Self { entities }
    }

    /// The bound entity for an alias, if the alias is present and bound.
    pub fn entity(&self, alias: &str) -> Option<&Entity> {
        self.entities.get(alias).and_then(|slot| slot.as_ref())
    }
}

/// Caller-supplied window over the final relation. `limit <= 0` means
/// unbounded; a negative offset is treated as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOptions {
    #[serde(default)]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionResult {
    pub records: Vec<Record>,
    /// Size of the final relation before the options window was applied.
    pub total_count: i64,
}

/// Slices `[offset, offset + limit)` out of a relation. Offsets past the end
/// yield an empty relation; a non-positive limit keeps everything from
/// `offset` on.
pub fn paginate_records(records: Vec<Record>, limit: i64, offset: i64) -> Vec<Record> {
    let offset = offset.max(0) as usize;
    if offset >= records.len() {
        return Vec::new();
    }
    let mut end = records.len();
    if limit > 0 {
        end = end.min(offset + limit as usize);
    }
    records[offset..end].to_vec()
}
