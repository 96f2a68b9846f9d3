//! Evaluation of validated transformation graphs against an entity store.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::entity::{matches_property_filters, property_value_to_string, Entity, EntityFilter};
use crate::store::EntityStore;

use super::validation::{validate_nodes, GraphError};
use super::{
    ExecutionOptions, ExecutionResult, FilterConfig, JoinConfig, NodeKind, ProjectConfig, Record,
    SortConfig, SortDirection, Transformation,
};

const DEFAULT_LOAD_BATCH_SIZE: i64 = 1000;

/// Failures raised while evaluating a graph.
#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// The entity store failed mid-load; no partial relation is returned.
    #[error("load entities for alias {alias}: {source}")]
    Store {
        alias: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Evaluates transformation graphs. Stateless between calls: every execution
/// re-reads current entity state through the store.
pub struct TransformationExecutor {
    entities: Arc<dyn EntityStore>,
    load_batch_size: i64,
}

impl TransformationExecutor {
    pub fn new(entities: Arc<dyn EntityStore>) -> Self {
        Self {
            entities,
            load_batch_size: DEFAULT_LOAD_BATCH_SIZE,
        }
    }

    pub fn with_load_batch_size(mut self, batch_size: i64) -> Self {
        if batch_size > 0 {
            self.load_batch_size = batch_size;
        }
        self
    }

    /// Runs the graph and returns the requested window over the final
    /// relation together with its pre-window size.
    pub async fn execute(
        &self,
        transformation: &Transformation,
        options: ExecutionOptions,
    ) -> Result<ExecutionResult, ExecuteError> {
        let ordered = validate_nodes(&transformation.nodes)?;
        if ordered.is_empty() {
            return Ok(ExecutionResult::default());
        }

        let mut relations: HashMap<Uuid, Vec<Record>> = HashMap::with_capacity(ordered.len());
        for node in &ordered {
            debug!(node = %node.id, kind = node.kind.type_name(), "executing node");
            let output = match &node.kind {
                NodeKind::Load(config) => {
                    self.run_load(transformation.organization_id, config).await?
                }
                NodeKind::Filter(config) => run_filter(input_relation(&relations, node, 0), config),
                NodeKind::Project(config) => {
                    run_project(input_relation(&relations, node, 0), config)
                }
                NodeKind::Join(config) => run_join(
                    input_relation(&relations, node, 0),
                    input_relation(&relations, node, 1),
                    config,
                    JoinMode::Inner,
                ),
                NodeKind::LeftJoin(config) => run_join(
                    input_relation(&relations, node, 0),
                    input_relation(&relations, node, 1),
                    config,
                    JoinMode::Left,
                ),
                NodeKind::AntiJoin(config) => run_join(
                    input_relation(&relations, node, 0),
                    input_relation(&relations, node, 1),
                    config,
                    JoinMode::Anti,
                ),
                NodeKind::Union => node
                    .inputs
                    .iter()
                    .flat_map(|input| {
                        relations
                            .get(input)
                            .expect("input scheduled before dependent")
                            .iter()
                            .cloned()
                    })
                    .collect(),
                NodeKind::Sort(config) => run_sort(input_relation(&relations, node, 0), config),
                NodeKind::Paginate(config) => super::paginate_records(
                    input_relation(&relations, node, 0).to_vec(),
                    config.limit.unwrap_or(0),
                    config.offset.unwrap_or(0),
                ),
                // Materialize is a projection descriptor for the exporter,
                // not a relation transform; the relation passes through.
                NodeKind::Materialize(_) => input_relation(&relations, node, 0).to_vec(),
            };
            relations.insert(node.id, output);
        }

        let terminal = ordered.last().expect("non-empty ordered node list").id;
        let final_relation = relations.remove(&terminal).unwrap_or_default();
        let total_count = final_relation.len() as i64;
        let records = super::paginate_records(final_relation, options.limit, options.offset);
        Ok(ExecutionResult {
            records,
            total_count,
        })
    }

    /// Paged evaluation for exports. Each call re-evaluates the entire graph
    /// from scratch (every load re-queries the store) and then applies the
    /// window, so there is no cursor or snapshot to invalidate and filters
    /// always observe current entity state.
    pub async fn execute_streaming(
        &self,
        transformation: &Transformation,
        options: ExecutionOptions,
    ) -> Result<ExecutionResult, ExecuteError> {
        self.execute(transformation, options).await
    }

    async fn run_load(
        &self,
        organization_id: Uuid,
        config: &super::LoadConfig,
    ) -> Result<Vec<Record>, ExecuteError> {
        let filter = EntityFilter {
            entity_type: config.entity_type.clone(),
            property_filters: config.filters.clone(),
        };
        let mut records = Vec::new();
        let mut offset = 0i64;
        loop {
            let (entities, _) = self
                .entities
                .list(organization_id, &filter, self.load_batch_size, offset)
                .await
                .map_err(|source| ExecuteError::Store {
                    alias: config.alias.clone(),
                    source,
                })?;
            let fetched = entities.len() as i64;
            if fetched == 0 {
                break;
            }
            offset += fetched;
            for entity in entities {
                // Stores may only filter coarsely; re-check here so load
                // semantics do not depend on store capabilities.
                if !matches_property_filters(&entity, &config.filters) {
                    continue;
                }
                records.push(Record::single(config.alias.clone(), entity));
            }
            if fetched < self.load_batch_size {
                break;
            }
        }
        Ok(records)
    }
}

fn input_relation<'a>(
    relations: &'a HashMap<Uuid, Vec<Record>>,
    node: &super::Node,
    position: usize,
) -> &'a [Record] {
    let input = node.inputs[position];
    relations
        .get(&input)
        .expect("input scheduled before dependent")
}

fn run_filter(input: &[Record], config: &FilterConfig) -> Vec<Record> {
    input
        .iter()
        .filter(|record| match record.entity(&config.alias) {
            Some(entity) => matches_property_filters(entity, &config.filters),
            None => false,
        })
        .cloned()
        .collect()
}

fn run_project(input: &[Record], config: &ProjectConfig) -> Vec<Record> {
    if config.fields.is_empty() {
        return input.to_vec();
    }
    input
        .iter()
        .map(|record| {
            let mut projected = record.clone();
            if let Some(Some(entity)) = projected.entities.get_mut(&config.alias) {
                entity
                    .properties
                    .retain(|key, _| config.fields.iter().any(|field| field == key));
            }
            projected
        })
        .collect()
}

#[derive(Clone, Copy)]
enum JoinMode {
    Inner,
    Left,
    Anti,
}

/// Hash join on string-coerced property equality. Left-input order is
/// preserved; within one left row, matches follow right-input order.
fn run_join(left: &[Record], right: &[Record], config: &JoinConfig, mode: JoinMode) -> Vec<Record> {
    let mut right_index: HashMap<String, Vec<usize>> = HashMap::new();
    for (idx, record) in right.iter().enumerate() {
        if let Some(entity) = record.entity(&config.right_alias) {
            right_index
                .entry(join_key(entity, &config.on_field))
                .or_default()
                .push(idx);
        }
    }

    let mut results = Vec::new();
    for left_record in left {
        let Some(left_entity) = left_record.entity(&config.left_alias) else {
            continue;
        };
        let key = join_key(left_entity, &config.on_field);
        let matches = right_index.get(&key).map(Vec::as_slice).unwrap_or(&[]);
        match mode {
            JoinMode::Inner => {
                for &idx in matches {
                    results.push(merge_records(left_record, &right[idx]));
                }
            }
            JoinMode::Left => {
                if matches.is_empty() {
                    let mut combined = left_record.clone();
                    combined.entities.insert(config.right_alias.clone(), None);
                    results.push(combined);
                } else {
                    for &idx in matches {
                        results.push(merge_records(left_record, &right[idx]));
                    }
                }
            }
            JoinMode::Anti => {
                if matches.is_empty() {
                    results.push(left_record.clone());
                }
            }
        }
    }
    results
}

fn join_key(entity: &Entity, field: &str) -> String {
    entity
        .properties
        .get(field)
        .map(property_value_to_string)
        .unwrap_or_default()
}

fn merge_records(left: &Record, right: &Record) -> Record {
    let mut merged = left.clone();
    for (alias, slot) in &right.entities {
        merged.entities.insert(alias.clone(), slot.clone());
    }
    merged
}

/// Stable sort on the string-coerced field value; an unbound alias sorts as
/// the empty string. Stability keeps pagination deterministic across calls.
fn run_sort(input: &[Record], config: &SortConfig) -> Vec<Record> {
    let mut sorted = input.to_vec();
    let key = |record: &Record| -> String {
        record
            .entity(&config.alias)
            .and_then(|entity| entity.properties.get(&config.field))
            .map(property_value_to_string)
            .unwrap_or_default()
    };
    match config.direction {
        SortDirection::Asc => sorted.sort_by(|a, b| key(a).cmp(&key(b))),
        SortDirection::Desc => sorted.sort_by(|a, b| key(b).cmp(&key(a))),
    }
    sorted
}
