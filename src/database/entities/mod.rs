pub mod entities;
pub mod entity_schemas;
pub mod export_jobs;
pub mod export_logs;
pub mod organizations;
pub mod transformations;
