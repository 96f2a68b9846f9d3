pub mod cancellation;
pub mod entity_service;
pub mod export_job_service;
pub mod export_service;
pub mod organization_service;
pub mod schema_service;
pub mod transformation_service;

pub use cancellation::CancellationRegistry;
pub use entity_service::EntityService;
pub use export_job_service::ExportJobService;
pub use export_service::{
    EntityTypeExportRequest, ExportService, TransformationExportRequest,
};
pub use organization_service::OrganizationService;
pub use schema_service::SchemaService;
pub use transformation_service::TransformationService;
