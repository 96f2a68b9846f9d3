use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Create organizations table
        manager
            .create_table(
                Table::create()
                    .table(Organizations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Organizations::Id)
                            .text()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Organizations::Name).text().not_null())
                    .col(ColumnDef::new(Organizations::CreatedAt).text().not_null())
                    .col(ColumnDef::new(Organizations::UpdatedAt).text().not_null())
                    .to_owned(),
            )
            .await?;

        // Create entity_schemas table
        manager
            .create_table(
                Table::create()
                    .table(EntitySchemas::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(EntitySchemas::Id)
                            .text()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(EntitySchemas::OrganizationId).text().not_null())
                    .col(ColumnDef::new(EntitySchemas::Name).text().not_null())
                    .col(ColumnDef::new(EntitySchemas::Description).text())
                    .col(ColumnDef::new(EntitySchemas::Fields).json().not_null())
                    .col(
                        ColumnDef::new(EntitySchemas::Version)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(ColumnDef::new(EntitySchemas::CreatedAt).text().not_null())
                    .col(ColumnDef::new(EntitySchemas::UpdatedAt).text().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_entity_schemas_organization_id")
                            .from(EntitySchemas::Table, EntitySchemas::OrganizationId)
                            .to(Organizations::Table, Organizations::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Create entities table
        manager
            .create_table(
                Table::create()
                    .table(Entities::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Entities::Id).text().not_null().primary_key())
                    .col(ColumnDef::new(Entities::OrganizationId).text().not_null())
                    .col(ColumnDef::new(Entities::SchemaId).text().not_null())
                    .col(ColumnDef::new(Entities::EntityType).text().not_null())
                    .col(ColumnDef::new(Entities::Properties).json().not_null())
                    .col(
                        ColumnDef::new(Entities::Version)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(ColumnDef::new(Entities::CreatedAt).text().not_null())
                    .col(ColumnDef::new(Entities::UpdatedAt).text().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_entities_organization_id")
                            .from(Entities::Table, Entities::OrganizationId)
                            .to(Organizations::Table, Organizations::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_entities_schema_id")
                            .from(Entities::Table, Entities::SchemaId)
                            .to(EntitySchemas::Table, EntitySchemas::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Create transformations table
        manager
            .create_table(
                Table::create()
                    .table(Transformations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Transformations::Id)
                            .text()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Transformations::OrganizationId)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Transformations::Name).text().not_null())
                    .col(ColumnDef::new(Transformations::Description).text())
                    .col(ColumnDef::new(Transformations::Nodes).json().not_null())
                    .col(ColumnDef::new(Transformations::CreatedAt).text().not_null())
                    .col(ColumnDef::new(Transformations::UpdatedAt).text().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_transformations_organization_id")
                            .from(Transformations::Table, Transformations::OrganizationId)
                            .to(Organizations::Table, Organizations::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Create export_jobs table
        manager
            .create_table(
                Table::create()
                    .table(ExportJobs::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(ExportJobs::Id).text().not_null().primary_key())
                    .col(ColumnDef::new(ExportJobs::OrganizationId).text().not_null())
                    .col(ColumnDef::new(ExportJobs::JobType).text().not_null())
                    .col(ColumnDef::new(ExportJobs::EntityType).text())
                    .col(ColumnDef::new(ExportJobs::TransformationId).text())
                    .col(ColumnDef::new(ExportJobs::TransformationDefinition).json())
                    .col(ColumnDef::new(ExportJobs::TransformationOptions).json())
                    .col(ColumnDef::new(ExportJobs::Filters).json().not_null())
                    .col(
                        ColumnDef::new(ExportJobs::RowsRequested)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ExportJobs::RowsExported)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ExportJobs::BytesWritten)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(ExportJobs::FilePath).text())
                    .col(ColumnDef::new(ExportJobs::FileMimeType).text())
                    .col(ColumnDef::new(ExportJobs::FileByteSize).big_integer())
                    .col(
                        ColumnDef::new(ExportJobs::Status)
                            .text()
                            .not_null()
                            .default("PENDING"),
                    )
                    .col(ColumnDef::new(ExportJobs::ErrorMessage).text())
                    .col(ColumnDef::new(ExportJobs::EnqueuedAt).text().not_null())
                    .col(ColumnDef::new(ExportJobs::StartedAt).text())
                    .col(ColumnDef::new(ExportJobs::CompletedAt).text())
                    .col(ColumnDef::new(ExportJobs::UpdatedAt).text().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_export_jobs_organization_id")
                            .from(ExportJobs::Table, ExportJobs::OrganizationId)
                            .to(Organizations::Table, Organizations::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Create export_logs table
        manager
            .create_table(
                Table::create()
                    .table(ExportLogs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ExportLogs::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ExportLogs::ExportJobId).text().not_null())
                    .col(ColumnDef::new(ExportLogs::OrganizationId).text().not_null())
                    .col(ColumnDef::new(ExportLogs::RowIdentifier).text())
                    .col(ColumnDef::new(ExportLogs::ErrorMessage).text().not_null())
                    .col(ColumnDef::new(ExportLogs::CreatedAt).text().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_export_logs_export_job_id")
                            .from(ExportLogs::Table, ExportLogs::ExportJobId)
                            .to(ExportJobs::Table, ExportJobs::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Create indexes for the common lookup paths
        manager
            .create_index(
                Index::create()
                    .name("idx_entity_schemas_org_name")
                    .table(EntitySchemas::Table)
                    .col(EntitySchemas::OrganizationId)
                    .col(EntitySchemas::Name)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_entities_org_type")
                    .table(Entities::Table)
                    .col(Entities::OrganizationId)
                    .col(Entities::EntityType)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_export_jobs_org_status")
                    .table(ExportJobs::Table)
                    .col(ExportJobs::OrganizationId)
                    .col(ExportJobs::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_export_logs_export_job_id")
                    .table(ExportLogs::Table)
                    .col(ExportLogs::ExportJobId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ExportLogs::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(ExportJobs::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Transformations::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Entities::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(EntitySchemas::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Organizations::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(Iden)]
enum Organizations {
    Table,
    Id,
    Name,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum EntitySchemas {
    Table,
    Id,
    OrganizationId,
    Name,
    Description,
    Fields,
    Version,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum Entities {
    Table,
    Id,
    OrganizationId,
    SchemaId,
    EntityType,
    Properties,
    Version,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum Transformations {
    Table,
    Id,
    OrganizationId,
    Name,
    Description,
    Nodes,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum ExportJobs {
    Table,
    Id,
    OrganizationId,
    JobType,
    EntityType,
    TransformationId,
    TransformationDefinition,
    TransformationOptions,
    Filters,
    RowsRequested,
    RowsExported,
    BytesWritten,
    FilePath,
    FileMimeType,
    FileByteSize,
    Status,
    ErrorMessage,
    EnqueuedAt,
    StartedAt,
    CompletedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum ExportLogs {
    Table,
    Id,
    ExportJobId,
    OrganizationId,
    RowIdentifier,
    ErrorMessage,
    CreatedAt,
}
