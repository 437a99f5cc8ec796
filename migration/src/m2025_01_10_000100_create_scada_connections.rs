//! Migration to create the scada_connections table.
//!
//! One row per well-to-RTU/PLC link. Passwords are stored encrypted.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ScadaConnections::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ScadaConnections::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ScadaConnections::TenantId).uuid().not_null())
                    .col(ColumnDef::new(ScadaConnections::WellId).uuid().not_null())
                    .col(ColumnDef::new(ScadaConnections::Name).text().not_null())
                    .col(ColumnDef::new(ScadaConnections::EndpointUrl).text().not_null())
                    .col(
                        ColumnDef::new(ScadaConnections::SecurityMode)
                            .text()
                            .not_null()
                            .default("None"),
                    )
                    .col(
                        ColumnDef::new(ScadaConnections::SecurityPolicy)
                            .text()
                            .not_null()
                            .default("None"),
                    )
                    .col(ColumnDef::new(ScadaConnections::Username).text().null())
                    .col(
                        ColumnDef::new(ScadaConnections::PasswordCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ScadaConnections::PollIntervalSeconds)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ScadaConnections::Status)
                            .text()
                            .not_null()
                            .default("inactive"),
                    )
                    .col(
                        ColumnDef::new(ScadaConnections::LastConnectedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(ScadaConnections::LastErrorMessage).text().null())
                    .col(
                        ColumnDef::new(ScadaConnections::IsEnabled)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(ScadaConnections::ConfigRevision)
                            .big_integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(ScadaConnections::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ScadaConnections::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(ScadaConnections::CreatedBy).uuid().not_null())
                    .col(ColumnDef::new(ScadaConnections::UpdatedBy).uuid().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_scada_connections_tenant_well")
                    .table(ScadaConnections::Table)
                    .col(ScadaConnections::TenantId)
                    .col(ScadaConnections::WellId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_scada_connections_enabled")
                    .table(ScadaConnections::Table)
                    .col(ScadaConnections::IsEnabled)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_scada_connections_tenant_well")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(Index::drop().name("idx_scada_connections_enabled").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(ScadaConnections::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ScadaConnections {
    Table,
    Id,
    TenantId,
    WellId,
    Name,
    EndpointUrl,
    SecurityMode,
    SecurityPolicy,
    Username,
    PasswordCiphertext,
    PollIntervalSeconds,
    Status,
    LastConnectedAt,
    LastErrorMessage,
    IsEnabled,
    ConfigRevision,
    CreatedAt,
    UpdatedAt,
    CreatedBy,
    UpdatedBy,
}
