//! Migration to create the readings table.
//!
//! Readings are append-only samples; the value column holds the typed JSON
//! value so numbers, strings and booleans share one column.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Readings::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Readings::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Readings::TenantId).uuid().not_null())
                    .col(ColumnDef::new(Readings::WellId).uuid().not_null())
                    .col(ColumnDef::new(Readings::ConnectionId).uuid().not_null())
                    .col(ColumnDef::new(Readings::TagName).text().not_null())
                    .col(ColumnDef::new(Readings::Value).json_binary().not_null())
                    .col(ColumnDef::new(Readings::DataType).text().not_null())
                    .col(ColumnDef::new(Readings::Quality).text().not_null())
                    .col(
                        ColumnDef::new(Readings::Timestamp)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Readings::Unit).text().null())
                    .col(ColumnDef::new(Readings::MinValue).double().null())
                    .col(ColumnDef::new(Readings::MaxValue).double().null())
                    .col(ColumnDef::new(Readings::Metadata).json_binary().null())
                    .col(
                        ColumnDef::new(Readings::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Latest-by-tag and filtered history queries.
        manager
            .create_index(
                Index::create()
                    .name("idx_readings_tenant_well_tag_ts")
                    .table(Readings::Table)
                    .col(Readings::TenantId)
                    .col(Readings::WellId)
                    .col(Readings::TagName)
                    .col(Readings::Timestamp)
                    .to_owned(),
            )
            .await?;

        // Retention sweeps.
        manager
            .create_index(
                Index::create()
                    .name("idx_readings_timestamp")
                    .table(Readings::Table)
                    .col(Readings::Timestamp)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_readings_tenant_well_tag_ts").to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name("idx_readings_timestamp").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Readings::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Readings {
    Table,
    Id,
    TenantId,
    WellId,
    ConnectionId,
    TagName,
    Value,
    DataType,
    Quality,
    Timestamp,
    Unit,
    MinValue,
    MaxValue,
    Metadata,
    CreatedAt,
}
