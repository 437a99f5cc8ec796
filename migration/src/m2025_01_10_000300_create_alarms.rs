//! Migration to create the alarms table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Alarms::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Alarms::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Alarms::TenantId).uuid().not_null())
                    .col(ColumnDef::new(Alarms::WellId).uuid().not_null())
                    .col(ColumnDef::new(Alarms::ConnectionId).uuid().not_null())
                    .col(ColumnDef::new(Alarms::TagName).text().not_null())
                    .col(ColumnDef::new(Alarms::AlarmType).text().not_null())
                    .col(ColumnDef::new(Alarms::Severity).text().not_null())
                    .col(
                        ColumnDef::new(Alarms::State)
                            .text()
                            .not_null()
                            .default("ACTIVE"),
                    )
                    .col(ColumnDef::new(Alarms::Message).text().not_null())
                    .col(ColumnDef::new(Alarms::Value).double().null())
                    .col(ColumnDef::new(Alarms::Threshold).double().null())
                    .col(
                        ColumnDef::new(Alarms::TriggerCount)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(Alarms::FirstTriggeredAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Alarms::LastTriggeredAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Alarms::AcknowledgedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Alarms::AcknowledgedBy).uuid().null())
                    .col(
                        ColumnDef::new(Alarms::ClearedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Alarms::Metadata).json_binary().null())
                    .col(
                        ColumnDef::new(Alarms::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Alarms::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_alarms_tenant_state")
                    .table(Alarms::Table)
                    .col(Alarms::TenantId)
                    .col(Alarms::State)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_alarms_tenant_well")
                    .table(Alarms::Table)
                    .col(Alarms::TenantId)
                    .col(Alarms::WellId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_alarms_tenant_state").to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name("idx_alarms_tenant_well").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Alarms::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Alarms {
    Table,
    Id,
    TenantId,
    WellId,
    ConnectionId,
    TagName,
    AlarmType,
    Severity,
    State,
    Message,
    Value,
    Threshold,
    TriggerCount,
    FirstTriggeredAt,
    LastTriggeredAt,
    AcknowledgedAt,
    AcknowledgedBy,
    ClearedAt,
    Metadata,
    CreatedAt,
    UpdatedAt,
}
