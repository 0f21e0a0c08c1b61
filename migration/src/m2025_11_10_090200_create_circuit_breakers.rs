//! Migration to create the circuit_breakers table.
//!
//! One row per (api configuration, provider). `revision` increases with every
//! in-memory mutation so that an older snapshot never overwrites a newer one.
//! `manual_revision` orders administrative actions separately, since they
//! may come from a process other than the one updating the counters.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CircuitBreakers::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CircuitBreakers::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CircuitBreakers::ApiConfigId).uuid().not_null())
                    .col(ColumnDef::new(CircuitBreakers::Provider).text().not_null())
                    .col(
                        ColumnDef::new(CircuitBreakers::State)
                            .text()
                            .not_null()
                            .default("closed"),
                    )
                    .col(
                        ColumnDef::new(CircuitBreakers::ManuallyDisabled)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(CircuitBreakers::DisabledReason).text().null())
                    .col(
                        ColumnDef::new(CircuitBreakers::ManualRevision)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(CircuitBreakers::ManualAction).text().null())
                    .col(ColumnDef::new(CircuitBreakers::ManualReason).text().null())
                    .col(
                        ColumnDef::new(CircuitBreakers::FailureCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(CircuitBreakers::ConsecutiveFailures)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(CircuitBreakers::SuccessCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(CircuitBreakers::ConsecutiveSuccesses)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(CircuitBreakers::FailureThreshold)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CircuitBreakers::SuccessThreshold)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CircuitBreakers::TimeoutSeconds)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CircuitBreakers::LastFailureAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CircuitBreakers::LastSuccessAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CircuitBreakers::OpenedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CircuitBreakers::LastFailureReason)
                            .text()
                            .null(),
                    )
                    .col(ColumnDef::new(CircuitBreakers::LastFailureType).text().null())
                    .col(
                        ColumnDef::new(CircuitBreakers::Revision)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(CircuitBreakers::UpdatedAt)
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
                    .name("idx_circuit_breakers_config_provider")
                    .table(CircuitBreakers::Table)
                    .col(CircuitBreakers::ApiConfigId)
                    .col(CircuitBreakers::Provider)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_circuit_breakers_config_provider")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(CircuitBreakers::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum CircuitBreakers {
    Table,
    Id,
    ApiConfigId,
    Provider,
    State,
    ManuallyDisabled,
    DisabledReason,
    ManualRevision,
    ManualAction,
    ManualReason,
    FailureCount,
    ConsecutiveFailures,
    SuccessCount,
    ConsecutiveSuccesses,
    FailureThreshold,
    SuccessThreshold,
    TimeoutSeconds,
    LastFailureAt,
    LastSuccessAt,
    OpenedAt,
    LastFailureReason,
    LastFailureType,
    Revision,
    UpdatedAt,
}
