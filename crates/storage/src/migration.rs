use sea_orm::sea_query::{ColumnDef, Table, TableCreateStatement};
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection};

use crate::entity::{access_records, payment_orders};
use ixp_gate_domain::storage::{StorageError, StorageResult};

pub async fn run_migrations(db: &DatabaseConnection) -> StorageResult<()> {
    let backend = db.get_database_backend();

    let access_table = Table::create()
        .table(access_records::Entity)
        .col(
            ColumnDef::new(access_records::Column::NetworkId)
                .string_len(128)
                .not_null()
                .primary_key(),
        )
        .col(
            ColumnDef::new(access_records::Column::State)
                .tiny_integer()
                .not_null(),
        )
        .col(
            ColumnDef::new(access_records::Column::LastTransitionAt)
                .timestamp_with_time_zone()
                .not_null(),
        )
        .col(
            ColumnDef::new(access_records::Column::LeaseExpiresAt)
                .timestamp_with_time_zone()
                .null(),
        )
        .to_owned();
    create_table(db, backend, access_table).await?;

    let orders_table = Table::create()
        .table(payment_orders::Entity)
        .col(
            ColumnDef::new(payment_orders::Column::OrderId)
                .string_len(128)
                .not_null()
                .primary_key(),
        )
        .col(
            ColumnDef::new(payment_orders::Column::AmountMinor)
                .big_integer()
                .not_null(),
        )
        .col(
            ColumnDef::new(payment_orders::Column::Currency)
                .string_len(3)
                .not_null(),
        )
        .col(
            ColumnDef::new(payment_orders::Column::Payer)
                .string()
                .not_null(),
        )
        .col(
            ColumnDef::new(payment_orders::Column::Status)
                .tiny_integer()
                .not_null(),
        )
        .col(
            ColumnDef::new(payment_orders::Column::RejectedAttempts)
                .integer()
                .not_null()
                .default(0),
        )
        .col(
            ColumnDef::new(payment_orders::Column::PaymentId)
                .string()
                .null(),
        )
        .col(
            ColumnDef::new(payment_orders::Column::CreatedAt)
                .timestamp_with_time_zone()
                .not_null(),
        )
        .col(
            ColumnDef::new(payment_orders::Column::SettledAt)
                .timestamp_with_time_zone()
                .null(),
        )
        .to_owned();
    create_table(db, backend, orders_table).await?;

    Ok(())
}

async fn create_table(
    db: &DatabaseConnection,
    backend: DatabaseBackend,
    mut statement: TableCreateStatement,
) -> StorageResult<()> {
    statement.if_not_exists();
    db.execute(backend.build(&statement))
        .await
        .map_err(StorageError::from_source)?;
    Ok(())
}
