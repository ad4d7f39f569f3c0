//! SeaORM-backed storage adapters that satisfy the domain storage traits while
//! keeping the database backend swappable (SQLite by default, PostgreSQL via
//! feature flag).

mod access_store;
mod entity;
mod migration;
mod order_store;

use std::sync::Arc;

use ixp_gate_domain::storage::{StorageError, StorageResult};
use migration::run_migrations;
use sea_orm::sea_query::{PostgresQueryBuilder, SqliteQueryBuilder, UpdateStatement};
use sea_orm::{
    ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, FromQueryResult, Statement,
};

/// Shared storage handle used by the HTTP API.
#[derive(Clone)]
pub struct SeaOrmStorage {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmStorage {
    /// Connects to the provided database URL and ensures the schema is present.
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        let db = Database::connect(database_url)
            .await
            .map_err(StorageError::from_source)?;
        run_migrations(&db).await?;
        tracing::debug!(backend = ?db.get_database_backend(), "storage schema ready");
        Ok(Self { db: Arc::new(db) })
    }

    pub fn connection(&self) -> &DatabaseConnection {
        self.db.as_ref()
    }
}

/// Runs a conditional `UPDATE ... RETURNING *` and decodes the affected row,
/// if any. Used for every state transition that must not race.
pub(crate) async fn update_returning<C, M>(
    conn: &C,
    query: &UpdateStatement,
) -> StorageResult<Option<M>>
where
    C: ConnectionTrait,
    M: FromQueryResult,
{
    let backend = conn.get_database_backend();
    let (sql, values) = match backend {
        DatabaseBackend::Sqlite => query.build(SqliteQueryBuilder),
        DatabaseBackend::Postgres => query.build(PostgresQueryBuilder),
        DatabaseBackend::MySql => {
            return Err(StorageError::Database(
                "mysql backend is not supported".into(),
            ))
        }
    };
    let stmt = Statement::from_sql_and_values(backend, sql, values);
    let maybe_row = conn
        .query_one(stmt)
        .await
        .map_err(StorageError::from_source)?;
    maybe_row
        .map(|row| M::from_query_result(&row, "").map_err(StorageError::from_source))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use ixp_gate_domain::model::{
        AccessState, AcquireRequest, Currency, NetworkId, NewOrder, OrderId, OrderStatus,
    };
    use ixp_gate_domain::storage::{AccessStore, OrderStore};

    async fn storage() -> SeaOrmStorage {
        SeaOrmStorage::connect("sqlite::memory:")
            .await
            .expect("in-memory storage")
    }

    fn acquire(id: &str, at: chrono::DateTime<Utc>, lease: Option<Duration>) -> AcquireRequest {
        AcquireRequest {
            network_id: NetworkId::from(id),
            at,
            lease_expires_at: lease.map(|lease| at + lease),
        }
    }

    fn new_order(id: &str) -> NewOrder {
        NewOrder {
            order_id: OrderId::from(id),
            amount_minor: 500,
            currency: Currency::parse("INR").unwrap(),
            payer: "alice".into(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn connect_is_idempotent_over_existing_schema() {
        let storage = storage().await;
        run_migrations(storage.connection())
            .await
            .expect("second bootstrap is a no-op");
    }

    #[tokio::test]
    async fn access_is_exclusive_until_released() {
        let storage = storage().await;
        let now = Utc::now();
        let id = NetworkId::from("as64500");

        let granted = storage
            .try_acquire(acquire("as64500", now, None))
            .await
            .unwrap()
            .expect("first grant");
        assert_eq!(granted.state, AccessState::Accessed);
        assert!(storage
            .try_acquire(acquire("as64500", now, None))
            .await
            .unwrap()
            .is_none());

        let released = storage.release(&id, now).await.unwrap().expect("released");
        assert_eq!(released.state, AccessState::Idle);
        assert!(storage.release(&id, now).await.unwrap().is_none());

        assert!(storage
            .try_acquire(acquire("as64500", now, None))
            .await
            .unwrap()
            .is_some());
        let stored = storage.find_access(&id).await.unwrap().unwrap();
        assert_eq!(stored.state, AccessState::Accessed);
    }

    #[tokio::test]
    async fn expired_lease_is_reacquired() {
        let storage = storage().await;
        let start = Utc::now();
        storage
            .try_acquire(acquire("as64500", start, Some(Duration::seconds(5))))
            .await
            .unwrap()
            .expect("first grant");

        assert!(storage
            .try_acquire(acquire("as64500", start + Duration::seconds(1), None))
            .await
            .unwrap()
            .is_none());
        let regrant = storage
            .try_acquire(acquire("as64500", start + Duration::seconds(6), None))
            .await
            .unwrap()
            .expect("lease lapsed");
        assert_eq!(regrant.lease_expires_at, None);
    }

    #[tokio::test]
    async fn release_after_lapsed_lease_reports_nothing_held() {
        let storage = storage().await;
        let start = Utc::now();
        let id = NetworkId::from("as64500");
        storage
            .try_acquire(acquire("as64500", start, Some(Duration::seconds(5))))
            .await
            .unwrap()
            .expect("first grant");

        assert!(storage
            .release(&id, start + Duration::seconds(6))
            .await
            .unwrap()
            .is_none());
        let released = storage
            .release(&id, start + Duration::seconds(1))
            .await
            .unwrap()
            .expect("lease still running");
        assert_eq!(released.state, AccessState::Idle);
    }

    #[tokio::test]
    async fn concurrent_acquire_grants_once() {
        let storage = storage().await;
        let now = Utc::now();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let storage = storage.clone();
            handles.push(tokio::spawn(async move {
                storage.try_acquire(acquire("as64500", now, None)).await
            }));
        }

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().is_some() {
                granted += 1;
            }
        }
        assert_eq!(granted, 1);
    }

    #[tokio::test]
    async fn order_round_trip() {
        let storage = storage().await;
        let inserted = storage.insert_order(new_order("order_1")).await.unwrap();
        assert_eq!(inserted.status, OrderStatus::Created);
        assert_eq!(inserted.rejected_attempts, 0);

        let found = storage
            .find_order(&OrderId::from("order_1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.amount_minor, 500);
        assert_eq!(found.currency.as_str(), "INR");
        assert!(storage
            .find_order(&OrderId::from("missing"))
            .await
            .unwrap()
            .is_none());

        assert!(storage.insert_order(new_order("order_1")).await.is_err());
    }

    #[tokio::test]
    async fn verification_transitions_once() {
        let storage = storage().await;
        let id = OrderId::from("order_1");
        storage.insert_order(new_order("order_1")).await.unwrap();

        let verified = storage
            .mark_verified(&id, "pay_1", Utc::now())
            .await
            .unwrap()
            .expect("created to verified");
        assert_eq!(verified.status, OrderStatus::Verified);
        assert_eq!(verified.payment_id.as_deref(), Some("pay_1"));
        assert!(verified.settled_at.is_some());

        assert!(storage
            .mark_verified(&id, "pay_2", Utc::now())
            .await
            .unwrap()
            .is_none());
        assert!(storage
            .record_rejection(&id, 3, Utc::now())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn rejections_fail_the_order_at_the_threshold() {
        let storage = storage().await;
        let id = OrderId::from("order_1");
        storage.insert_order(new_order("order_1")).await.unwrap();

        for expected in 1..=2 {
            let order = storage
                .record_rejection(&id, 3, Utc::now())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(order.rejected_attempts, expected);
            assert_eq!(order.status, OrderStatus::Created);
        }

        let failed = storage
            .record_rejection(&id, 3, Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(failed.status, OrderStatus::Failed);
        assert_eq!(failed.rejected_attempts, 3);

        assert!(storage
            .mark_verified(&id, "pay_1", Utc::now())
            .await
            .unwrap()
            .is_none());
        assert!(storage
            .record_rejection(&OrderId::from("missing"), 3, Utc::now())
            .await
            .unwrap()
            .is_none());
    }
}
