//! Persistence contracts implemented by the storage crate (and by in-memory
//! stand-ins in tests).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{AccessRecord, AcquireRequest, NetworkId, NewOrder, OrderId, PaymentOrder};

/// Common result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl StorageError {
    pub fn from_source(err: impl std::fmt::Display) -> Self {
        Self::Database(err.to_string())
    }
}

#[async_trait]
pub trait AccessStore: Send + Sync {
    /// Atomically moves the record to `Accessed` when it is absent, idle or
    /// holds an expired lease. Returns `None` when the network already holds
    /// access.
    async fn try_acquire(&self, request: AcquireRequest) -> StorageResult<Option<AccessRecord>>;

    /// Moves an `Accessed` record back to `Idle`. Returns `None` when there was
    /// nothing to release.
    async fn release(
        &self,
        network_id: &NetworkId,
        at: DateTime<Utc>,
    ) -> StorageResult<Option<AccessRecord>>;

    async fn find_access(&self, network_id: &NetworkId) -> StorageResult<Option<AccessRecord>>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert_order(&self, order: NewOrder) -> StorageResult<PaymentOrder>;

    async fn find_order(&self, order_id: &OrderId) -> StorageResult<Option<PaymentOrder>>;

    /// Applies `Created → Verified` if and only if the order is still
    /// `Created`. Returns the updated order, or `None` when no transition
    /// happened.
    async fn mark_verified(
        &self,
        order_id: &OrderId,
        payment_id: &str,
        at: DateTime<Utc>,
    ) -> StorageResult<Option<PaymentOrder>>;

    /// Counts a rejected verification against a `Created` order and moves it
    /// to `Failed` once `max_rejections` is reached. Returns `None` when the
    /// order is absent or already terminal.
    async fn record_rejection(
        &self,
        order_id: &OrderId,
        max_rejections: u32,
        at: DateTime<Utc>,
    ) -> StorageResult<Option<PaymentOrder>>;
}
