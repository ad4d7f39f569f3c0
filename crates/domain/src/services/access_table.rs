use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::sync::Cache;
use moka::ops::compute::Op;

use crate::model::{AccessRecord, AccessState, AcquireRequest, NetworkId};
use crate::storage::{AccessStore, StorageResult};

/// Process-local access table. Each transition runs under moka's per-key
/// compute lock, so concurrent callers for one network are serialized while
/// unrelated networks proceed independently.
#[derive(Debug)]
pub struct InMemoryAccessStore {
    records: Cache<NetworkId, AccessRecord>,
}

impl InMemoryAccessStore {
    pub fn new() -> Self {
        // No capacity bound: evicting an accessed record would hand out a
        // second grant.
        Self {
            records: Cache::builder().build(),
        }
    }
}

impl Default for InMemoryAccessStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccessStore for InMemoryAccessStore {
    async fn try_acquire(&self, request: AcquireRequest) -> StorageResult<Option<AccessRecord>> {
        let mut granted = None;
        self.records
            .entry(request.network_id.clone())
            .and_compute_with(|current| match current {
                Some(entry) if entry.value().is_held(request.at) => Op::Nop,
                _ => {
                    let record = request.granted_record();
                    granted = Some(record.clone());
                    Op::Put(record)
                }
            });
        Ok(granted)
    }

    async fn release(
        &self,
        network_id: &NetworkId,
        at: DateTime<Utc>,
    ) -> StorageResult<Option<AccessRecord>> {
        let mut released = None;
        self.records
            .entry(network_id.clone())
            .and_compute_with(|current| match current {
                Some(entry) if entry.value().is_held(at) => {
                    let record = AccessRecord {
                        network_id: network_id.clone(),
                        state: AccessState::Idle,
                        last_transition_at: at,
                        lease_expires_at: None,
                    };
                    released = Some(record.clone());
                    Op::Put(record)
                }
                _ => Op::Nop,
            });
        Ok(released)
    }

    async fn find_access(&self, network_id: &NetworkId) -> StorageResult<Option<AccessRecord>> {
        Ok(self.records.get(network_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn request(id: &str, at: DateTime<Utc>, lease: Option<DateTime<Utc>>) -> AcquireRequest {
        AcquireRequest {
            network_id: NetworkId::from(id),
            at,
            lease_expires_at: lease,
        }
    }

    #[tokio::test]
    async fn second_acquire_is_refused() {
        let store = InMemoryAccessStore::new();
        let now = Utc::now();
        assert!(store
            .try_acquire(request("net", now, None))
            .await
            .unwrap()
            .is_some());
        assert!(store
            .try_acquire(request("net", now, None))
            .await
            .unwrap()
            .is_none());
        assert!(store
            .try_acquire(request("other", now, None))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn expired_lease_can_be_reacquired() {
        let store = InMemoryAccessStore::new();
        let start = Utc::now();
        store
            .try_acquire(request("net", start, Some(start + Duration::seconds(5))))
            .await
            .unwrap()
            .expect("first grant");

        let later = start + Duration::seconds(6);
        let regrant = store
            .try_acquire(request("net", later, None))
            .await
            .unwrap()
            .expect("lease expired");
        assert_eq!(regrant.last_transition_at, later);
    }

    #[tokio::test]
    async fn release_after_lapsed_lease_is_a_no_op() {
        let store = InMemoryAccessStore::new();
        let start = Utc::now();
        let id = NetworkId::from("net");
        store
            .try_acquire(request("net", start, Some(start + Duration::seconds(5))))
            .await
            .unwrap()
            .expect("granted");

        assert!(store
            .release(&id, start + Duration::seconds(6))
            .await
            .unwrap()
            .is_none());
        assert!(store
            .release(&id, start + Duration::seconds(1))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn release_only_affects_accessed_records() {
        let store = InMemoryAccessStore::new();
        let now = Utc::now();
        let id = NetworkId::from("net");
        assert!(store.release(&id, now).await.unwrap().is_none());

        store.try_acquire(request("net", now, None)).await.unwrap();
        let released = store.release(&id, now).await.unwrap().expect("released");
        assert_eq!(released.state, AccessState::Idle);
        assert!(store.release(&id, now).await.unwrap().is_none());
        assert_eq!(
            store.find_access(&id).await.unwrap().map(|r| r.state),
            Some(AccessState::Idle)
        );
    }
}
