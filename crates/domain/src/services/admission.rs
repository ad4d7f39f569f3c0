//! Exclusive access control per network plus candidate ranking over the
//! exchange point status cache.

use std::{cmp::Ordering, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use metrics::counter;
use thiserror::Error;
use tracing::{debug, info};

use crate::model::{
    AccessRecord, AccessState, AcquireRequest, IxpId, IxpStatus, NetworkId, StatusSnapshot,
};
use crate::storage::{AccessStore, StorageError};

/// Read-only view of the exchange point status cache.
pub trait StatusView: Send + Sync {
    fn snapshot(&self) -> StatusSnapshot;
}

impl StatusView for StatusSnapshot {
    fn snapshot(&self) -> StatusSnapshot {
        self.clone()
    }
}

/// Ordering applied by [`AdmissionController::prioritize`]; earlier sorts
/// first.
pub trait PriorityPolicy: Send + Sync {
    fn compare(&self, left: &IxpStatus, right: &IxpStatus) -> Ordering;
}

/// Ranks by the textual status token in ascending byte order, with never
/// observed exchange points last. Deployments that need load-aware ranking
/// supply their own [`PriorityPolicy`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicographicStatus;

impl PriorityPolicy for LexicographicStatus {
    fn compare(&self, left: &IxpStatus, right: &IxpStatus) -> Ordering {
        match (left, right) {
            (IxpStatus::Observed(a), IxpStatus::Observed(b)) => a.cmp(b),
            (IxpStatus::Observed(_), IxpStatus::Unknown) => Ordering::Less,
            (IxpStatus::Unknown, IxpStatus::Observed(_)) => Ordering::Greater,
            (IxpStatus::Unknown, IxpStatus::Unknown) => Ordering::Equal,
        }
    }
}

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("network `{network_id}` already holds exchange access")]
    AlreadyAccessed { network_id: NetworkId },
    #[error("persistence failure: {0}")]
    Persistence(#[from] StorageError),
}

pub struct AdmissionController<S> {
    store: Arc<S>,
    status: Arc<dyn StatusView>,
    policy: Arc<dyn PriorityPolicy>,
    lease: Option<Duration>,
}

impl<S> Clone for AdmissionController<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            status: Arc::clone(&self.status),
            policy: Arc::clone(&self.policy),
            lease: self.lease,
        }
    }
}

impl<S> AdmissionController<S>
where
    S: AccessStore,
{
    pub fn new(store: Arc<S>, status: Arc<dyn StatusView>) -> Self {
        Self {
            store,
            status,
            policy: Arc::new(LexicographicStatus),
            lease: None,
        }
    }

    /// Grants expire after `lease` and revert to idle without a release.
    pub fn with_lease(mut self, lease: Option<Duration>) -> Self {
        self.lease = lease;
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn PriorityPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn lease(&self) -> Option<Duration> {
        self.lease
    }

    /// Atomically moves `network_id` from idle (or absent) to accessed.
    pub async fn access(&self, network_id: &NetworkId) -> Result<AccessRecord, AdmissionError> {
        let now = Utc::now();
        let request = AcquireRequest {
            network_id: network_id.clone(),
            at: now,
            lease_expires_at: self.lease_expiry(now),
        };

        match self.store.try_acquire(request).await? {
            Some(record) => {
                counter!("admission_requests_total", "result" => "granted").increment(1);
                info!(network_id = %network_id, lease_expires_at = ?record.lease_expires_at, "access granted");
                Ok(record)
            }
            None => {
                counter!("admission_requests_total", "result" => "already_accessed").increment(1);
                debug!(network_id = %network_id, "access refused, already held");
                Err(AdmissionError::AlreadyAccessed {
                    network_id: network_id.clone(),
                })
            }
        }
    }

    /// Returns `true` when an accessed record went back to idle, `false` when
    /// there was nothing held.
    pub async fn release(&self, network_id: &NetworkId) -> Result<bool, AdmissionError> {
        let released = self.store.release(network_id, Utc::now()).await?.is_some();
        let result = if released { "released" } else { "not_held" };
        counter!("admission_releases_total", "result" => result).increment(1);
        if released {
            info!(network_id = %network_id, "access released");
        }
        Ok(released)
    }

    /// Current record with lease expiry applied to its state.
    pub async fn status(
        &self,
        network_id: &NetworkId,
    ) -> Result<Option<AccessRecord>, AdmissionError> {
        let now = Utc::now();
        Ok(self
            .store
            .find_access(network_id)
            .await?
            .map(|mut record| {
                if record.effective_state(now) == AccessState::Idle {
                    record.state = AccessState::Idle;
                }
                record
            }))
    }

    /// Stable-sorts `ixp_ids` by the policy over one cache snapshot.
    pub fn prioritize(&self, ixp_ids: &[IxpId]) -> Vec<IxpId> {
        let snapshot = self.status.snapshot();
        let mut ranked: Vec<(IxpStatus, IxpId)> = ixp_ids
            .iter()
            .map(|id| (snapshot.status_of(id), id.clone()))
            .collect();
        ranked.sort_by(|(left, _), (right, _)| self.policy.compare(left, right));
        debug!(candidates = ranked.len(), "prioritized exchange points");
        ranked.into_iter().map(|(_, id)| id).collect()
    }

    fn lease_expiry(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let lease = chrono::Duration::from_std(self.lease?).ok()?;
        now.checked_add_signed(lease)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IxpStatusEntry;
    use crate::services::access_table::InMemoryAccessStore;

    fn controller(snapshot: StatusSnapshot) -> AdmissionController<InMemoryAccessStore> {
        AdmissionController::new(Arc::new(InMemoryAccessStore::new()), Arc::new(snapshot))
    }

    fn ids(raw: &[&str]) -> Vec<IxpId> {
        raw.iter().map(|id| IxpId::from(*id)).collect()
    }

    #[tokio::test]
    async fn second_access_is_refused() {
        let admission = controller(StatusSnapshot::default());
        let net = NetworkId::from("as64500");
        let other = NetworkId::from("as64501");

        let granted = admission.access(&net).await.expect("first access");
        assert_eq!(granted.state, AccessState::Accessed);
        admission.access(&other).await.expect("unrelated network");

        let err = admission.access(&net).await.unwrap_err();
        assert!(matches!(err, AdmissionError::AlreadyAccessed { network_id } if network_id == net));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_access_grants_exactly_once() {
        let admission = controller(StatusSnapshot::default());
        let net = NetworkId::from("as64500");

        let mut handles = Vec::new();
        for _ in 0..32 {
            let admission = admission.clone();
            let net = net.clone();
            handles.push(tokio::spawn(async move { admission.access(&net).await }));
        }

        let mut granted = 0;
        let mut refused = 0;
        for handle in handles {
            match handle.await.expect("task joins") {
                Ok(_) => granted += 1,
                Err(AdmissionError::AlreadyAccessed { .. }) => refused += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(granted, 1);
        assert_eq!(refused, 31);
    }

    #[tokio::test]
    async fn release_allows_a_new_grant() {
        let admission = controller(StatusSnapshot::default());
        let net = NetworkId::from("as64500");

        assert!(!admission.release(&net).await.unwrap());
        admission.access(&net).await.unwrap();
        assert!(admission.release(&net).await.unwrap());
        assert_eq!(
            admission.status(&net).await.unwrap().map(|r| r.state),
            Some(AccessState::Idle)
        );
        admission.access(&net).await.expect("re-granted after release");
    }

    #[tokio::test]
    async fn lapsed_lease_reports_idle_and_regrants() {
        let admission =
            controller(StatusSnapshot::default()).with_lease(Some(Duration::from_millis(20)));
        let net = NetworkId::from("as64500");

        let record = admission.access(&net).await.unwrap();
        assert!(record.lease_expires_at.is_some());
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(
            admission.status(&net).await.unwrap().map(|r| r.state),
            Some(AccessState::Idle)
        );
        assert!(!admission.release(&net).await.unwrap());
        admission.access(&net).await.expect("lease lapsed");
    }

    #[test]
    fn prioritize_orders_by_status_token() {
        let now = Utc::now();
        let snapshot: StatusSnapshot = vec![
            IxpStatusEntry::observed(IxpId::from("A"), "degraded", now),
            IxpStatusEntry::observed(IxpId::from("B"), "down", now),
            IxpStatusEntry::observed(IxpId::from("C"), "up", now),
        ]
        .into_iter()
        .collect();
        let admission = controller(snapshot);

        // Byte order: "degraded" < "down" < "up".
        assert_eq!(
            admission.prioritize(&ids(&["A", "B", "C"])),
            ids(&["A", "B", "C"])
        );
        assert_eq!(
            admission.prioritize(&ids(&["C", "B", "A"])),
            ids(&["A", "B", "C"])
        );
    }

    #[test]
    fn prioritize_puts_unknown_last_and_keeps_ties_stable() {
        let now = Utc::now();
        let snapshot: StatusSnapshot = vec![
            IxpStatusEntry::observed(IxpId::from("A"), "up", now),
            IxpStatusEntry::observed(IxpId::from("C"), "up", now),
            IxpStatusEntry::observed(IxpId::from("D"), "down", now),
            IxpStatusEntry::unknown(IxpId::from("E")),
        ]
        .into_iter()
        .collect();
        let admission = controller(snapshot);

        assert_eq!(
            admission.prioritize(&ids(&["X", "C", "E", "A", "D"])),
            ids(&["D", "C", "A", "X", "E"])
        );
    }

    #[test]
    fn custom_policy_overrides_ranking() {
        struct Reverse;
        impl PriorityPolicy for Reverse {
            fn compare(&self, left: &IxpStatus, right: &IxpStatus) -> Ordering {
                LexicographicStatus.compare(right, left)
            }
        }

        let now = Utc::now();
        let snapshot: StatusSnapshot = vec![
            IxpStatusEntry::observed(IxpId::from("A"), "down", now),
            IxpStatusEntry::observed(IxpId::from("B"), "up", now),
        ]
        .into_iter()
        .collect();
        let admission = controller(snapshot).with_policy(Arc::new(Reverse));

        assert_eq!(admission.prioritize(&ids(&["A", "B"])), ids(&["B", "A"]));
    }
}
