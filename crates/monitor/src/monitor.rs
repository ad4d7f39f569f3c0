//! Status cache for exchange points. Readers take cheap snapshots while a
//! poll is in flight; each poll result replaces its entry wholesale.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use ixp_gate_domain::config::MonitorConfig;
use ixp_gate_domain::model::{IxpId, IxpStatusEntry, StatusSnapshot};
use ixp_gate_domain::services::{RetryPolicy, StatusView};
use metrics::{counter, gauge, histogram};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::health::{HealthError, HealthSource};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_CONCURRENCY: usize = 8;

/// Outcome of one poll round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub refreshed: Vec<IxpId>,
    pub failed: Vec<IxpId>,
}

pub struct StatusMonitor {
    source: Arc<dyn HealthSource>,
    entries: RwLock<HashMap<IxpId, IxpStatusEntry>>,
    request_timeout: Duration,
    concurrency: usize,
    retry: RetryPolicy,
}

impl StatusMonitor {
    pub fn new(source: Arc<dyn HealthSource>) -> Self {
        Self {
            source,
            entries: RwLock::new(HashMap::new()),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            concurrency: DEFAULT_CONCURRENCY,
            retry: RetryPolicy::single_attempt(),
        }
    }

    pub fn from_config(source: Arc<dyn HealthSource>, config: &MonitorConfig) -> Self {
        let retry = if config.retry_attempts() > 1 {
            RetryPolicy::network(config.retry_attempts())
        } else {
            RetryPolicy::single_attempt()
        };
        Self::new(source)
            .with_request_timeout(config.request_timeout())
            .with_concurrency(config.concurrency())
            .with_retry_policy(retry)
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Queries every id with bounded parallelism. A failing id is logged and
    /// keeps its previous entry (or becomes `Unknown` if it has none); it
    /// never prevents the others from refreshing.
    pub async fn poll(&self, ixp_ids: &[IxpId]) -> PollReport {
        let started = Instant::now();
        let mut seen = HashSet::new();
        let unique: Vec<IxpId> = ixp_ids
            .iter()
            .filter(|id| seen.insert((*id).clone()))
            .cloned()
            .collect();

        let mut results = stream::iter(unique)
            .map(|ixp_id| async move {
                let result = self.fetch(&ixp_id).await;
                (ixp_id, result)
            })
            .buffer_unordered(self.concurrency);

        // Each result lands as soon as it arrives so a slow id never holds
        // back the others.
        let mut report = PollReport::default();
        while let Some((ixp_id, result)) = results.next().await {
            if self.apply(&ixp_id, result) {
                report.refreshed.push(ixp_id);
            } else {
                report.failed.push(ixp_id);
            }
        }

        histogram!("monitor_poll_duration_seconds").record(started.elapsed().as_secs_f64());
        report
    }

    /// Writes one poll result under a short write lock. Returns `false` when
    /// the query failed and the previous entry was kept.
    fn apply(&self, ixp_id: &IxpId, result: Result<String, HealthError>) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let refreshed = match result {
            Ok(token) => {
                counter!("monitor_polls_total", "result" => "ok").increment(1);
                debug!(ixp_id = %ixp_id, status = %token, "exchange point refreshed");
                entries.insert(
                    ixp_id.clone(),
                    IxpStatusEntry::observed(ixp_id.clone(), token, Utc::now()),
                );
                true
            }
            Err(err) => {
                counter!("monitor_polls_total", "result" => "error").increment(1);
                warn!(ixp_id = %ixp_id, error = %err, "health query failed");
                entries
                    .entry(ixp_id.clone())
                    .or_insert_with(|| IxpStatusEntry::unknown(ixp_id.clone()));
                false
            }
        };
        gauge!("monitor_known_ixps").set(entries.len() as f64);
        refreshed
    }

    /// Point-in-time copy of the cache.
    pub fn snapshot(&self) -> StatusSnapshot {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    async fn fetch(&self, ixp_id: &IxpId) -> Result<String, HealthError> {
        self.retry
            .retry_if(
                |_| async move {
                    timeout(self.request_timeout, self.source.fetch_status(ixp_id))
                        .await
                        .unwrap_or(Err(HealthError::Timeout))
                },
                HealthError::is_retryable,
            )
            .await
    }
}

impl StatusView for StatusMonitor {
    fn snapshot(&self) -> StatusSnapshot {
        StatusMonitor::snapshot(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ixp_gate_domain::model::IxpStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Serves scripted tokens; ids listed in `failing` error out.
    #[derive(Default)]
    struct ScriptedSource {
        tokens: Mutex<HashMap<String, String>>,
        failing: Mutex<HashSet<String>>,
        hang: HashSet<String>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn set(&self, id: &str, token: &str) {
            self.tokens
                .lock()
                .unwrap()
                .insert(id.to_string(), token.to_string());
        }

        fn fail(&self, id: &str) {
            self.failing.lock().unwrap().insert(id.to_string());
        }
    }

    #[async_trait]
    impl HealthSource for ScriptedSource {
        async fn fetch_status(&self, ixp_id: &IxpId) -> Result<String, HealthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang.contains(ixp_id.as_str()) {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            if self.failing.lock().unwrap().contains(ixp_id.as_str()) {
                return Err(HealthError::Transport("connection refused".into()));
            }
            self.tokens
                .lock()
                .unwrap()
                .get(ixp_id.as_str())
                .cloned()
                .ok_or(HealthError::Status(404))
        }
    }

    fn ids(raw: &[&str]) -> Vec<IxpId> {
        raw.iter().map(|id| IxpId::from(*id)).collect()
    }

    #[tokio::test]
    async fn failing_ixp_does_not_block_the_rest() {
        let source = Arc::new(ScriptedSource::default());
        source.set("A", "up");
        source.set("B", "up");
        source.set("C", "degraded");
        let monitor = StatusMonitor::new(source.clone());

        monitor.poll(&ids(&["A", "B", "C"])).await;
        let first = monitor.snapshot();
        let b_before = first.get(&IxpId::from("B")).cloned().unwrap();

        source.set("A", "down");
        source.set("C", "up");
        source.fail("B");
        let report = monitor.poll(&ids(&["A", "B", "C"])).await;

        assert_eq!(report.failed, ids(&["B"]));
        assert_eq!(report.refreshed.len(), 2);
        let after = monitor.snapshot();
        assert_eq!(after.status_of(&IxpId::from("A")), IxpStatus::Observed("down".into()));
        assert_eq!(after.status_of(&IxpId::from("C")), IxpStatus::Observed("up".into()));
        assert_eq!(after.get(&IxpId::from("B")), Some(&b_before));
    }

    #[tokio::test]
    async fn never_observed_failure_is_unknown() {
        let source = Arc::new(ScriptedSource::default());
        source.set("A", "up");
        source.fail("B");
        let monitor = StatusMonitor::new(source);

        monitor.poll(&ids(&["A", "B"])).await;
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.status_of(&IxpId::from("B")), IxpStatus::Unknown);
        assert!(snapshot.get(&IxpId::from("B")).unwrap().observed_at.is_none());
    }

    #[tokio::test]
    async fn slow_ixp_times_out_individually() {
        let source = Arc::new(ScriptedSource {
            hang: ["slow".to_string()].into_iter().collect(),
            ..Default::default()
        });
        source.set("fast", "up");
        source.set("slow", "up");
        let monitor =
            StatusMonitor::new(source).with_request_timeout(Duration::from_millis(50));

        let report = monitor.poll(&ids(&["slow", "fast"])).await;
        assert_eq!(report.refreshed, ids(&["fast"]));
        assert_eq!(report.failed, ids(&["slow"]));
    }

    #[tokio::test]
    async fn fast_result_is_visible_while_slow_id_is_in_flight() {
        let source = Arc::new(ScriptedSource {
            hang: ["slow".to_string()].into_iter().collect(),
            ..Default::default()
        });
        source.set("fast", "up");
        source.set("slow", "up");
        let monitor = Arc::new(
            StatusMonitor::new(source).with_request_timeout(Duration::from_secs(2)),
        );

        let poller = {
            let monitor = Arc::clone(&monitor);
            tokio::spawn(async move { monitor.poll(&ids(&["slow", "fast"])).await })
        };
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(!poller.is_finished());
        assert_eq!(
            monitor.snapshot().status_of(&IxpId::from("fast")),
            IxpStatus::Observed("up".into())
        );
        assert!(monitor.snapshot().get(&IxpId::from("slow")).is_none());
        poller.abort();
    }

    #[tokio::test]
    async fn duplicate_ids_are_polled_once() {
        let source = Arc::new(ScriptedSource::default());
        source.set("A", "up");
        let monitor = StatusMonitor::new(source.clone());

        monitor.poll(&ids(&["A", "A", "A"])).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_failures_when_configured() {
        struct Flaky(AtomicUsize);

        #[async_trait]
        impl HealthSource for Flaky {
            async fn fetch_status(&self, _: &IxpId) -> Result<String, HealthError> {
                if self.0.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(HealthError::Timeout)
                } else {
                    Ok("up".into())
                }
            }
        }

        let monitor = StatusMonitor::new(Arc::new(Flaky(AtomicUsize::new(0)))).with_retry_policy(
            RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(1), 0.0),
        );
        let report = monitor.poll(&ids(&["A"])).await;
        assert_eq!(report.refreshed, ids(&["A"]));
    }

    #[tokio::test]
    async fn snapshot_serves_as_status_view() {
        let source = Arc::new(ScriptedSource::default());
        source.set("A", "up");
        let monitor = Arc::new(StatusMonitor::new(source));
        monitor.poll(&ids(&["A"])).await;

        let view: Arc<dyn StatusView> = monitor;
        assert_eq!(
            view.snapshot().status_of(&IxpId::from("A")),
            IxpStatus::Observed("up".into())
        );
    }
}
