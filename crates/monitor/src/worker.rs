use std::sync::Arc;
use std::time::Duration;

use ixp_gate_domain::{
    config::{ConfigError, MonitorConfig},
    model::IxpId,
    services::telemetry::TelemetryError,
};
use metrics::counter;
use reqwest::Client;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::health::{HealthError, HttpHealthSource};
use crate::monitor::StatusMonitor;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("health source error: {0}")]
    Health(#[from] HealthError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
}

impl From<reqwest::Error> for MonitorError {
    fn from(value: reqwest::Error) -> Self {
        Self::Health(HealthError::Transport(value.to_string()))
    }
}

pub fn build_http_source(config: &MonitorConfig) -> Result<HttpHealthSource, MonitorError> {
    let client = Client::builder().timeout(config.request_timeout()).build()?;
    Ok(HttpHealthSource::new(client, config.health_base_url())?)
}

/// Polls `ixp_ids` forever, sleeping `interval` between rounds.
pub async fn run_monitor(monitor: Arc<StatusMonitor>, ixp_ids: Vec<IxpId>, interval: Duration) {
    if ixp_ids.is_empty() {
        warn!("no exchange points configured; status cache stays empty");
    }
    loop {
        let report = monitor.poll(&ixp_ids).await;
        counter!("monitor_rounds_total").increment(1);
        if report.failed.is_empty() {
            info!(refreshed = report.refreshed.len(), "poll round complete");
        } else {
            warn!(
                refreshed = report.refreshed.len(),
                failed = ?report.failed,
                "poll round complete with failures"
            );
        }
        sleep(interval).await;
    }
}

/// Builds the HTTP-backed monitor and starts its poll loop on the runtime.
pub fn spawn_monitor(
    config: &MonitorConfig,
) -> Result<(Arc<StatusMonitor>, JoinHandle<()>), MonitorError> {
    let source = build_http_source(config)?;
    let monitor = Arc::new(StatusMonitor::from_config(Arc::new(source), config));
    let handle = tokio::spawn(run_monitor(
        Arc::clone(&monitor),
        config.ixps().to_vec(),
        config.poll_interval(),
    ));
    Ok((monitor, handle))
}
