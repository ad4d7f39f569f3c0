//! Standalone monitor binary that keeps polling exchange point health.

use std::io;

use ixp_gate_domain::config::MonitorConfig;
use ixp_gate_domain::services::telemetry::{init_telemetry, TelemetryConfig};
use ixp_gate_monitor::{spawn_monitor, MonitorError};
use tracing::info;

#[tokio::main]
async fn main() -> io::Result<()> {
    if let Err(err) = bootstrap().await {
        eprintln!("[monitor] bootstrap failed: {err}");
        return Err(io::Error::other(err.to_string()));
    }

    Ok(())
}

async fn bootstrap() -> Result<(), MonitorError> {
    let config = MonitorConfig::load_from_env()?;
    let telemetry_config = TelemetryConfig::from_env("MONITOR");
    let _telemetry = init_telemetry(&telemetry_config)?;
    info!(
        ixps = config.ixps().len(),
        interval_secs = config.poll_interval().as_secs(),
        "starting exchange point monitor"
    );

    let (_monitor, handle) = spawn_monitor(&config)?;
    tokio::select! {
        _ = handle => {}
        _ = tokio::signal::ctrl_c() => info!("shutdown requested"),
    }
    Ok(())
}
