//! Library entrypoint for embedding the status monitor inside other binaries
//! (e.g., the API process). The binary in `main.rs` runs it standalone.

pub mod health;
pub mod monitor;
pub mod worker;

pub use health::{HealthError, HealthSource, HttpHealthSource};
pub use monitor::{PollReport, StatusMonitor};
pub use worker::{build_http_source, run_monitor, spawn_monitor, MonitorError};
