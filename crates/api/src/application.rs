use std::{io, sync::Arc};

use actix_web::{middleware::Logger, web, App, HttpServer};
use ixp_gate_domain::config::{
    AdmissionConfig, ApiConfig, ConfigError, GatewayConfig, LedgerConfig, MonitorConfig,
};
use ixp_gate_domain::gateway::GatewayError;
use ixp_gate_domain::model::StatusSnapshot;
use ixp_gate_domain::services::{
    telemetry::{init_telemetry, TelemetryConfig, TelemetryError},
    StatusView,
};
use ixp_gate_domain::storage::StorageError;
use ixp_gate_gateway::HttpPaymentGateway;
use ixp_gate_monitor::{spawn_monitor, MonitorError};
use ixp_gate_storage::SeaOrmStorage;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    handlers::{
        access_handler, access_status_handler, create_order_handler, ixp_status_handler,
        metrics_handler, order_status_handler, prioritize_handler, reconcile_handler,
        release_access_handler, verify_payment_handler,
    },
    state::AppState,
};

pub async fn run() -> Result<(), BootstrapError> {
    let config = ApiConfig::load_from_env()?;
    let ledger_config = LedgerConfig::load_from_env()?;
    let gateway_config = GatewayConfig::load_from_env()?;
    let admission_config = AdmissionConfig::load_from_env()?;
    let monitor_config = MonitorConfig::load_if_configured()?;

    let telemetry_config = TelemetryConfig::from_env("API");
    let telemetry = init_telemetry(&telemetry_config)?;

    let storage = SeaOrmStorage::connect(config.database_url()).await?;
    let gateway = Arc::new(HttpPaymentGateway::new(&gateway_config)?);

    // The embedded monitor keeps polling for the lifetime of the process.
    let status: Arc<dyn StatusView> = match monitor_config {
        Some(monitor_config) => {
            let (monitor, _poller) = spawn_monitor(&monitor_config)?;
            info!(ixps = monitor_config.ixps().len(), "embedded status monitor started");
            monitor
        }
        None => {
            warn!("MONITOR_HEALTH_BASE_URL not set; every exchange point reports unknown");
            Arc::new(StatusSnapshot::default())
        }
    };

    let state = AppState::new(
        storage,
        gateway,
        status,
        ledger_config,
        &admission_config,
        telemetry,
    );

    // Operator routes move to the internal listener when one is configured.
    let operator_routes_on_public = !config.has_internal_listener();

    let public_state = state.clone();
    let mut public_server = HttpServer::new(move || {
        let mut app = App::new()
            .app_data(web::Data::new(public_state.clone()))
            .wrap(Logger::default())
            .route("/api/v1/orders", web::post().to(create_order_handler))
            .route("/api/v1/orders/verify", web::post().to(verify_payment_handler))
            .route("/api/v1/orders/{order_id}", web::get().to(order_status_handler))
            .route("/api/v1/access", web::post().to(access_handler))
            .route(
                "/api/v1/access/{network_id}",
                web::get().to(access_status_handler),
            )
            .route("/api/v1/ixps/status", web::get().to(ixp_status_handler))
            .route("/api/v1/ixps/prioritize", web::post().to(prioritize_handler));

        if operator_routes_on_public {
            app = app
                .route("/metrics", web::get().to(metrics_handler))
                .route(
                    "/api/v1/access/{network_id}/release",
                    web::post().to(release_access_handler),
                )
                .route("/api/v1/reconciliation", web::post().to(reconcile_handler));
        }

        app
    });

    #[cfg(unix)]
    {
        if let Some(socket) = config.api_unix_socket() {
            cleanup_socket(socket)?;
            public_server = public_server.bind_uds(socket)?;
        } else {
            public_server = public_server.bind(config.api_bind_address())?;
        }
    }

    #[cfg(not(unix))]
    {
        if let Some(socket) = config.api_unix_socket() {
            return Err(BootstrapError::Io(io::Error::other(format!(
                "unix socket '{socket}' requested but this platform does not support it"
            ))));
        }
        public_server = public_server.bind(config.api_bind_address())?;
    }

    let public_server = public_server.run();

    let internal_server = if config.has_internal_listener() {
        let internal_state = state.clone();
        let mut internal_server = HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(internal_state.clone()))
                .wrap(Logger::default())
                .route("/metrics", web::get().to(metrics_handler))
                .route(
                    "/api/v1/access/{network_id}/release",
                    web::post().to(release_access_handler),
                )
                .route("/api/v1/reconciliation", web::post().to(reconcile_handler))
        });

        #[cfg(unix)]
        {
            if let Some(socket) = config.internal_unix_socket() {
                cleanup_socket(socket)?;
                internal_server = internal_server.bind_uds(socket)?;
            } else if let Some(addr) = config.internal_bind_address() {
                internal_server = internal_server.bind(addr)?;
            } else {
                return Err(BootstrapError::Io(io::Error::other(
                    "internal listener configured but no bind target provided",
                )));
            }
        }

        #[cfg(not(unix))]
        {
            if let Some(socket) = config.internal_unix_socket() {
                return Err(BootstrapError::Io(io::Error::other(format!(
                    "internal unix socket '{socket}' requested but this platform does not support it"
                ))));
            }
            if let Some(addr) = config.internal_bind_address() {
                internal_server = internal_server.bind(addr)?;
            } else {
                return Err(BootstrapError::Io(io::Error::other(
                    "internal listener configured but no bind target provided",
                )));
            }
        }

        Some(internal_server.run())
    } else {
        None
    };

    info!(bind = config.api_bind_address(), "api listening");
    if let Some(internal) = internal_server {
        tokio::try_join!(public_server, internal)?;
    } else {
        public_server.await?;
    }

    Ok(())
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("payment gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("monitor error: {0}")]
    Monitor(#[from] MonitorError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        /// Removes a stale socket file left by an unclean shutdown so the
        /// listener can bind again.
        fn cleanup_socket(path: &str) -> io::Result<()> {
            let socket_path = std::path::Path::new(path);
            if socket_path.exists() {
                std::fs::remove_file(socket_path)?;
            }
            Ok(())
        }
    } else {
        #[allow(dead_code)]
        fn cleanup_socket(_path: &str) -> io::Result<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    #[cfg(unix)]
    #[actix_web::test]
    async fn cleanup_socket_removes_stale_file() {
        use super::cleanup_socket;

        let path = std::env::temp_dir().join(format!(
            "ixp-gate-test-{}-{}.sock",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::SystemTime::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::write(&path, b"stub").expect("write socket file");
        cleanup_socket(path.to_str().unwrap()).expect("cleanup succeeds");
        assert!(!path.exists());
        cleanup_socket(path.to_str().unwrap()).expect("missing file is fine");
    }
}
