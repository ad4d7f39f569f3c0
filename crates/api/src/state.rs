use std::sync::Arc;

use ixp_gate_domain::config::{AdmissionConfig, LedgerConfig};
use ixp_gate_domain::gateway::PaymentGateway;
use ixp_gate_domain::services::{
    telemetry::TelemetryGuard, AdmissionController, PaymentLedger, StatusView,
};
use ixp_gate_storage::SeaOrmStorage;

pub type Admission = AdmissionController<SeaOrmStorage>;
pub type Ledger = PaymentLedger<SeaOrmStorage>;

#[derive(Clone)]
pub struct AppState {
    admission: Admission,
    ledger: Ledger,
    status: Arc<dyn StatusView>,
    telemetry: TelemetryGuard,
}

impl AppState {
    pub fn new(
        storage: SeaOrmStorage,
        gateway: Arc<dyn PaymentGateway>,
        status: Arc<dyn StatusView>,
        ledger_config: LedgerConfig,
        admission_config: &AdmissionConfig,
        telemetry: TelemetryGuard,
    ) -> Self {
        let storage = Arc::new(storage);
        let admission = AdmissionController::new(Arc::clone(&storage), Arc::clone(&status))
            .with_lease(admission_config.lease());
        let ledger = PaymentLedger::new(storage, gateway, ledger_config);
        Self {
            admission,
            ledger,
            status,
            telemetry,
        }
    }

    pub fn admission(&self) -> &Admission {
        &self.admission
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn status(&self) -> &dyn StatusView {
        self.status.as_ref()
    }

    pub fn telemetry(&self) -> &TelemetryGuard {
        &self.telemetry
    }
}
