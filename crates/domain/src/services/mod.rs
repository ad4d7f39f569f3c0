//! Core services: admission control, the payment ledger, and the retry and
//! telemetry helpers they share with the binaries.

pub mod access_table;
pub mod admission;
pub mod ledger;
pub mod retry;
pub mod telemetry;

pub use access_table::InMemoryAccessStore;
pub use admission::{
    AdmissionController, AdmissionError, LexicographicStatus, PriorityPolicy, StatusView,
};
pub use ledger::{
    CreatedOrder, Discrepancy, DiscrepancyKind, LedgerError, PaymentLedger, ReconciliationReport,
};
pub use retry::RetryPolicy;
pub use telemetry::*;
