pub mod access;
pub mod ixps;
pub mod metrics;
pub mod orders;

pub use access::{access_handler, access_status_handler, release_access_handler};
pub use ixps::{ixp_status_handler, prioritize_handler};
pub use metrics::metrics_handler;
pub use orders::{
    create_order_handler, order_status_handler, reconcile_handler, verify_payment_handler,
};

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use ixp_gate_domain::model::IdFormatError;
use ixp_gate_domain::services::{AdmissionError, LedgerError};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdFormatError),
    #[error(transparent)]
    Admission(#[from] AdmissionError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("not found")]
    NotFound,
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidId(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Admission(AdmissionError::AlreadyAccessed { .. }) => StatusCode::CONFLICT,
            ApiError::Admission(AdmissionError::Persistence(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Ledger(err) => match err {
                LedgerError::InvalidAmount(_) | LedgerError::InvalidCurrency(_) => {
                    StatusCode::BAD_REQUEST
                }
                LedgerError::Gateway { .. } => StatusCode::BAD_GATEWAY,
                LedgerError::UnknownOrder(_) => StatusCode::NOT_FOUND,
                LedgerError::Persistence { .. } | LedgerError::Aborted(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "request failed");
        }
        let remote_order_id = match self {
            ApiError::Ledger(err) => err.remote_order_id().map(|id| id.as_str().to_string()),
            _ => None,
        };
        HttpResponse::build(status).json(ErrorBody {
            error: self.to_string(),
            remote_order_id,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_order_id: Option<String>,
}
