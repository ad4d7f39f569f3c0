//! Contract for the remote payment gateway. The ledger only ever talks to the
//! gateway through this trait; the HTTP client lives in the gateway crate.

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{Currency, OrderId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOrderRequest {
    pub amount_minor: i64,
    pub currency: Currency,
    pub capture_immediately: bool,
    /// Caller-generated idempotency token, reused across retries of the same
    /// logical order.
    pub receipt: String,
    pub payer: String,
}

/// Order descriptor returned by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayOrder {
    pub order_id: OrderId,
    pub amount_minor: i64,
    pub currency: String,
    pub status: String,
}

/// A payment the gateway reports as captured against one of its orders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedPayment {
    pub payment_id: String,
    pub order_id: OrderId,
    pub amount_minor: i64,
    pub currency: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("{operation} timed out")]
    Timeout { operation: &'static str },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("gateway rejected request with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("malformed gateway response: {0}")]
    Malformed(String),
    #[error("payment signature does not match")]
    SignatureMismatch,
}

impl GatewayError {
    /// Timeouts and transport failures may succeed on another attempt;
    /// rejections and mismatches will not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Transport(_))
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_order(&self, request: &CreateOrderRequest) -> Result<GatewayOrder, GatewayError>;

    /// Succeeds when `signature` is the gateway's authentication code over
    /// `(order_id, payment_id)`; fails with [`GatewayError::SignatureMismatch`]
    /// otherwise.
    async fn verify_signature(
        &self,
        order_id: &OrderId,
        payment_id: &str,
        signature: &str,
    ) -> Result<(), GatewayError>;

    /// Captured payments known to the gateway, used to reconcile local
    /// orders against what was actually charged.
    async fn captured_payments(&self) -> Result<Vec<CapturedPayment>, GatewayError>;
}
