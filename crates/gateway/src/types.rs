use ixp_gate_domain::gateway::CreateOrderRequest;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct CreateOrderBody<'a> {
    pub amount: i64,
    pub currency: &'a str,
    pub receipt: &'a str,
    pub payment_capture: u8,
    pub notes: OrderNotes<'a>,
}

#[derive(Debug, Serialize)]
pub struct OrderNotes<'a> {
    pub payer: &'a str,
}

impl<'a> From<&'a CreateOrderRequest> for CreateOrderBody<'a> {
    fn from(request: &'a CreateOrderRequest) -> Self {
        Self {
            amount: request.amount_minor,
            currency: request.currency.as_str(),
            receipt: &request.receipt,
            payment_capture: u8::from(request.capture_immediately),
            notes: OrderNotes {
                payer: &request.payer,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OrderResponse {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct PaymentCollection {
    #[serde(default)]
    pub items: Vec<PaymentEntity>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentEntity {
    pub id: String,
    #[serde(default)]
    pub order_id: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub code: Option<String>,
    pub description: String,
}
