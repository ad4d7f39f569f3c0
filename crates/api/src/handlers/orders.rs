use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use ixp_gate_domain::model::{OrderId, OrderStatus, PaymentOrder};
use ixp_gate_domain::services::ReconciliationReport;
use metrics::counter;
use serde::{Deserialize, Serialize};
use strum_macros::AsRefStr;

use crate::state::AppState;

use super::ApiError;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderState {
    Created,
    Verified,
    Failed,
}

impl From<OrderStatus> for OrderState {
    fn from(status: OrderStatus) -> Self {
        match status {
            OrderStatus::Created => Self::Created,
            OrderStatus::Verified => Self::Verified,
            OrderStatus::Failed => Self::Failed,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub payer: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderResponse {
    pub order_id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub payer: String,
    pub status: OrderState,
    pub rejected_attempts: u32,
    pub payment_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
}

impl OrderResponse {
    fn new(order: PaymentOrder, checkout_url: Option<String>) -> Self {
        Self {
            order_id: order.order_id.into_inner(),
            amount_minor: order.amount_minor,
            currency: order.currency.as_str().to_string(),
            payer: order.payer,
            status: order.status.into(),
            rejected_attempts: order.rejected_attempts,
            payment_id: order.payment_id,
            created_at: order.created_at,
            settled_at: order.settled_at,
            checkout_url,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub order_id: String,
    pub payment_id: String,
    pub signature: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum VerifyOutcome {
    Success,
    Failure,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub status: VerifyOutcome,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DiscrepancyView {
    pub kind: String,
    pub order_id: String,
    pub payment_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReconciliationResponse {
    pub settled: Vec<String>,
    pub already_settled: usize,
    pub discrepancies: Vec<DiscrepancyView>,
}

impl From<ReconciliationReport> for ReconciliationResponse {
    fn from(report: ReconciliationReport) -> Self {
        Self {
            settled: report.settled.into_iter().map(OrderId::into_inner).collect(),
            already_settled: report.already_settled,
            discrepancies: report
                .discrepancies
                .into_iter()
                .map(|discrepancy| DiscrepancyView {
                    kind: discrepancy.kind.as_ref().to_string(),
                    order_id: discrepancy.order_id.into_inner(),
                    payment_id: discrepancy.payment_id,
                })
                .collect(),
        }
    }
}

pub async fn create_order_handler(
    state: web::Data<AppState>,
    payload: web::Json<CreateOrderRequest>,
) -> Result<HttpResponse, ApiError> {
    let request = payload.into_inner();
    let created = state
        .ledger()
        .create_order(request.amount, &request.currency, &request.payer)
        .await
        .inspect_err(|_| {
            counter!("api_order_requests_total", "endpoint" => "create", "status" => "error")
                .increment(1);
        })?;
    counter!("api_order_requests_total", "endpoint" => "create", "status" => "created")
        .increment(1);
    Ok(HttpResponse::Created().json(OrderResponse::new(created.order, created.checkout_url)))
}

pub async fn verify_payment_handler(
    state: web::Data<AppState>,
    payload: web::Json<VerifyRequest>,
) -> Result<HttpResponse, ApiError> {
    let request = payload.into_inner();
    let order_id = OrderId::parse(&request.order_id)?;
    let verified = state
        .ledger()
        .verify_payment(&order_id, &request.payment_id, &request.signature)
        .await?;

    if verified {
        counter!("api_order_requests_total", "endpoint" => "verify", "status" => "success")
            .increment(1);
        Ok(HttpResponse::Ok().json(VerifyResponse {
            status: VerifyOutcome::Success,
        }))
    } else {
        counter!("api_order_requests_total", "endpoint" => "verify", "status" => "failure")
            .increment(1);
        Ok(HttpResponse::BadRequest().json(VerifyResponse {
            status: VerifyOutcome::Failure,
        }))
    }
}

pub async fn order_status_handler(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let order_id = OrderId::parse(&path.into_inner())?;
    let Some(order) = state.ledger().find_order(&order_id).await? else {
        counter!("api_order_requests_total", "endpoint" => "status", "status" => "not_found")
            .increment(1);
        return Err(ApiError::NotFound);
    };
    let status = OrderState::from(order.status);
    counter!(
        "api_order_requests_total",
        "endpoint" => "status",
        "status" => status.as_ref().to_owned()
    )
    .increment(1);
    let checkout_url = match status {
        OrderState::Created => state
            .ledger()
            .config()
            .checkout_url(&order.currency)
            .map(str::to_string),
        _ => None,
    };
    Ok(HttpResponse::Ok().json(OrderResponse::new(order, checkout_url)))
}

pub async fn reconcile_handler(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let report = state.ledger().reconcile().await?;
    Ok(HttpResponse::Ok().json(ReconciliationResponse::from(report)))
}
