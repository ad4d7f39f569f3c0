use async_trait::async_trait;
use ixp_gate_domain::config::GatewayConfig;
use ixp_gate_domain::gateway::{
    CapturedPayment, CreateOrderRequest, GatewayError, GatewayOrder, PaymentGateway,
};
use ixp_gate_domain::model::OrderId;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use crate::signature::SignatureVerifier;
use crate::types::{CreateOrderBody, ErrorResponse, OrderResponse, PaymentCollection};

/// [`PaymentGateway`] backed by the gateway's REST API.
pub struct HttpPaymentGateway {
    client: Client,
    orders_url: String,
    payments_url: String,
    key_id: String,
    key_secret: String,
    verifier: SignatureVerifier,
}

impl HttpPaymentGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|err| GatewayError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            orders_url: format!("{}/v1/orders", config.base_url()),
            payments_url: format!("{}/v1/payments", config.base_url()),
            key_id: config.key_id().to_string(),
            key_secret: config.key_secret().to_string(),
            verifier: SignatureVerifier::new(config.key_secret().as_bytes()),
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn create_order(
        &self,
        request: &CreateOrderRequest,
    ) -> Result<GatewayOrder, GatewayError> {
        let response = self
            .client
            .post(&self.orders_url)
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&CreateOrderBody::from(request))
            .send()
            .await
            .map_err(|err| transport_error("create_order", err))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, text));
        }

        let parsed: OrderResponse = response
            .json()
            .await
            .map_err(|err| GatewayError::Malformed(err.to_string()))?;
        let order_id =
            OrderId::parse(&parsed.id).map_err(|err| GatewayError::Malformed(err.to_string()))?;
        debug!(order_id = %order_id, receipt = %request.receipt, "gateway order created");

        Ok(GatewayOrder {
            order_id,
            amount_minor: parsed.amount,
            currency: parsed.currency,
            status: parsed.status,
        })
    }

    async fn verify_signature(
        &self,
        order_id: &OrderId,
        payment_id: &str,
        signature: &str,
    ) -> Result<(), GatewayError> {
        self.verifier.verify(order_id, payment_id, signature)
    }

    async fn captured_payments(&self) -> Result<Vec<CapturedPayment>, GatewayError> {
        let response = self
            .client
            .get(&self.payments_url)
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .query(&[("status", "captured")])
            .send()
            .await
            .map_err(|err| transport_error("captured_payments", err))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, text));
        }

        let parsed: PaymentCollection = response
            .json()
            .await
            .map_err(|err| GatewayError::Malformed(err.to_string()))?;

        // The filter is advisory on some gateway versions, so re-check it.
        let mut captured = Vec::new();
        for payment in parsed.items {
            if payment.status != "captured" {
                continue;
            }
            let Some(raw_order) = payment.order_id else {
                warn!(payment_id = %payment.id, "captured payment has no order, skipping");
                continue;
            };
            let order_id = OrderId::parse(&raw_order)
                .map_err(|err| GatewayError::Malformed(err.to_string()))?;
            captured.push(CapturedPayment {
                payment_id: payment.id,
                order_id,
                amount_minor: payment.amount,
                currency: payment.currency,
            });
        }
        debug!(count = captured.len(), "fetched captured payments");
        Ok(captured)
    }
}

fn transport_error(operation: &'static str, err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout { operation }
    } else {
        GatewayError::Transport(err.to_string())
    }
}

/// Server-side failures and throttling are transient; other statuses are
/// final rejections.
fn status_error(status: StatusCode, body: String) -> GatewayError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return GatewayError::Transport(format!("gateway returned {status}"));
    }
    let message = match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(parsed) => match parsed.error.code {
            Some(code) => format!("{code}: {}", parsed.error.description),
            None => parsed.error.description,
        },
        Err(_) => body,
    };
    GatewayError::Rejected {
        status: status.as_u16(),
        message,
    }
}
