//! Payment order lifecycle: gateway order creation, local persistence,
//! signature-gated settlement and reconciliation against captured payments.
//!
//! Remote calls run on a detached task so that a caller going away never
//! leaves a half-applied transition behind: the gateway call finishes, and its
//! outcome is applied only if the stored order is still in the state the call
//! started from.

use std::{sync::Arc, time::Instant};

use chrono::Utc;
use metrics::{counter, histogram};
use rand::Rng;
use strum_macros::AsRefStr;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::config::LedgerConfig;
use crate::gateway::{
    CapturedPayment, CreateOrderRequest, GatewayError, GatewayOrder, PaymentGateway,
};
use crate::model::{to_minor_units, AmountError, NewOrder, OrderId, OrderStatus, PaymentOrder};
use crate::services::retry::RetryPolicy;
use crate::storage::{OrderStore, StorageError};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid amount: {0}")]
    InvalidAmount(#[from] AmountError),
    #[error("currency `{0}` is not accepted")]
    InvalidCurrency(String),
    #[error("gateway {operation} failed: {source}")]
    Gateway {
        operation: &'static str,
        #[source]
        source: GatewayError,
    },
    #[error("failed to persist order (remote order: {remote_order_id:?}): {source}")]
    Persistence {
        remote_order_id: Option<OrderId>,
        #[source]
        source: StorageError,
    },
    #[error("order `{0}` not found")]
    UnknownOrder(OrderId),
    #[error("ledger task aborted: {0}")]
    Aborted(String),
}

impl LedgerError {
    /// Gateway-side order that exists without a matching local record.
    pub fn remote_order_id(&self) -> Option<&OrderId> {
        match self {
            Self::Persistence {
                remote_order_id, ..
            } => remote_order_id.as_ref(),
            _ => None,
        }
    }

    fn persistence(remote_order_id: Option<&OrderId>, source: StorageError) -> Self {
        Self::Persistence {
            remote_order_id: remote_order_id.cloned(),
            source,
        }
    }
}

/// A freshly created order plus the hosted checkout link for its currency,
/// when one is configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedOrder {
    pub order: PaymentOrder,
    pub checkout_url: Option<String>,
}

/// Why a captured payment could not be matched to a local order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum DiscrepancyKind {
    /// The gateway holds an order this ledger never recorded.
    RemoteOnly,
    /// Captured amount or currency differs from the recorded order.
    AmountMismatch,
    CapturedOnFailedOrder,
    /// The order was already settled by another payment.
    SettledByOtherPayment,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discrepancy {
    pub kind: DiscrepancyKind,
    pub order_id: OrderId,
    pub payment_id: String,
}

/// Outcome of one reconciliation sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationReport {
    /// Created orders moved to Verified by this sweep.
    pub settled: Vec<OrderId>,
    pub already_settled: usize,
    pub discrepancies: Vec<Discrepancy>,
}

impl ReconciliationReport {
    fn flag(&mut self, kind: DiscrepancyKind, payment: CapturedPayment) {
        counter!("ledger_reconciled_payments_total", "result" => kind.as_ref().to_owned())
            .increment(1);
        warn!(
            kind = kind.as_ref(),
            order_id = %payment.order_id,
            payment_id = %payment.payment_id,
            "captured payment needs attention"
        );
        self.discrepancies.push(Discrepancy {
            kind,
            order_id: payment.order_id,
            payment_id: payment.payment_id,
        });
    }
}

pub struct PaymentLedger<S> {
    inner: Arc<LedgerInner<S>>,
}

struct LedgerInner<S> {
    store: Arc<S>,
    gateway: Arc<dyn PaymentGateway>,
    config: LedgerConfig,
    retry: RetryPolicy,
}

impl<S> Clone for PaymentLedger<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> PaymentLedger<S>
where
    S: OrderStore + 'static,
{
    pub fn new(store: Arc<S>, gateway: Arc<dyn PaymentGateway>, config: LedgerConfig) -> Self {
        let retry = if config.retry_attempts() > 1 {
            RetryPolicy::network(config.retry_attempts())
        } else {
            RetryPolicy::single_attempt()
        };
        Self::with_retry_policy(store, gateway, config, retry)
    }

    pub fn with_retry_policy(
        store: Arc<S>,
        gateway: Arc<dyn PaymentGateway>,
        config: LedgerConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(LedgerInner {
                store,
                gateway,
                config,
                retry,
            }),
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.inner.config
    }

    /// Validates locally, creates the order at the gateway, then records it as
    /// `Created`. Nothing is written when the gateway call fails.
    pub async fn create_order(
        &self,
        amount_major: i64,
        currency: &str,
        payer: &str,
    ) -> Result<CreatedOrder, LedgerError> {
        let amount_minor = to_minor_units(amount_major).map_err(|err| {
            counter!("ledger_orders_total", "result" => "invalid_amount").increment(1);
            LedgerError::from(err)
        })?;
        let currency = self.inner.config.accepted_currency(currency).ok_or_else(|| {
            counter!("ledger_orders_total", "result" => "invalid_currency").increment(1);
            LedgerError::InvalidCurrency(currency.trim().to_string())
        })?;

        let request = CreateOrderRequest {
            amount_minor,
            currency,
            capture_immediately: true,
            receipt: new_receipt(),
            payer: payer.trim().to_string(),
        };

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.create_and_record(request).await })
            .await
            .map_err(|err| LedgerError::Aborted(err.to_string()))?
    }

    /// Returns `true` once the order is verified, `false` when the signature
    /// is rejected or the order already failed.
    pub async fn verify_payment(
        &self,
        order_id: &OrderId,
        payment_id: &str,
        signature: &str,
    ) -> Result<bool, LedgerError> {
        let inner = Arc::clone(&self.inner);
        let order_id = order_id.clone();
        let payment_id = payment_id.trim().to_string();
        let signature = signature.trim().to_string();
        tokio::spawn(async move { inner.verify(order_id, payment_id, signature).await })
            .await
            .map_err(|err| LedgerError::Aborted(err.to_string()))?
    }

    /// Sweeps the gateway's captured payments: settles matching `Created`
    /// orders and reports every payment that has no consistent local order.
    pub async fn reconcile(&self) -> Result<ReconciliationReport, LedgerError> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.reconcile().await })
            .await
            .map_err(|err| LedgerError::Aborted(err.to_string()))?
    }

    pub async fn find_order(&self, order_id: &OrderId) -> Result<Option<PaymentOrder>, LedgerError> {
        self.inner
            .store
            .find_order(order_id)
            .await
            .map_err(|err| LedgerError::persistence(None, err))
    }
}

impl<S> LedgerInner<S>
where
    S: OrderStore,
{
    async fn create_and_record(
        &self,
        request: CreateOrderRequest,
    ) -> Result<CreatedOrder, LedgerError> {
        let remote = self.remote_create(&request).await.map_err(|source| {
            counter!("ledger_orders_total", "result" => "gateway_error").increment(1);
            error!(
                operation = "create_order",
                receipt = %request.receipt,
                currency = %request.currency,
                error = %source,
                "gateway order creation failed"
            );
            LedgerError::Gateway {
                operation: "create_order",
                source,
            }
        })?;

        let order = self
            .store
            .insert_order(NewOrder {
                order_id: remote.order_id.clone(),
                amount_minor: request.amount_minor,
                currency: request.currency.clone(),
                payer: request.payer.clone(),
                created_at: Utc::now(),
            })
            .await
            .map_err(|source| {
                counter!("ledger_orders_total", "result" => "persistence_error").increment(1);
                error!(
                    order_id = %remote.order_id,
                    error = %source,
                    "gateway order created but not recorded"
                );
                LedgerError::persistence(Some(&remote.order_id), source)
            })?;

        counter!("ledger_orders_total", "result" => "created").increment(1);
        info!(
            order_id = %order.order_id,
            amount_minor = order.amount_minor,
            currency = %order.currency,
            "payment order created"
        );
        let checkout_url = self
            .config
            .checkout_url(&order.currency)
            .map(str::to_string);
        Ok(CreatedOrder {
            order,
            checkout_url,
        })
    }

    async fn remote_create(&self, request: &CreateOrderRequest) -> Result<GatewayOrder, GatewayError> {
        let started = Instant::now();
        let result = self
            .retry
            .retry_if(
                |attempt| async move {
                    if attempt > 0 {
                        warn!(receipt = %request.receipt, attempt, "retrying gateway order creation");
                    }
                    timeout(
                        self.config.gateway_timeout(),
                        self.gateway.create_order(request),
                    )
                    .await
                    .unwrap_or(Err(GatewayError::Timeout {
                        operation: "create_order",
                    }))
                },
                GatewayError::is_retryable,
            )
            .await;
        histogram!("ledger_gateway_latency_seconds", "operation" => "create_order")
            .record(started.elapsed().as_secs_f64());

        let remote = result?;
        if remote.amount_minor != request.amount_minor
            || !remote.currency.eq_ignore_ascii_case(request.currency.as_str())
        {
            return Err(GatewayError::Malformed(format!(
                "order {} echoed {} {} for a request of {} {}",
                remote.order_id,
                remote.amount_minor,
                remote.currency,
                request.amount_minor,
                request.currency
            )));
        }
        Ok(remote)
    }

    async fn verify(
        &self,
        order_id: OrderId,
        payment_id: String,
        signature: String,
    ) -> Result<bool, LedgerError> {
        let current = self.load(&order_id).await?;
        if current.status == OrderStatus::Failed {
            counter!("ledger_verifications_total", "result" => "already_failed").increment(1);
            return Ok(false);
        }

        match self.remote_verify(&order_id, &payment_id, &signature).await {
            Ok(()) => self.settle(&order_id, &payment_id).await,
            Err(GatewayError::SignatureMismatch) => {
                self.reject(&order_id).await?;
                Ok(false)
            }
            Err(source) => {
                counter!("ledger_verifications_total", "result" => "gateway_error").increment(1);
                error!(
                    operation = "verify_signature",
                    order_id = %order_id,
                    error = %source,
                    "signature verification failed"
                );
                Err(LedgerError::Gateway {
                    operation: "verify_signature",
                    source,
                })
            }
        }
    }

    async fn remote_verify(
        &self,
        order_id: &OrderId,
        payment_id: &str,
        signature: &str,
    ) -> Result<(), GatewayError> {
        let started = Instant::now();
        let result = self
            .retry
            .retry_if(
                |_| async move {
                    timeout(
                        self.config.gateway_timeout(),
                        self.gateway.verify_signature(order_id, payment_id, signature),
                    )
                    .await
                    .unwrap_or(Err(GatewayError::Timeout {
                        operation: "verify_signature",
                    }))
                },
                GatewayError::is_retryable,
            )
            .await;
        histogram!("ledger_gateway_latency_seconds", "operation" => "verify_signature")
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn settle(&self, order_id: &OrderId, payment_id: &str) -> Result<bool, LedgerError> {
        let updated = self
            .store
            .mark_verified(order_id, payment_id, Utc::now())
            .await
            .map_err(|err| LedgerError::persistence(Some(order_id), err))?;
        if updated.is_some() {
            counter!("ledger_verifications_total", "result" => "verified").increment(1);
            info!(order_id = %order_id, payment_id, "payment verified");
            return Ok(true);
        }

        // Lost the conditional update: succeed only if the winning settlement
        // was for this same payment.
        let current = self.load(order_id).await?;
        let result = match current.status {
            OrderStatus::Verified if current.payment_id.as_deref() == Some(payment_id) => {
                "already_verified"
            }
            OrderStatus::Verified => {
                warn!(
                    order_id = %order_id,
                    payment_id,
                    settled_payment_id = ?current.payment_id,
                    "order already settled by a different payment"
                );
                "settled_by_other_payment"
            }
            _ => "already_failed",
        };
        counter!("ledger_verifications_total", "result" => result).increment(1);
        Ok(result == "already_verified")
    }

    async fn reject(&self, order_id: &OrderId) -> Result<(), LedgerError> {
        let updated = self
            .store
            .record_rejection(order_id, self.config.max_rejections(), Utc::now())
            .await
            .map_err(|err| LedgerError::persistence(Some(order_id), err))?;
        counter!("ledger_verifications_total", "result" => "rejected").increment(1);
        match updated {
            Some(order) if order.status == OrderStatus::Failed => warn!(
                order_id = %order_id,
                rejected_attempts = order.rejected_attempts,
                "order failed after repeated signature rejections"
            ),
            Some(order) => warn!(
                order_id = %order_id,
                rejected_attempts = order.rejected_attempts,
                "payment signature rejected"
            ),
            None => warn!(order_id = %order_id, "payment signature rejected for settled order"),
        }
        Ok(())
    }

    async fn reconcile(&self) -> Result<ReconciliationReport, LedgerError> {
        let captured = self.remote_captured().await.map_err(|source| {
            error!(operation = "captured_payments", error = %source, "listing captured payments failed");
            LedgerError::Gateway {
                operation: "captured_payments",
                source,
            }
        })?;

        let mut report = ReconciliationReport::default();
        for payment in captured {
            let found = self
                .store
                .find_order(&payment.order_id)
                .await
                .map_err(|err| LedgerError::persistence(None, err))?;
            let Some(order) = found else {
                report.flag(DiscrepancyKind::RemoteOnly, payment);
                continue;
            };
            if order.amount_minor != payment.amount_minor
                || !payment.currency.eq_ignore_ascii_case(order.currency.as_str())
            {
                report.flag(DiscrepancyKind::AmountMismatch, payment);
                continue;
            }

            let order = if order.status == OrderStatus::Created {
                let updated = self
                    .store
                    .mark_verified(&order.order_id, &payment.payment_id, Utc::now())
                    .await
                    .map_err(|err| LedgerError::persistence(None, err))?;
                if updated.is_some() {
                    counter!("ledger_reconciled_payments_total", "result" => "settled").increment(1);
                    info!(
                        order_id = %payment.order_id,
                        payment_id = %payment.payment_id,
                        "order settled from captured payment"
                    );
                    report.settled.push(payment.order_id);
                    continue;
                }
                self.load(&order.order_id).await?
            } else {
                order
            };

            match order.status {
                OrderStatus::Verified
                    if order.payment_id.as_deref() == Some(payment.payment_id.as_str()) =>
                {
                    counter!("ledger_reconciled_payments_total", "result" => "already_settled")
                        .increment(1);
                    report.already_settled += 1;
                }
                OrderStatus::Verified => {
                    report.flag(DiscrepancyKind::SettledByOtherPayment, payment)
                }
                OrderStatus::Failed => report.flag(DiscrepancyKind::CapturedOnFailedOrder, payment),
                // Only reachable if the row changed under us; the next sweep
                // picks it up.
                OrderStatus::Created => {
                    warn!(order_id = %order.order_id, "order changed during reconciliation")
                }
            }
        }

        info!(
            settled = report.settled.len(),
            already_settled = report.already_settled,
            discrepancies = report.discrepancies.len(),
            "reconciliation finished"
        );
        Ok(report)
    }

    async fn remote_captured(&self) -> Result<Vec<CapturedPayment>, GatewayError> {
        let started = Instant::now();
        let result = self
            .retry
            .retry_if(
                |_| async move {
                    timeout(self.config.gateway_timeout(), self.gateway.captured_payments())
                        .await
                        .unwrap_or(Err(GatewayError::Timeout {
                            operation: "captured_payments",
                        }))
                },
                GatewayError::is_retryable,
            )
            .await;
        histogram!("ledger_gateway_latency_seconds", "operation" => "captured_payments")
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn load(&self, order_id: &OrderId) -> Result<PaymentOrder, LedgerError> {
        self.store
            .find_order(order_id)
            .await
            .map_err(|err| LedgerError::persistence(None, err))?
            .ok_or_else(|| LedgerError::UnknownOrder(order_id.clone()))
    }
}

fn new_receipt() -> String {
    let bytes: [u8; 12] = rand::thread_rng().gen();
    format!("rcpt_{}", hex::encode(bytes))
}
