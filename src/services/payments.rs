use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::Serialize;
use serde_json::json;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::order::{self, Entity as Order, OrderStatus};
use crate::entities::payment::{self, Entity as Payment, PaymentMethod, PaymentState};
use crate::entities::payment_transaction;
use crate::errors::ServiceError;
use crate::events::{outbox, Event, EventSender};
use crate::services::orders::append_history;

/// Smallest order total the gateway will accept, in VND
pub const MIN_PAYMENT_AMOUNT: Decimal = dec!(10000);
/// Largest order total the gateway will accept, in VND
pub const MAX_PAYMENT_AMOUNT: Decimal = dec!(500000000);

/// Inputs a strategy needs to build a hosted-checkout redirect
#[derive(Debug, Clone)]
pub struct PaymentUrlRequest {
    pub order_id: Uuid,
    pub amount: Decimal,
    pub client_ip: String,
}

/// Everything a verified success callback told us
#[derive(Debug, Clone)]
pub struct CallbackDetails {
    pub order_id: Uuid,
    pub amount: Decimal,
    pub transaction_id: String,
    pub order_info: Option<String>,
    pub bank_code: Option<String>,
    pub card_type: Option<String>,
    pub response_code: String,
    pub pay_date: Option<String>,
    pub raw: HashMap<String, String>,
}

/// What a provider callback turned out to be
#[derive(Debug, Clone)]
pub enum CallbackOutcome {
    /// Signature verified and the provider confirmed the charge
    Completed(CallbackDetails),
    /// Signature verified but the provider declined
    Declined {
        order_id: Uuid,
        response_code: String,
    },
    /// Signature did not verify; nothing in the payload can be trusted
    SignatureMismatch,
}

/// One payment provider integration.
///
/// Strategies are stateless: building a redirect URL writes nothing, and a
/// payment row is only created once `verify_callback` confirms a success.
pub trait PaymentStrategy: Send + Sync {
    fn method(&self) -> PaymentMethod;
    fn display_name(&self) -> &'static str;
    fn create_payment_url(&self, req: &PaymentUrlRequest) -> Result<String, ServiceError>;
    fn verify_callback(
        &self,
        params: &HashMap<String, String>,
    ) -> Result<CallbackOutcome, ServiceError>;
}

/// Payment orchestration across provider strategies.
///
/// Reconciliation is the critical path: a confirmed callback flips the
/// order, writes the payment row and its ledger entry, and enqueues the
/// confirmation event in one transaction, so a crash cannot leave a paid
/// order unconfirmed.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    strategies: HashMap<PaymentMethod, Arc<dyn PaymentStrategy>>,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        strategies: Vec<Arc<dyn PaymentStrategy>>,
    ) -> Self {
        let strategies = strategies.into_iter().map(|s| (s.method(), s)).collect();
        Self {
            db,
            event_sender,
            strategies,
        }
    }

    fn strategy(&self, method: PaymentMethod) -> Result<&Arc<dyn PaymentStrategy>, ServiceError> {
        self.strategies
            .get(&method)
            .ok_or_else(|| ServiceError::InvalidInput(format!("{} is not supported", method)))
    }

    /// The provider methods this deployment supports
    pub fn methods(&self) -> Vec<PaymentMethodInfo> {
        let mut methods: Vec<PaymentMethodInfo> = self
            .strategies
            .values()
            .map(|s| PaymentMethodInfo {
                method: s.method(),
                display_name: s.display_name().to_string(),
            })
            .collect();
        methods.sort_by_key(|m| m.method.to_string());
        methods
    }

    /// Builds the hosted-checkout redirect for an order.
    ///
    /// Stateless by design: nothing is persisted until the provider
    /// confirms the charge.
    ///
    /// # Errors
    ///
    /// `Conflict` when the order is already paid; `ValidationError` when
    /// the total falls outside the gateway's accepted range.
    #[instrument(skip(self))]
    pub async fn create_payment_url(
        &self,
        method: PaymentMethod,
        order_id: Uuid,
        client_ip: &str,
    ) -> Result<PaymentUrlResponse, ServiceError> {
        let strategy = self.strategy(method)?;

        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if order.payment_status == PaymentState::Completed {
            return Err(ServiceError::Conflict(format!(
                "Order {} has already been paid",
                order_id
            )));
        }
        if order.status == OrderStatus::Canceled {
            return Err(ServiceError::Conflict(format!(
                "Order {} has been canceled",
                order_id
            )));
        }
        if order.total_amount < MIN_PAYMENT_AMOUNT || order.total_amount > MAX_PAYMENT_AMOUNT {
            return Err(ServiceError::ValidationError(format!(
                "Payment amount must be between {} and {} VND",
                MIN_PAYMENT_AMOUNT, MAX_PAYMENT_AMOUNT
            )));
        }

        let payment_url = strategy.create_payment_url(&PaymentUrlRequest {
            order_id,
            amount: order.total_amount,
            client_ip: client_ip.to_string(),
        })?;

        info!(order_id = %order_id, method = %method, "payment url issued");
        Ok(PaymentUrlResponse {
            order_id,
            amount: order.total_amount,
            payment_url,
        })
    }

    /// Reconciles a provider callback against local state.
    ///
    /// Callbacks are verified by the strategy first. A confirmed success
    /// is applied in one transaction; replaying the same callback after
    /// the order is paid is a no-op that still reports success. Declines
    /// and signature mismatches write nothing.
    #[instrument(skip(self, params))]
    pub async fn reconcile_callback(
        &self,
        method: PaymentMethod,
        params: &HashMap<String, String>,
    ) -> Result<ReconcileResult, ServiceError> {
        let strategy = self.strategy(method)?;

        match strategy.verify_callback(params)? {
            CallbackOutcome::SignatureMismatch => Ok(ReconcileResult {
                success: false,
                order_id: None,
                payment_id: None,
                message: "Callback signature verification failed".to_string(),
            }),
            CallbackOutcome::Declined {
                order_id,
                response_code,
            } => {
                let reason = format!("Provider declined the payment (code {})", response_code);
                warn!(order_id = %order_id, code = %response_code, "payment declined");
                self.event_sender
                    .send_or_log(Event::PaymentFailed {
                        order_id,
                        reason: reason.clone(),
                    })
                    .await;
                Ok(ReconcileResult {
                    success: false,
                    order_id: Some(order_id),
                    payment_id: None,
                    message: reason,
                })
            }
            CallbackOutcome::Completed(details) => self.apply_success(method, details).await,
        }
    }

    async fn apply_success(
        &self,
        method: PaymentMethod,
        details: CallbackDetails,
    ) -> Result<ReconcileResult, ServiceError> {
        let now = Utc::now();
        let order_id = details.order_id;
        let txn = self.db.begin().await?;

        let order = Order::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        // Replayed callback for an already-settled order
        if order.payment_status == PaymentState::Completed {
            let existing = Payment::find()
                .filter(payment::Column::OrderId.eq(order_id))
                .filter(payment::Column::Status.eq(PaymentState::Completed))
                .one(&txn)
                .await?;
            return Ok(ReconcileResult {
                success: true,
                order_id: Some(order_id),
                payment_id: existing.map(|p| p.id),
                message: "Payment already confirmed".to_string(),
            });
        }

        if details.amount != order.total_amount {
            warn!(
                order_id = %order_id,
                expected = %order.total_amount,
                received = %details.amount,
                "callback amount does not match the order total"
            );
            let reason = "Callback amount does not match the order total".to_string();
            self.event_sender
                .send_or_log(Event::PaymentFailed {
                    order_id,
                    reason: reason.clone(),
                })
                .await;
            return Ok(ReconcileResult {
                success: false,
                order_id: Some(order_id),
                payment_id: None,
                message: reason,
            });
        }

        let payment_id = Uuid::new_v4();
        let provider_data = json!(details.raw);
        let row = payment::ActiveModel {
            id: Set(payment_id),
            order_id: Set(order_id),
            amount: Set(details.amount),
            status: Set(PaymentState::Completed),
            method: Set(method),
            transaction_id: Set(Some(details.transaction_id.clone())),
            transaction_datetime: Set(Some(
                parse_pay_date(details.pay_date.as_deref()).unwrap_or(now),
            )),
            transaction_content: Set(details.order_info.clone()),
            provider_data: Set(Some(provider_data.clone())),
            refunded_amount: Set(None),
            refund_reason: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        row.insert(&txn).await?;

        let ledger = payment_transaction::ActiveModel {
            id: Set(Uuid::new_v4()),
            payment_id: Set(payment_id),
            transaction_id: Set(details.transaction_id.clone()),
            transaction_status: Set(PaymentState::Completed.as_str().to_string()),
            transaction_content: Set(details.order_info.clone()),
            bank_code: Set(details.bank_code.clone()),
            card_type: Set(details.card_type.clone()),
            response_code: Set(Some(details.response_code.clone())),
            pay_date: Set(details.pay_date.clone()),
            provider_data: Set(Some(provider_data)),
            recorded_at: Set(now),
        };
        ledger.insert(&txn).await?;

        let status = order.status;
        let mut paid: order::ActiveModel = order.into();
        paid.payment_status = Set(PaymentState::Completed);
        paid.updated_at = Set(now);
        paid.update(&txn).await?;

        append_history(
            &txn,
            order_id,
            status,
            status,
            Some(format!("Payment completed via {}", method)),
            now,
        )
        .await?;

        // Outbox rows commit with the state change; on backends without an
        // outbox the direct emits below carry the events instead.
        let enqueued = outbox::enqueue(
            &txn,
            "OrderConfirmationRequested",
            &json!({ "order_id": order_id.to_string() }),
        )
        .await?;
        outbox::enqueue(
            &txn,
            "PaymentCompleted",
            &json!({
                "order_id": order_id.to_string(),
                "payment_id": payment_id.to_string(),
            }),
        )
        .await?;

        txn.commit().await?;
        info!(order_id = %order_id, payment_id = %payment_id, "payment reconciled");

        if !enqueued {
            self.event_sender
                .send_or_log(Event::PaymentCompleted {
                    order_id,
                    payment_id,
                })
                .await;
            self.event_sender
                .send_or_log(Event::OrderConfirmationRequested(order_id))
                .await;
        }

        Ok(ReconcileResult {
            success: true,
            order_id: Some(order_id),
            payment_id: Some(payment_id),
            message: "Payment confirmed".to_string(),
        })
    }

    /// Refunds a completed payment, in full or in part.
    ///
    /// # Errors
    ///
    /// `InvalidStatusTransition` unless the payment is `COMPLETED`;
    /// `ValidationError` for an out-of-range amount or a reason shorter
    /// than 10 characters.
    #[instrument(skip(self, reason))]
    pub async fn refund(
        &self,
        payment_id: Uuid,
        amount: Decimal,
        reason: &str,
    ) -> Result<payment::Model, ServiceError> {
        let reason = reason.trim();
        if reason.len() < 10 {
            return Err(ServiceError::ValidationError(
                "A refund reason of at least 10 characters is required".to_string(),
            ));
        }

        let now = Utc::now();
        let txn = self.db.begin().await?;

        let payment = Payment::find_by_id(payment_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Payment {} not found", payment_id)))?;

        if !payment.status.can_transition_to(PaymentState::Refunded) {
            return Err(ServiceError::InvalidStatusTransition {
                from: payment.status.as_str().to_string(),
                to: PaymentState::Refunded.as_str().to_string(),
            });
        }
        if amount <= Decimal::ZERO || amount > payment.amount {
            return Err(ServiceError::ValidationError(format!(
                "Refund amount must be between 0 and {}",
                payment.amount
            )));
        }

        let order_id = payment.order_id;
        let mut refunded: payment::ActiveModel = payment.into();
        refunded.status = Set(PaymentState::Refunded);
        refunded.refunded_amount = Set(Some(amount));
        refunded.refund_reason = Set(Some(reason.to_string()));
        refunded.updated_at = Set(now);
        let payment = refunded.update(&txn).await?;

        if let Some(order) = Order::find_by_id(order_id).one(&txn).await? {
            let mut order: order::ActiveModel = order.into();
            order.payment_status = Set(PaymentState::Refunded);
            order.updated_at = Set(now);
            order.update(&txn).await?;
        }

        txn.commit().await?;

        info!(payment_id = %payment_id, order_id = %order_id, %amount, "payment refunded");
        self.event_sender
            .send_or_log(Event::PaymentRefunded {
                order_id,
                payment_id,
            })
            .await;

        Ok(payment)
    }

    /// Payments recorded against an order, newest first
    #[instrument(skip(self))]
    pub async fn get_payments_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<payment::Model>, ServiceError> {
        Ok(Payment::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .order_by_desc(payment::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }
}

/// `yyyyMMddHHmmss` provider timestamps, taken as UTC
fn parse_pay_date(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?;
    NaiveDateTime::parse_from_str(raw, "%Y%m%d%H%M%S")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// One entry in the payment method listing
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaymentMethodInfo {
    pub method: PaymentMethod,
    pub display_name: String,
}

/// Redirect target for a payment attempt
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaymentUrlResponse {
    pub order_id: Uuid,
    pub amount: Decimal,
    pub payment_url: String,
}

/// Verdict of one callback reconciliation
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ReconcileResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<Uuid>,
    pub message: String,
}
