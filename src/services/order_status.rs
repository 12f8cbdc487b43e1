use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set, TransactionTrait};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::entities::order::{self, DeliveryType, Entity as Order, OrderStatus};
use crate::entities::payment::PaymentState;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::orders::{append_history, OrderResponse};

/// Drives the order lifecycle state machine.
///
/// Every transition goes through `update_status`, which checks the
/// transition table, appends to the history log, and bumps the order's
/// version counter in one transaction. The named operations below are
/// thin wrappers that add their own guards.
#[derive(Clone)]
pub struct OrderStatusService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl OrderStatusService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Moves an order to `to`, if the state machine allows it.
    ///
    /// # Errors
    ///
    /// `InvalidStatusTransition` when the move is not in the transition
    /// table; `PaymentFailed` when a rush order is approved before its
    /// payment has completed.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        to: OrderStatus,
        note: Option<String>,
    ) -> Result<OrderResponse, ServiceError> {
        let now = Utc::now();
        let txn = self.db.begin().await?;

        let order = Order::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let from = order.status;
        if !from.can_transition_to(to) {
            return Err(ServiceError::InvalidStatusTransition {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }

        // Rush orders ship on a deadline; they are not approved on credit.
        if to == OrderStatus::Approved
            && order.delivery_type == DeliveryType::Rush
            && order.payment_status != PaymentState::Completed
        {
            return Err(ServiceError::PaymentFailed(
                "Rush orders require completed payment before approval".to_string(),
            ));
        }

        let version = order.version;
        let mut updated: order::ActiveModel = order.into();
        updated.status = Set(to);
        updated.version = Set(version + 1);
        updated.updated_at = Set(now);
        if to == OrderStatus::Rejected {
            updated.rejected_reason = Set(note.clone());
        } else if to == OrderStatus::PendingProcessing {
            // resubmission clears the previous rejection
            updated.rejected_reason = Set(None);
        }
        let order = updated.update(&txn).await?;

        append_history(&txn, order_id, from, to, note, now).await?;
        txn.commit().await?;

        info!(
            order_id = %order_id,
            from = from.as_str(),
            to = to.as_str(),
            "order status changed"
        );
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: from.as_str().to_string(),
                new_status: to.as_str().to_string(),
            })
            .await;

        Ok(OrderResponse::from_model(&order))
    }

    /// Operator approval of a pending order
    pub async fn approve(&self, order_id: Uuid) -> Result<OrderResponse, ServiceError> {
        self.update_status(order_id, OrderStatus::Approved, None)
            .await
    }

    /// Operator rejection; the reason is stored on the order and in history
    pub async fn reject(
        &self,
        order_id: Uuid,
        reason: String,
    ) -> Result<OrderResponse, ServiceError> {
        let reason = reason.trim().to_string();
        if reason.is_empty() {
            return Err(ServiceError::ValidationError(
                "A rejection reason is required".to_string(),
            ));
        }
        self.update_status(order_id, OrderStatus::Rejected, Some(reason))
            .await
    }

    /// Puts a rejected order back in the review queue
    pub async fn resubmit(&self, order_id: Uuid) -> Result<OrderResponse, ServiceError> {
        self.update_status(
            order_id,
            OrderStatus::PendingProcessing,
            Some("Resubmitted after rejection".to_string()),
        )
        .await
    }

    pub async fn mark_shipped(&self, order_id: Uuid) -> Result<OrderResponse, ServiceError> {
        self.update_status(order_id, OrderStatus::Shipped, None)
            .await
    }

    pub async fn mark_delivered(&self, order_id: Uuid) -> Result<OrderResponse, ServiceError> {
        self.update_status(order_id, OrderStatus::Delivered, None)
            .await
    }
}
