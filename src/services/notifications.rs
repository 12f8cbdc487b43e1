use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, instrument};

use crate::entities::{order, order_item};

/// Errors surfaced by a mail transport
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("notification transport failed: {0}")]
    Transport(String),
    #[error("invalid recipient address: {0}")]
    InvalidRecipient(String),
}

/// Outbound email seam for order lifecycle notices.
///
/// Implementations own the transport; callers hand over the order rows and
/// never see addresses, templates, or delivery mechanics. The event
/// processing loop is the only production caller.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderMailer: Send + Sync {
    /// Sent once payment for the order has been confirmed
    async fn send_order_confirmation(
        &self,
        order: &order::Model,
        items: &[order_item::Model],
    ) -> Result<(), NotificationError>;

    /// Sent when an operator approves the order
    async fn send_order_approval(&self, order: &order::Model) -> Result<(), NotificationError>;

    /// Sent when an operator rejects the order; the reason is read from
    /// the order row
    async fn send_order_rejection(&self, order: &order::Model) -> Result<(), NotificationError>;

    /// Sent when the customer cancels the order
    async fn send_order_cancellation(&self, order: &order::Model)
        -> Result<(), NotificationError>;
}

/// Mailer that writes each notice to the log instead of an SMTP relay.
///
/// Used as the default transport in development and in tests. Swapping in a
/// real transport is a composition-root change only.
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

impl LogMailer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl OrderMailer for LogMailer {
    #[instrument(skip(self, order, items), fields(order_id = %order.id))]
    async fn send_order_confirmation(
        &self,
        order: &order::Model,
        items: &[order_item::Model],
    ) -> Result<(), NotificationError> {
        let line_count = items.len();
        let unit_count: i32 = items.iter().map(|i| i.quantity).sum();
        info!(
            recipient = %order.recipient_email,
            recipient_name = %order.recipient_name,
            total_amount = %order.total_amount,
            line_count,
            unit_count,
            "order confirmation email"
        );
        Ok(())
    }

    #[instrument(skip(self, order), fields(order_id = %order.id))]
    async fn send_order_approval(&self, order: &order::Model) -> Result<(), NotificationError> {
        info!(
            recipient = %order.recipient_email,
            "order approval email"
        );
        Ok(())
    }

    #[instrument(skip(self, order), fields(order_id = %order.id))]
    async fn send_order_rejection(&self, order: &order::Model) -> Result<(), NotificationError> {
        info!(
            recipient = %order.recipient_email,
            reason = %order.rejected_reason.as_deref().unwrap_or("unspecified"),
            "order rejection email"
        );
        Ok(())
    }

    #[instrument(skip(self, order), fields(order_id = %order.id))]
    async fn send_order_cancellation(
        &self,
        order: &order::Model,
    ) -> Result<(), NotificationError> {
        info!(
            recipient = %order.recipient_email,
            total_amount = %order.total_amount,
            "order cancellation email"
        );
        Ok(())
    }
}
