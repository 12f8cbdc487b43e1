use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::services::notifications::OrderMailer;

pub mod outbox;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is closed.
    /// Event delivery is advisory; the state change it announces has already
    /// been committed.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("event dropped: {}", e);
        }
    }
}

// Define the various events that can occur in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Order events
    OrderCreated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    OrderCanceled(Uuid),
    /// Emitted once payment for the order has been confirmed; drives the
    /// confirmation email
    OrderConfirmationRequested(Uuid),

    // Cart events
    CartConverted(Uuid),

    // Payment events
    PaymentCompleted {
        order_id: Uuid,
        payment_id: Uuid,
    },
    PaymentFailed {
        order_id: Uuid,
        reason: String,
    },
    PaymentRefunded {
        order_id: Uuid,
        payment_id: Uuid,
    },

    // Generic event for custom messages
    Generic {
        message: String,
        timestamp: DateTime<Utc>,
        metadata: serde_json::Value,
    },
}

impl Event {
    /// Create a generic event with string data
    pub fn with_data(data: String) -> Self {
        Event::Generic {
            message: data,
            timestamp: Utc::now(),
            metadata: serde_json::Value::Null,
        }
    }
}

// Function to process incoming events. Email-bearing events load their order
// from the database and hand it to the mailer; the rest are logged.
pub async fn process_events(
    mut rx: mpsc::Receiver<Event>,
    db: Arc<DatabaseConnection>,
    mailer: Arc<dyn OrderMailer>,
) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        info!("Received event: {:?}", event);

        match event {
            Event::OrderCreated(order_id) => {
                info!("Order created: {}", order_id);
            }
            Event::OrderConfirmationRequested(order_id) => {
                if let Err(e) = handle_order_confirmation(&db, mailer.as_ref(), order_id).await {
                    error!(
                        "Failed to send order confirmation: order_id={}, error={}",
                        order_id, e
                    );
                }
            }
            Event::OrderCanceled(order_id) => {
                if let Err(e) = handle_order_canceled(&db, mailer.as_ref(), order_id).await {
                    error!(
                        "Failed to send cancellation notice: order_id={}, error={}",
                        order_id, e
                    );
                }
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(
                    "Order {} status changed from '{}' to '{}'",
                    order_id, old_status, new_status
                );
                if let Err(e) =
                    handle_status_change_notice(&db, mailer.as_ref(), order_id, &new_status).await
                {
                    error!(
                        "Failed to send status change notice: order_id={}, error={}",
                        order_id, e
                    );
                }
            }
            Event::CartConverted(cart_id) => {
                info!("Cart converted to order: {}", cart_id);
            }
            Event::PaymentCompleted {
                order_id,
                payment_id,
            } => {
                info!(
                    "Payment completed: order_id={}, payment_id={}",
                    order_id, payment_id
                );
            }
            Event::PaymentFailed { order_id, reason } => {
                warn!("Payment failed: order_id={}, reason={}", order_id, reason);
            }
            Event::PaymentRefunded {
                order_id,
                payment_id,
            } => {
                info!(
                    "Payment refunded: order_id={}, payment_id={}",
                    order_id, payment_id
                );
            }
            Event::Generic { message, .. } => {
                info!("Generic event: {}", message);
            }
        }
    }

    warn!("Event processing loop has ended");
}

// Handler functions for specific events

async fn handle_order_confirmation(
    db: &DatabaseConnection,
    mailer: &dyn OrderMailer,
    order_id: Uuid,
) -> Result<(), String> {
    use sea_orm::{EntityTrait, ModelTrait};

    let order = crate::entities::order::Entity::find_by_id(order_id)
        .one(db)
        .await
        .map_err(|e| format!("failed to load order: {}", e))?
        .ok_or_else(|| format!("order {} not found", order_id))?;

    let items = order
        .find_related(crate::entities::order_item::Entity)
        .all(db)
        .await
        .map_err(|e| format!("failed to load order items: {}", e))?;

    mailer
        .send_order_confirmation(&order, &items)
        .await
        .map_err(|e| e.to_string())
}

async fn handle_order_canceled(
    db: &DatabaseConnection,
    mailer: &dyn OrderMailer,
    order_id: Uuid,
) -> Result<(), String> {
    use sea_orm::EntityTrait;

    let order = crate::entities::order::Entity::find_by_id(order_id)
        .one(db)
        .await
        .map_err(|e| format!("failed to load order: {}", e))?
        .ok_or_else(|| format!("order {} not found", order_id))?;

    mailer
        .send_order_cancellation(&order)
        .await
        .map_err(|e| e.to_string())
}

// Approval and rejection are the only transitions that notify the customer;
// everything else is operational detail.
async fn handle_status_change_notice(
    db: &DatabaseConnection,
    mailer: &dyn OrderMailer,
    order_id: Uuid,
    new_status: &str,
) -> Result<(), String> {
    use crate::entities::order::OrderStatus;
    use sea_orm::EntityTrait;

    let approved = new_status == OrderStatus::Approved.as_str();
    let rejected = new_status == OrderStatus::Rejected.as_str();
    if !approved && !rejected {
        return Ok(());
    }

    let order = crate::entities::order::Entity::find_by_id(order_id)
        .one(db)
        .await
        .map_err(|e| format!("failed to load order: {}", e))?
        .ok_or_else(|| format!("order {} not found", order_id))?;

    if approved {
        mailer
            .send_order_approval(&order)
            .await
            .map_err(|e| e.to_string())
    } else {
        mailer
            .send_order_rejection(&order)
            .await
            .map_err(|e| e.to_string())
    }
}
