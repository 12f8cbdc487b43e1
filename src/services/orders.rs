use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::cart::{self, CartStatus, Entity as Cart};
use crate::entities::cart_item::{self, Entity as CartItem};
use crate::entities::order::{
    self, flat_vat_rate, rush_surcharge_rate, DeliveryType, Entity as Order, OrderStatus,
};
use crate::entities::order_item::{self, Entity as OrderItem};
use crate::entities::order_status_history::{self, Entity as OrderStatusHistory};
use crate::entities::payment::PaymentState;
use crate::entities::product::{self, Entity as Product};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::catalog::{evaluate_stock, StockStatus};
use crate::services::delivery::{DeliveryQuoteParams, DeliveryService};

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email regex"));

/// Checkout request: recipient, destination, and delivery choice.
/// The cart itself is addressed by the session token.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateOrderRequest {
    pub recipient_name: String,
    pub recipient_email: String,
    pub recipient_phone: String,
    pub delivery_province: String,
    pub delivery_address: String,
    pub delivery_type: DeliveryType,
    pub rush_delivery_time: Option<DateTime<Utc>>,
    pub rush_delivery_instructions: Option<String>,
}

/// One checkout validation rule; returns the violation message, if any
type Rule = fn(&CreateOrderRequest, DateTime<Utc>) -> Option<String>;

fn require_name(req: &CreateOrderRequest, _now: DateTime<Utc>) -> Option<String> {
    req.recipient_name
        .trim()
        .is_empty()
        .then(|| "Recipient name is required".to_string())
}

fn require_valid_email(req: &CreateOrderRequest, _now: DateTime<Utc>) -> Option<String> {
    let email = req.recipient_email.trim();
    if email.is_empty() {
        Some("Recipient email is required".to_string())
    } else if !EMAIL_RE.is_match(email) {
        Some(format!("'{}' is not a valid email address", email))
    } else {
        None
    }
}

fn require_phone(req: &CreateOrderRequest, _now: DateTime<Utc>) -> Option<String> {
    req.recipient_phone
        .trim()
        .is_empty()
        .then(|| "Recipient phone is required".to_string())
}

fn require_province(req: &CreateOrderRequest, _now: DateTime<Utc>) -> Option<String> {
    req.delivery_province
        .trim()
        .is_empty()
        .then(|| "Delivery province is required".to_string())
}

fn require_full_address(req: &CreateOrderRequest, _now: DateTime<Utc>) -> Option<String> {
    (req.delivery_address.trim().len() < 10)
        .then(|| "Delivery address must be at least 10 characters".to_string())
}

fn forbid_rush_fields(req: &CreateOrderRequest, _now: DateTime<Utc>) -> Option<String> {
    (req.rush_delivery_time.is_some() || req.rush_delivery_instructions.is_some())
        .then(|| "Rush delivery fields are only valid for rush orders".to_string())
}

fn require_rush_window(req: &CreateOrderRequest, now: DateTime<Utc>) -> Option<String> {
    match req.rush_delivery_time {
        None => Some("Rush orders must state a requested delivery time".to_string()),
        Some(t) if t <= now => Some("Rush delivery time must be in the future".to_string()),
        Some(t) if t > now + Duration::hours(48) => {
            Some("Rush delivery time must be within the next 48 hours".to_string())
        }
        Some(_) => None,
    }
}

const COMMON_RULES: &[Rule] = &[
    require_name,
    require_valid_email,
    require_phone,
    require_province,
    require_full_address,
];
const STANDARD_RULES: &[Rule] = &[forbid_rush_fields];
const RUSH_RULES: &[Rule] = &[require_rush_window];

/// Runs the checkout rule chain and aggregates every violation
pub fn validate_order_request(
    req: &CreateOrderRequest,
    now: DateTime<Utc>,
) -> Result<(), ServiceError> {
    let extra: &[Rule] = match req.delivery_type {
        DeliveryType::Standard => STANDARD_RULES,
        DeliveryType::Rush => RUSH_RULES,
    };

    let violations: Vec<String> = COMMON_RULES
        .iter()
        .chain(extra)
        .filter_map(|rule| rule(req, now))
        .collect();

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ServiceError::ValidationError(violations.join("; ")))
    }
}

/// Order checkout and retrieval.
///
/// `create_order` converts the session's active cart into an order in a
/// single transaction: stock is re-checked and decremented, cart lines are
/// snapshotted into order lines, and the cart is marked converted. The
/// status machine itself lives in `OrderStatusService`.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    delivery: Arc<DeliveryService>,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        delivery: Arc<DeliveryService>,
    ) -> Self {
        Self {
            db,
            event_sender,
            delivery,
        }
    }

    /// Checks out the session's active cart.
    ///
    /// # Errors
    ///
    /// `ValidationError` carries every recipient-field violation at once;
    /// `InsufficientStock` names the first line the shelf cannot cover.
    #[instrument(skip(self, request), fields(delivery_type = %request.delivery_type))]
    pub async fn create_order(
        &self,
        session_token: &str,
        request: &CreateOrderRequest,
    ) -> Result<OrderDetails, ServiceError> {
        let now = Utc::now();
        validate_order_request(request, now)?;

        let txn = self.db.begin().await?;

        let cart = Cart::find()
            .filter(cart::Column::SessionToken.eq(session_token.trim()))
            .filter(cart::Column::Status.eq(CartStatus::Active))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("No active cart for this session".to_string()))?;

        let lines: Vec<(cart_item::Model, Option<product::Model>)> = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .find_also_related(Product)
            .all(&txn)
            .await?;
        if lines.is_empty() {
            return Err(ServiceError::ValidationError(
                "Cannot check out an empty cart".to_string(),
            ));
        }

        let mut products_total = Decimal::ZERO;
        let mut heaviest: Option<Decimal> = None;
        let mut snapshots = Vec::with_capacity(lines.len());
        for (line, product) in &lines {
            let product = product.as_ref().ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "cart line {} references a missing product",
                    line.id
                ))
            })?;

            if let StockStatus::Insufficient {
                available,
                requested,
            } = evaluate_stock(product, line.quantity)
            {
                return Err(ServiceError::InsufficientStock(format!(
                    "{}: Available: {}, Requested: {}",
                    product.title, available, requested
                )));
            }
            if request.delivery_type == DeliveryType::Rush && !product.rush_delivery_eligible {
                return Err(ServiceError::ValidationError(format!(
                    "'{}' is not eligible for rush delivery",
                    product.title
                )));
            }

            let subtotal = product.current_price * Decimal::from(line.quantity);
            products_total += subtotal;
            heaviest = Some(heaviest.map_or(product.weight_kg, |w| w.max(product.weight_kg)));
            snapshots.push((line.clone(), product.clone(), subtotal));
        }

        let vat_amount = products_total * flat_vat_rate();
        let quote = self.delivery.quote(&DeliveryQuoteParams {
            province: request.delivery_province.clone(),
            order_value: products_total + vat_amount,
            heaviest_item_weight_kg: heaviest,
            rush_requested: request.delivery_type == DeliveryType::Rush,
        })?;

        let delivery_fee = quote.standard_fee;
        let rush_delivery_fee = match request.delivery_type {
            DeliveryType::Rush => {
                let quoted = quote.rush_fee.unwrap_or(Decimal::ZERO);
                quoted.max(delivery_fee * rush_surcharge_rate())
            }
            DeliveryType::Standard => Decimal::ZERO,
        };
        let total_amount = products_total + vat_amount + delivery_fee + rush_delivery_fee;

        let order_id = Uuid::new_v4();
        let order = order::ActiveModel {
            id: Set(order_id),
            recipient_name: Set(request.recipient_name.trim().to_string()),
            recipient_email: Set(request.recipient_email.trim().to_string()),
            recipient_phone: Set(request.recipient_phone.trim().to_string()),
            delivery_province: Set(request.delivery_province.trim().to_string()),
            delivery_address: Set(request.delivery_address.trim().to_string()),
            delivery_type: Set(request.delivery_type),
            rush_delivery_time: Set(request.rush_delivery_time),
            rush_delivery_instructions: Set(request.rush_delivery_instructions.clone()),
            products_total: Set(products_total),
            vat_amount: Set(vat_amount),
            delivery_fee: Set(delivery_fee),
            rush_delivery_fee: Set(rush_delivery_fee),
            total_amount: Set(total_amount),
            status: Set(OrderStatus::PendingProcessing),
            payment_status: Set(PaymentState::Pending),
            rejected_reason: Set(None),
            version: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let order = order.insert(&txn).await?;

        let mut items = Vec::with_capacity(snapshots.len());
        for (line, product, subtotal) in snapshots {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(product.id),
                title: Set(product.title.clone()),
                media_type: Set(product.media_type.as_str().to_string()),
                quantity: Set(line.quantity),
                unit_price: Set(product.current_price),
                subtotal: Set(subtotal),
                created_at: Set(now),
            };
            items.push(item.insert(&txn).await?);

            let remaining = product.stock - line.quantity;
            let mut stocked: product::ActiveModel = product.into();
            stocked.stock = Set(remaining);
            stocked.updated_at = Set(now);
            stocked.update(&txn).await?;
        }

        append_history(
            &txn,
            order_id,
            OrderStatus::PendingProcessing,
            OrderStatus::PendingProcessing,
            Some("Order created".to_string()),
            now,
        )
        .await?;

        let mut converted: cart::ActiveModel = cart.clone().into();
        converted.status = Set(CartStatus::Converted);
        converted.updated_at = Set(now);
        converted.update(&txn).await?;

        txn.commit().await?;

        info!(order_id = %order_id, total = %total_amount, "order created");
        self.event_sender
            .send_or_log(Event::OrderCreated(order_id))
            .await;
        self.event_sender
            .send_or_log(Event::CartConverted(cart.id))
            .await;

        let history = self.load_history(order_id).await?;
        Ok(OrderDetails {
            order: OrderResponse::from_model(&order),
            items: items.iter().map(OrderItemResponse::from_model).collect(),
            history,
        })
    }

    /// Fetches one order with its lines and status history
    #[instrument(skip(self))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderDetails, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;
        let history = self.load_history(order_id).await?;

        Ok(OrderDetails {
            order: OrderResponse::from_model(&order),
            items: items.iter().map(OrderItemResponse::from_model).collect(),
            history,
        })
    }

    /// Lists orders newest first, optionally filtered by status
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        status: Option<OrderStatus>,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<OrderResponse>, u64), ServiceError> {
        if per_page == 0 {
            return Err(ServiceError::ValidationError(
                "Page size must be at least 1".to_string(),
            ));
        }

        let mut query = Order::find().order_by_desc(order::Column::CreatedAt);
        if let Some(status) = status {
            query = query.filter(order::Column::Status.eq(status));
        }

        let paginator = query.paginate(&*self.db, per_page);
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok((orders.iter().map(OrderResponse::from_model).collect(), total))
    }

    /// Status transition log, oldest first
    pub async fn load_history(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<order_status_history::Model>, ServiceError> {
        Ok(OrderStatusHistory::find()
            .filter(order_status_history::Column::OrderId.eq(order_id))
            .order_by_asc(order_status_history::Column::ChangedAt)
            .all(&*self.db)
            .await?)
    }

    /// Customer cancellation: restocks every line and closes the order.
    ///
    /// Only `PENDING_PROCESSING` and `APPROVED` orders may be canceled.
    #[instrument(skip(self))]
    pub async fn cancel_order(&self, order_id: Uuid) -> Result<OrderResponse, ServiceError> {
        let now = Utc::now();
        let txn = self.db.begin().await?;

        let order = Order::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if !order.status.is_cancelable() {
            return Err(ServiceError::InvalidStatusTransition {
                from: order.status.as_str().to_string(),
                to: OrderStatus::Canceled.as_str().to_string(),
            });
        }

        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&txn)
            .await?;
        for item in &items {
            if let Some(product) = Product::find_by_id(item.product_id).one(&txn).await? {
                let restocked = product.stock + item.quantity;
                let mut product: product::ActiveModel = product.into();
                product.stock = Set(restocked);
                product.updated_at = Set(now);
                product.update(&txn).await?;
            }
        }

        let from = order.status;
        let version = order.version;
        let mut canceled: order::ActiveModel = order.into();
        canceled.status = Set(OrderStatus::Canceled);
        canceled.version = Set(version + 1);
        canceled.updated_at = Set(now);
        let order = canceled.update(&txn).await?;

        append_history(
            &txn,
            order_id,
            from,
            OrderStatus::Canceled,
            Some("Canceled by customer".to_string()),
            now,
        )
        .await?;

        txn.commit().await?;

        info!(order_id = %order_id, "order canceled");
        self.event_sender
            .send_or_log(Event::OrderCanceled(order_id))
            .await;
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: from.as_str().to_string(),
                new_status: OrderStatus::Canceled.as_str().to_string(),
            })
            .await;

        Ok(OrderResponse::from_model(&order))
    }
}

/// Appends one row to the order's transition log
pub(crate) async fn append_history<C: sea_orm::ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    from: OrderStatus,
    to: OrderStatus,
    note: Option<String>,
    at: DateTime<Utc>,
) -> Result<(), ServiceError> {
    let row = order_status_history::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        from_status: Set(from.as_str().to_string()),
        to_status: Set(to.as_str().to_string()),
        note: Set(note),
        changed_at: Set(at),
    };
    row.insert(conn).await?;
    Ok(())
}

/// Order fields returned over the API
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub recipient_name: String,
    pub recipient_email: String,
    pub recipient_phone: String,
    pub delivery_province: String,
    pub delivery_address: String,
    pub delivery_type: DeliveryType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rush_delivery_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rush_delivery_instructions: Option<String>,
    pub products_total: Decimal,
    pub vat_amount: Decimal,
    pub delivery_fee: Decimal,
    pub rush_delivery_fee: Decimal,
    pub total_amount: Decimal,
    pub status: OrderStatus,
    pub payment_status: PaymentState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderResponse {
    pub fn from_model(order: &order::Model) -> Self {
        Self {
            id: order.id,
            recipient_name: order.recipient_name.clone(),
            recipient_email: order.recipient_email.clone(),
            recipient_phone: order.recipient_phone.clone(),
            delivery_province: order.delivery_province.clone(),
            delivery_address: order.delivery_address.clone(),
            delivery_type: order.delivery_type,
            rush_delivery_time: order.rush_delivery_time,
            rush_delivery_instructions: order.rush_delivery_instructions.clone(),
            products_total: order.products_total,
            vat_amount: order.vat_amount,
            delivery_fee: order.delivery_fee,
            rush_delivery_fee: order.rush_delivery_fee,
            total_amount: order.total_amount,
            status: order.status,
            payment_status: order.payment_status,
            rejected_reason: order.rejected_reason.clone(),
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

/// One order line as returned over the API
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderItemResponse {
    pub product_id: Uuid,
    pub title: String,
    pub media_type: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
}

impl OrderItemResponse {
    pub fn from_model(item: &order_item::Model) -> Self {
        Self {
            product_id: item.product_id,
            title: item.title.clone(),
            media_type: item.media_type.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price,
            subtotal: item.subtotal,
        }
    }
}

/// Full order view: header, lines, and the transition log
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderDetails {
    #[serde(flatten)]
    pub order: OrderResponse,
    pub items: Vec<OrderItemResponse>,
    #[schema(value_type = Vec<Object>)]
    pub history: Vec<order_status_history::Model>,
}
