use crate::{
    config::AppConfig,
    entities::cart::{self, CartStatus, Entity as Cart},
    entities::cart_item::{self, Entity as CartItem},
    entities::order::flat_vat_rate,
    entities::product::{self, Entity as Product},
    errors::ServiceError,
    services::catalog::{evaluate_stock, StockStatus},
    services::delivery::{DeliveryQuote, DeliveryQuoteParams, DeliveryService},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

/// Most units of a single product a cart line may hold
pub const MAX_QUANTITY_PER_ITEM: i32 = 99;
/// Most distinct product lines a cart may hold
pub const MAX_DISTINCT_ITEMS: usize = 50;
/// Most units a cart may hold across all lines
pub const MAX_TOTAL_UNITS: i32 = 999;

/// Session-scoped shopping carts.
///
/// Carts are keyed by an opaque session token; each token has at most one
/// active cart. Adding, updating, and pricing all go through this service,
/// which also owns stock grading and the flat-VAT cart summary the checkout
/// flow consumes.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    config: Arc<AppConfig>,
    delivery: Arc<DeliveryService>,
}

impl CartService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: Arc<AppConfig>,
        delivery: Arc<DeliveryService>,
    ) -> Self {
        Self {
            db,
            config,
            delivery,
        }
    }

    /// Returns the active cart for the session, creating one when none
    /// exists. An expired cart is marked abandoned and replaced.
    #[instrument(skip(self))]
    pub async fn get_or_create(&self, session_token: &str) -> Result<cart::Model, ServiceError> {
        let token = session_token.trim();
        if token.is_empty() {
            return Err(ServiceError::ValidationError(
                "Session token is required".to_string(),
            ));
        }

        let existing = Cart::find()
            .filter(cart::Column::SessionToken.eq(token))
            .filter(cart::Column::Status.eq(CartStatus::Active))
            .one(&*self.db)
            .await?;

        let now = Utc::now();
        if let Some(found) = existing {
            if !found.is_expired(now) {
                return Ok(found);
            }
            let mut expired: cart::ActiveModel = found.into();
            expired.status = Set(CartStatus::Abandoned);
            expired.updated_at = Set(now);
            expired.update(&*self.db).await?;
        }

        let cart = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            session_token: Set(token.to_string()),
            status: Set(CartStatus::Active),
            expires_at: Set(now + self.config.cart_session_ttl()),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let cart = cart.insert(&*self.db).await?;
        info!(cart_id = %cart.id, "created cart for session");
        Ok(cart)
    }

    /// Adds a product to the cart, merging with an existing line.
    ///
    /// # Errors
    ///
    /// Quantity and cart-cap violations return `ValidationError`; a request
    /// the shelf cannot cover returns `InsufficientStock`.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        session_token: &str,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartContents, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "Quantity must be at least 1".to_string(),
            ));
        }

        let cart = self.get_or_create(session_token).await?;
        let txn = self.db.begin().await?;

        let product = Product::find_by_id(product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        let items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .all(&txn)
            .await?;

        let existing = items.iter().find(|i| i.product_id == product_id).cloned();
        let merged_quantity = existing.as_ref().map(|i| i.quantity).unwrap_or(0) + quantity;
        if merged_quantity > MAX_QUANTITY_PER_ITEM {
            return Err(ServiceError::ValidationError(format!(
                "At most {} units of a single item may be in the cart",
                MAX_QUANTITY_PER_ITEM
            )));
        }
        if existing.is_none() && items.len() >= MAX_DISTINCT_ITEMS {
            return Err(ServiceError::ValidationError(format!(
                "A cart may hold at most {} distinct items",
                MAX_DISTINCT_ITEMS
            )));
        }
        let total_units: i32 = items.iter().map(|i| i.quantity).sum::<i32>() + quantity;
        if total_units > MAX_TOTAL_UNITS {
            return Err(ServiceError::ValidationError(format!(
                "A cart may hold at most {} units in total",
                MAX_TOTAL_UNITS
            )));
        }

        if let StockStatus::Insufficient {
            available,
            requested,
        } = evaluate_stock(&product, merged_quantity)
        {
            return Err(ServiceError::InsufficientStock(format!(
                "{}: Available: {}, Requested: {}",
                product.title, available, requested
            )));
        }

        let now = Utc::now();
        match existing {
            Some(line) => {
                let mut line: cart_item::ActiveModel = line.into();
                line.quantity = Set(merged_quantity);
                line.updated_at = Set(now);
                line.update(&txn).await?;
            }
            None => {
                let line = cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart.id),
                    product_id: Set(product_id),
                    quantity: Set(quantity),
                    added_at: Set(now),
                    updated_at: Set(now),
                };
                line.insert(&txn).await?;
            }
        }

        let contents = self.load_contents(&txn, &cart).await?;
        txn.commit().await?;

        info!(cart_id = %cart.id, product_id = %product_id, quantity, "added item to cart");
        Ok(contents)
    }

    /// Sets the quantity of an existing cart line.
    #[instrument(skip(self))]
    pub async fn update_item_quantity(
        &self,
        session_token: &str,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartContents, ServiceError> {
        if quantity <= 0 || quantity > MAX_QUANTITY_PER_ITEM {
            return Err(ServiceError::ValidationError(format!(
                "Quantity must be between 1 and {}",
                MAX_QUANTITY_PER_ITEM
            )));
        }

        let cart = self.require_active_cart(session_token).await?;
        let txn = self.db.begin().await?;

        let line = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} is not in the cart", product_id))
            })?;

        let product = Product::find_by_id(product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        if let StockStatus::Insufficient {
            available,
            requested,
        } = evaluate_stock(&product, quantity)
        {
            return Err(ServiceError::InsufficientStock(format!(
                "{}: Available: {}, Requested: {}",
                product.title, available, requested
            )));
        }

        let others: i32 = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.ne(product_id))
            .all(&txn)
            .await?
            .iter()
            .map(|i| i.quantity)
            .sum();
        if others + quantity > MAX_TOTAL_UNITS {
            return Err(ServiceError::ValidationError(format!(
                "A cart may hold at most {} units in total",
                MAX_TOTAL_UNITS
            )));
        }

        let mut line: cart_item::ActiveModel = line.into();
        line.quantity = Set(quantity);
        line.updated_at = Set(Utc::now());
        line.update(&txn).await?;

        let contents = self.load_contents(&txn, &cart).await?;
        txn.commit().await?;
        Ok(contents)
    }

    /// Removes a product line from the cart
    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        session_token: &str,
        product_id: Uuid,
    ) -> Result<CartContents, ServiceError> {
        let cart = self.require_active_cart(session_token).await?;
        let txn = self.db.begin().await?;

        let deleted = CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .exec(&txn)
            .await?;
        if deleted.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Product {} is not in the cart",
                product_id
            )));
        }

        let contents = self.load_contents(&txn, &cart).await?;
        txn.commit().await?;
        Ok(contents)
    }

    /// Cart lines joined with their current catalog rows
    #[instrument(skip(self))]
    pub async fn get_contents(&self, session_token: &str) -> Result<CartContents, ServiceError> {
        let cart = self.get_or_create(session_token).await?;
        self.load_contents(&*self.db, &cart).await
    }

    /// Flat-VAT pricing summary for checkout.
    ///
    /// Cart totals apply a flat 10% VAT regardless of media kind; per-kind
    /// rates only shape catalog display prices.
    #[instrument(skip(self))]
    pub async fn get_summary(&self, session_token: &str) -> Result<CartSummary, ServiceError> {
        let contents = self.get_contents(session_token).await?;
        Ok(summarize(&contents))
    }

    /// Grades every cart line against current stock.
    ///
    /// `INSUFFICIENT` lines make the cart invalid for checkout; `LOW` lines
    /// are reported but do not block.
    #[instrument(skip(self))]
    pub async fn validate(&self, session_token: &str) -> Result<CartValidation, ServiceError> {
        let contents = self.get_contents(session_token).await?;

        let invalid_items: Vec<InvalidCartItem> = contents
            .items
            .iter()
            .filter(|line| line.stock_status != "AVAILABLE")
            .map(|line| InvalidCartItem {
                product_id: line.product_id,
                title: line.title.clone(),
                requested: line.quantity,
                available: line.available_stock,
                status: line.stock_status.clone(),
                message: line.stock_message.clone().unwrap_or_default(),
            })
            .collect();

        let blocking = invalid_items.iter().any(|i| i.status == "INSUFFICIENT");
        Ok(CartValidation {
            is_valid: !contents.items.is_empty() && !blocking,
            invalid_items,
        })
    }

    /// Quotes delivery fees for the cart as it stands: order value is the
    /// VAT-inclusive cart total, chargeable weight is the heaviest item.
    #[instrument(skip(self))]
    pub async fn delivery_quote(
        &self,
        session_token: &str,
        province: &str,
        rush_requested: bool,
    ) -> Result<DeliveryQuote, ServiceError> {
        let contents = self.get_contents(session_token).await?;
        if contents.items.is_empty() {
            return Err(ServiceError::ValidationError(
                "Cannot quote delivery for an empty cart".to_string(),
            ));
        }
        let summary = summarize(&contents);

        self.delivery.quote(&DeliveryQuoteParams {
            province: province.to_string(),
            order_value: summary.total_including_vat,
            heaviest_item_weight_kg: contents.heaviest_item_weight_kg,
            rush_requested,
        })
    }

    /// Empties the cart without abandoning the session
    #[instrument(skip(self))]
    pub async fn clear(&self, session_token: &str) -> Result<(), ServiceError> {
        let cart = self.require_active_cart(session_token).await?;

        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(&*self.db)
            .await?;

        info!(cart_id = %cart.id, "cleared cart");
        Ok(())
    }

    /// Marks expired active carts abandoned and drops their lines.
    /// Driven by the background sweep task; returns the number of carts
    /// swept.
    #[instrument(skip(self))]
    pub async fn clean_expired(&self) -> Result<u64, ServiceError> {
        let now = Utc::now();
        let txn = self.db.begin().await?;

        let expired = Cart::find()
            .filter(cart::Column::Status.eq(CartStatus::Active))
            .filter(cart::Column::ExpiresAt.lte(now))
            .all(&txn)
            .await?;

        let count = expired.len() as u64;
        for stale in expired {
            CartItem::delete_many()
                .filter(cart_item::Column::CartId.eq(stale.id))
                .exec(&txn)
                .await?;
            let mut stale: cart::ActiveModel = stale.into();
            stale.status = Set(CartStatus::Abandoned);
            stale.updated_at = Set(now);
            stale.update(&txn).await?;
        }

        txn.commit().await?;
        if count > 0 {
            info!(count, "swept expired carts");
        }
        Ok(count)
    }

    /// The active cart for a session, or NotFound
    pub async fn require_active_cart(
        &self,
        session_token: &str,
    ) -> Result<cart::Model, ServiceError> {
        Cart::find()
            .filter(cart::Column::SessionToken.eq(session_token.trim()))
            .filter(cart::Column::Status.eq(CartStatus::Active))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("No active cart for this session".to_string()))
    }

    async fn load_contents<C: ConnectionTrait>(
        &self,
        conn: &C,
        cart: &cart::Model,
    ) -> Result<CartContents, ServiceError> {
        let rows: Vec<(cart_item::Model, Option<product::Model>)> = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .find_also_related(Product)
            .all(conn)
            .await?;

        let mut items = Vec::with_capacity(rows.len());
        let mut heaviest: Option<Decimal> = None;
        for (line, product) in rows {
            let product = product.ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "cart line {} references a missing product",
                    line.id
                ))
            })?;

            let status = evaluate_stock(&product, line.quantity);
            heaviest = Some(heaviest.map_or(product.weight_kg, |w| w.max(product.weight_kg)));

            items.push(CartLine {
                product_id: product.id,
                title: product.title.clone(),
                media_type: product.media_type.as_str().to_string(),
                unit_price: product.current_price,
                quantity: line.quantity,
                subtotal: product.current_price * Decimal::from(line.quantity),
                available_stock: product.stock,
                stock_status: status.code().to_string(),
                stock_message: status.message(),
                can_rush_deliver: product.rush_delivery_eligible,
            });
        }

        Ok(CartContents {
            cart_id: cart.id,
            session_token: cart.session_token.clone(),
            items,
            heaviest_item_weight_kg: heaviest,
        })
    }
}

/// One cart line joined with its catalog row
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CartLine {
    pub product_id: Uuid,
    pub title: String,
    pub media_type: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub subtotal: Decimal,
    pub available_stock: i32,
    /// `INSUFFICIENT`, `LOW`, or `AVAILABLE`
    pub stock_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stock_message: Option<String>,
    pub can_rush_deliver: bool,
}

/// Cart lines plus the weight input for delivery quoting
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CartContents {
    pub cart_id: Uuid,
    pub session_token: String,
    pub items: Vec<CartLine>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heaviest_item_weight_kg: Option<Decimal>,
}

/// Flat-VAT cart totals
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CartSummary {
    pub total_excluding_vat: Decimal,
    pub vat_amount: Decimal,
    pub total_including_vat: Decimal,
    pub item_count: i32,
    pub has_insufficient_stock: bool,
}

/// One cart line that failed stock validation
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct InvalidCartItem {
    pub product_id: Uuid,
    pub title: String,
    pub requested: i32,
    pub available: i32,
    pub status: String,
    pub message: String,
}

/// Checkout-readiness verdict for a cart
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CartValidation {
    pub is_valid: bool,
    pub invalid_items: Vec<InvalidCartItem>,
}

fn summarize(contents: &CartContents) -> CartSummary {
    let total_excluding_vat: Decimal = contents.items.iter().map(|l| l.subtotal).sum();
    let vat_amount = total_excluding_vat * flat_vat_rate();
    CartSummary {
        total_excluding_vat,
        vat_amount,
        total_including_vat: total_excluding_vat + vat_amount,
        item_count: contents.items.iter().map(|l| l.quantity).sum(),
        has_insufficient_stock: contents
            .items
            .iter()
            .any(|l| l.stock_status == "INSUFFICIENT"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn line(price: Decimal, quantity: i32, stock_status: &str) -> CartLine {
        CartLine {
            product_id: Uuid::new_v4(),
            title: "test".into(),
            media_type: "CD".into(),
            unit_price: price,
            quantity,
            subtotal: price * Decimal::from(quantity),
            available_stock: 10,
            stock_status: stock_status.into(),
            stock_message: None,
            can_rush_deliver: true,
        }
    }

    fn contents(items: Vec<CartLine>) -> CartContents {
        CartContents {
            cart_id: Uuid::new_v4(),
            session_token: "session".into(),
            items,
            heaviest_item_weight_kg: Some(dec!(0.5)),
        }
    }

    #[test]
    fn summary_applies_flat_ten_percent_vat() {
        let summary = summarize(&contents(vec![
            line(dec!(100000), 2, "AVAILABLE"),
            line(dec!(50000), 1, "AVAILABLE"),
        ]));

        assert_eq!(summary.total_excluding_vat, dec!(250000));
        assert_eq!(summary.vat_amount, dec!(25000.00));
        assert_eq!(summary.total_including_vat, dec!(275000.00));
        assert_eq!(summary.item_count, 3);
        assert!(!summary.has_insufficient_stock);
    }

    #[test]
    fn summary_flags_insufficient_lines() {
        let summary = summarize(&contents(vec![
            line(dec!(100000), 1, "AVAILABLE"),
            line(dec!(50000), 3, "INSUFFICIENT"),
        ]));
        assert!(summary.has_insufficient_stock);
    }

    #[test]
    fn empty_cart_summary_is_all_zero() {
        let summary = summarize(&contents(vec![]));
        assert_eq!(summary.total_excluding_vat, Decimal::ZERO);
        assert_eq!(summary.vat_amount, Decimal::ZERO);
        assert_eq!(summary.total_including_vat, Decimal::ZERO);
        assert_eq!(summary.item_count, 0);
    }

    #[test]
    fn cart_caps_are_the_documented_limits() {
        assert_eq!(MAX_QUANTITY_PER_ITEM, 99);
        assert_eq!(MAX_DISTINCT_ITEMS, 50);
        assert_eq!(MAX_TOTAL_UNITS, 999);
    }
}
