use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// VAT rate applied to the order's product subtotal as a whole.
///
/// Catalog display uses per-kind rates (see `MediaType::vat_rate`), while
/// cart summaries and order totals apply this flat rate. Both behaviors are
/// intentional and covered by tests.
pub fn flat_vat_rate() -> Decimal {
    dec!(0.10)
}

/// Minimum rush charge, as a fraction of the standard delivery fee
pub fn rush_surcharge_rate() -> Decimal {
    dec!(0.5)
}

/// Customer order produced by checking out a cart
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub recipient_name: String,
    pub recipient_email: String,
    pub recipient_phone: String,

    pub delivery_province: String,
    #[sea_orm(column_type = "Text")]
    pub delivery_address: String,
    pub delivery_type: DeliveryType,

    /// Requested arrival time, rush orders only
    #[sea_orm(nullable)]
    pub rush_delivery_time: Option<DateTime<Utc>>,
    #[sea_orm(column_type = "Text", nullable)]
    pub rush_delivery_instructions: Option<String>,

    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub products_total: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub vat_amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub delivery_fee: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub rush_delivery_fee: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub total_amount: Decimal,

    pub status: OrderStatus,
    pub payment_status: super::payment::PaymentState,

    #[sea_orm(column_type = "Text", nullable)]
    pub rejected_reason: Option<String>,

    /// Optimistic concurrency counter, bumped on every status change
    pub version: i32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
    #[sea_orm(has_many = "super::order_status_history::Entity")]
    StatusHistory,
    #[sea_orm(has_many = "super::payment::Entity")]
    Payments,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl Related<super::order_status_history::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StatusHistory.def()
    }
}

impl Related<super::payment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payments.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Fulfilment speed chosen at checkout
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    strum::EnumString,
    strum::Display,
    utoipa::ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[strum(ascii_case_insensitive)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryType {
    #[sea_orm(string_value = "STANDARD")]
    #[strum(serialize = "STANDARD")]
    Standard,
    #[sea_orm(string_value = "RUSH")]
    #[strum(serialize = "RUSH")]
    Rush,
}

/// Order lifecycle state
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    utoipa::ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(30))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[sea_orm(string_value = "PENDING_PROCESSING")]
    PendingProcessing,
    #[sea_orm(string_value = "APPROVED")]
    Approved,
    #[sea_orm(string_value = "REJECTED")]
    Rejected,
    #[sea_orm(string_value = "CANCELED")]
    Canceled,
    #[sea_orm(string_value = "SHIPPED")]
    Shipped,
    #[sea_orm(string_value = "DELIVERED")]
    Delivered,
}

impl OrderStatus {
    /// The complete set of states this state may move to
    pub fn allowed_transitions(self) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            PendingProcessing => &[Approved, Rejected, Canceled],
            Approved => &[Shipped, Canceled],
            Rejected => &[PendingProcessing],
            Shipped => &[Delivered],
            Delivered => &[],
            Canceled => &[],
        }
    }

    pub fn can_transition_to(self, to: OrderStatus) -> bool {
        self.allowed_transitions().contains(&to)
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_transitions().is_empty()
    }

    /// Whether the customer may still cancel from this state
    pub fn is_cancelable(self) -> bool {
        matches!(self, OrderStatus::PendingProcessing | OrderStatus::Approved)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::PendingProcessing => "PENDING_PROCESSING",
            OrderStatus::Approved => "APPROVED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::Delivered => "DELIVERED",
        }
    }
}

impl Model {
    /// Rush charge actually billed: the stored fee, but never less than
    /// half the standard delivery fee
    pub fn effective_rush_delivery_fee(&self) -> Decimal {
        match self.delivery_type {
            DeliveryType::Rush => self
                .rush_delivery_fee
                .max(self.delivery_fee * rush_surcharge_rate()),
            DeliveryType::Standard => Decimal::ZERO,
        }
    }

    /// products_total + vat + delivery fees
    pub fn computed_total(&self) -> Decimal {
        self.products_total
            + self.vat_amount
            + self.delivery_fee
            + self.effective_rush_delivery_fee()
    }
}
