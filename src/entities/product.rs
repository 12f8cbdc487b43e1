use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Disc subtype that raises the DVD minimum stock threshold
pub const DISC_TYPE_BLU_RAY: &str = "BLU_RAY";

/// Catalog media item
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub title: String,

    pub media_type: MediaType,

    /// Physical format detail, only meaningful for DVDs
    #[sea_orm(nullable)]
    pub disc_type: Option<String>,

    /// List value before tax
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub base_value: Decimal,

    /// Current selling price before tax
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub current_price: Decimal,

    pub stock: i32,

    /// Shipping weight in kilograms
    #[sea_orm(column_type = "Decimal(Some((10, 3)))")]
    pub weight_kg: Decimal,

    pub rush_delivery_eligible: bool,

    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::cart_item::Entity")]
    CartItems,
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
}

impl Related<super::cart_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CartItems.def()
    }
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Media kind carried by every catalog item
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
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaType {
    #[sea_orm(string_value = "BOOK")]
    Book,
    #[sea_orm(string_value = "CD")]
    Cd,
    #[sea_orm(string_value = "LP_RECORD")]
    LpRecord,
    #[sea_orm(string_value = "DVD")]
    Dvd,
}

impl MediaType {
    /// VAT rate applied when pricing a single item of this kind
    pub fn vat_rate(self) -> Decimal {
        match self {
            MediaType::Book => dec!(0.05),
            _ => dec!(0.10),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MediaType::Book => "BOOK",
            MediaType::Cd => "CD",
            MediaType::LpRecord => "LP_RECORD",
            MediaType::Dvd => "DVD",
        }
    }
}

impl Model {
    /// Units that must remain on the shelf after a sale before the
    /// remaining stock counts as low
    pub fn min_stock_threshold(&self) -> i32 {
        match self.media_type {
            MediaType::Book => 2,
            MediaType::Dvd if self.disc_type.as_deref() == Some(DISC_TYPE_BLU_RAY) => 2,
            _ => 1,
        }
    }

    /// Price including this item's own VAT rate
    pub fn price_with_vat(&self) -> Decimal {
        self.current_price * (Decimal::ONE + self.media_type.vat_rate())
    }
}
