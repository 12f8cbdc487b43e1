use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Append-only ledger of provider callbacks, one row per processed
/// notification. The idempotency check for repeated callbacks keys on
/// `(payment_id, transaction_id)`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payment_transactions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub payment_id: Uuid,
    pub transaction_id: String,
    pub transaction_status: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub transaction_content: Option<String>,
    #[sea_orm(nullable)]
    pub bank_code: Option<String>,
    #[sea_orm(nullable)]
    pub card_type: Option<String>,
    #[sea_orm(nullable)]
    pub response_code: Option<String>,
    #[sea_orm(nullable)]
    pub pay_date: Option<String>,
    #[sea_orm(column_type = "Json", nullable)]
    pub provider_data: Option<Json>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::payment::Entity",
        from = "Column::PaymentId",
        to = "super::payment::Column::Id"
    )]
    Payment,
}

impl Related<super::payment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payment.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
