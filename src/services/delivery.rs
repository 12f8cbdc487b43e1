use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use utoipa::ToSchema;

use crate::entities::order::DeliveryType;
use crate::errors::ServiceError;

/// Chargeable weight assumed when a cart has no physical items to weigh
pub const DEFAULT_ITEM_WEIGHT_KG: Decimal = dec!(0.5);

/// Fee coefficients for one delivery kind.
///
/// A schedule is a plain record: base fee plus a per-kilogram rate, a
/// province adjustment table, and the order value above which shipping
/// is free. Tables are built once at startup.
#[derive(Debug, Clone)]
pub struct FeeSchedule {
    pub base_fee: Decimal,
    pub per_kg_fee: Decimal,
    /// Adjustment per province, keyed by lowercased province name
    province_adjustments: HashMap<String, Decimal>,
    pub default_adjustment: Decimal,
    /// VAT-inclusive order value at which the fee drops to zero
    pub free_shipping_threshold: Decimal,
}

impl FeeSchedule {
    pub fn new(
        base_fee: Decimal,
        per_kg_fee: Decimal,
        adjustments: &[(&str, Decimal)],
        default_adjustment: Decimal,
        free_shipping_threshold: Decimal,
    ) -> Self {
        let province_adjustments = adjustments
            .iter()
            .map(|(name, fee)| (name.to_lowercase(), *fee))
            .collect();
        Self {
            base_fee,
            per_kg_fee,
            province_adjustments,
            default_adjustment,
            free_shipping_threshold,
        }
    }

    /// Standard ground delivery
    pub fn standard() -> Self {
        Self::new(
            dec!(30000),
            dec!(5000),
            &[
                ("Ho Chi Minh City", dec!(0)),
                ("Hanoi", dec!(5000)),
                ("Da Nang", dec!(10000)),
                ("Can Tho", dec!(15000)),
                ("Hai Phong", dec!(12000)),
            ],
            dec!(20000),
            dec!(500000),
        )
    }

    /// Two-hour rush delivery
    pub fn rush() -> Self {
        Self::new(
            dec!(50000),
            dec!(8000),
            &[
                ("Ho Chi Minh City", dec!(0)),
                ("Hanoi", dec!(10000)),
                ("Da Nang", dec!(20000)),
                ("Can Tho", dec!(30000)),
                ("Hai Phong", dec!(25000)),
            ],
            dec!(40000),
            dec!(1000000),
        )
    }

    fn adjustment_for(&self, province: &str) -> Decimal {
        self.province_adjustments
            .get(&province.trim().to_lowercase())
            .copied()
            .unwrap_or(self.default_adjustment)
    }

    /// base + weight rate + province adjustment, before free shipping
    pub fn compute(&self, province: &str, chargeable_weight_kg: Decimal) -> Decimal {
        self.base_fee + chargeable_weight_kg * self.per_kg_fee + self.adjustment_for(province)
    }
}

/// Inputs for a delivery fee quote
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryQuoteParams {
    pub province: String,
    /// VAT-inclusive value of the goods; free shipping keys off this
    pub order_value: Decimal,
    /// Heaviest single item in the shipment; `None` falls back to
    /// [`DEFAULT_ITEM_WEIGHT_KG`]
    pub heaviest_item_weight_kg: Option<Decimal>,
    pub rush_requested: bool,
}

/// One computed quote
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DeliveryQuote {
    pub standard_fee: Decimal,
    /// Present only when rush delivery was requested
    pub rush_fee: Option<Decimal>,
    pub free_shipping_applied: bool,
    pub chargeable_weight_kg: Decimal,
}

impl DeliveryQuote {
    /// Sum of every fee in the quote
    pub fn total_fee(&self) -> Decimal {
        self.standard_fee + self.rush_fee.unwrap_or(Decimal::ZERO)
    }
}

/// Computes delivery fees from per-kind schedules.
///
/// # Examples
///
/// ```ignore
/// let delivery = DeliveryService::new();
/// let quote = delivery.quote(&DeliveryQuoteParams {
///     province: "Hanoi".into(),
///     order_value: dec!(200000),
///     heaviest_item_weight_kg: Some(dec!(2)),
///     rush_requested: false,
/// })?;
/// assert_eq!(quote.standard_fee, dec!(45000));
/// ```
#[derive(Debug, Clone)]
pub struct DeliveryService {
    standard: FeeSchedule,
    rush: FeeSchedule,
    /// Provinces where rush delivery is never offered
    restricted_rush_provinces: Vec<String>,
}

impl Default for DeliveryService {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliveryService {
    pub fn new() -> Self {
        Self::with_schedules(
            FeeSchedule::standard(),
            FeeSchedule::rush(),
            &["Remote Areas", "International"],
        )
    }

    pub fn with_schedules(
        standard: FeeSchedule,
        rush: FeeSchedule,
        restricted_rush_provinces: &[&str],
    ) -> Self {
        Self {
            standard,
            rush,
            restricted_rush_provinces: restricted_rush_provinces
                .iter()
                .map(|p| p.to_lowercase())
                .collect(),
        }
    }

    fn schedule_for(&self, kind: DeliveryType) -> &FeeSchedule {
        match kind {
            DeliveryType::Standard => &self.standard,
            DeliveryType::Rush => &self.rush,
        }
    }

    pub fn rush_available_in(&self, province: &str) -> bool {
        let normalized = province.trim().to_lowercase();
        !self
            .restricted_rush_provinces
            .iter()
            .any(|p| *p == normalized)
    }

    /// Delivery kinds offered for the given province
    pub fn available_kinds(&self, province: &str) -> Vec<DeliveryType> {
        if self.rush_available_in(province) {
            vec![DeliveryType::Standard, DeliveryType::Rush]
        } else {
            vec![DeliveryType::Standard]
        }
    }

    /// Computes a delivery quote.
    ///
    /// The standard fee is zeroed once the order value reaches the standard
    /// free shipping threshold. A rush quote above the rush threshold zeroes
    /// both fees.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::ValidationError` when the province is empty,
    /// the order value or weight is out of range, or rush delivery was
    /// requested for a restricted province.
    #[instrument(skip(self))]
    pub fn quote(&self, params: &DeliveryQuoteParams) -> Result<DeliveryQuote, ServiceError> {
        let province = params.province.trim();
        if province.is_empty() {
            return Err(ServiceError::ValidationError(
                "Delivery province is required".to_string(),
            ));
        }
        if params.order_value < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Order value cannot be negative".to_string(),
            ));
        }
        if params.rush_requested && !self.rush_available_in(province) {
            return Err(ServiceError::ValidationError(format!(
                "Rush delivery is not available in {}",
                province
            )));
        }

        let chargeable_weight_kg = match params.heaviest_item_weight_kg {
            Some(w) if w <= Decimal::ZERO => {
                return Err(ServiceError::ValidationError(
                    "Item weight must be positive".to_string(),
                ))
            }
            Some(w) => w,
            None => DEFAULT_ITEM_WEIGHT_KG,
        };

        let standard = self.schedule_for(DeliveryType::Standard);
        let standard_free = params.order_value >= standard.free_shipping_threshold;
        let mut standard_fee = if standard_free {
            Decimal::ZERO
        } else {
            standard.compute(province, chargeable_weight_kg)
        };

        let mut rush_free = false;
        let rush_fee = if params.rush_requested {
            let rush = self.schedule_for(DeliveryType::Rush);
            rush_free = params.order_value >= rush.free_shipping_threshold;
            if rush_free {
                // rush free shipping waives the standard portion too
                standard_fee = Decimal::ZERO;
                Some(Decimal::ZERO)
            } else {
                Some(rush.compute(province, chargeable_weight_kg))
            }
        } else {
            None
        };

        Ok(DeliveryQuote {
            standard_fee,
            rush_fee,
            free_shipping_applied: standard_free || rush_free,
            chargeable_weight_kg,
        })
    }
}
