use std::sync::Arc;

use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, Order, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::product::{self, Column as ProductColumn, Entity as Product, MediaType};
use crate::errors::ServiceError;

/// Read side of the media catalog.
///
/// Browsing, search, and the per-item stock checks the cart and checkout
/// paths rely on. Catalog writes happen out of band, so this service never
/// mutates product rows.
#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DatabaseConnection>,
}

impl CatalogService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Searches the catalog with pagination.
    ///
    /// # Arguments
    ///
    /// * `params` - Title query, media kind, price bounds, sort, and page
    ///
    /// # Returns
    ///
    /// The matching page of products and the total match count.
    #[instrument(skip(self))]
    pub async fn search(
        &self,
        params: &ProductSearchParams,
    ) -> Result<(Vec<product::Model>, u64), ServiceError> {
        let db = &*self.db;

        if params.per_page == 0 {
            return Err(ServiceError::ValidationError(
                "Page size must be at least 1".to_string(),
            ));
        }
        if let (Some(min), Some(max)) = (params.min_price, params.max_price) {
            if min > max {
                return Err(ServiceError::ValidationError(
                    "Minimum price cannot exceed maximum price".to_string(),
                ));
            }
        }

        let mut query = Product::find();

        if let Some(term) = params
            .query
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
        {
            query = query.filter(ProductColumn::Title.contains(term));
        }
        if let Some(media_type) = params.media_type {
            query = query.filter(ProductColumn::MediaType.eq(media_type));
        }
        if let Some(min) = params.min_price {
            query = query.filter(ProductColumn::CurrentPrice.gte(min));
        }
        if let Some(max) = params.max_price {
            query = query.filter(ProductColumn::CurrentPrice.lte(max));
        }

        query = match params.sort {
            ProductSort::PriceAsc => query.order_by_asc(ProductColumn::CurrentPrice),
            ProductSort::PriceDesc => query.order_by_desc(ProductColumn::CurrentPrice),
            ProductSort::TitleAsc => query.order_by_asc(ProductColumn::Title),
            ProductSort::TitleDesc => query.order_by_desc(ProductColumn::Title),
            ProductSort::Newest => query.order_by_desc(ProductColumn::CreatedAt),
        };

        let paginator = query.paginate(db, params.per_page);
        let total = paginator.num_items().await?;
        let page_index = params.page.saturating_sub(1);
        let products = paginator.fetch_page(page_index).await?;

        Ok((products, total))
    }

    /// Fetches a single product by id
    #[instrument(skip(self))]
    pub async fn get_product(&self, id: Uuid) -> Result<product::Model, ServiceError> {
        let db = &*self.db;

        Product::find_by_id(id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", id)))
    }

    /// Picks up to `count` products at random, for the storefront landing page
    #[instrument(skip(self))]
    pub async fn random_products(&self, count: u64) -> Result<Vec<product::Model>, ServiceError> {
        let db = &*self.db;

        // RANDOM() is understood by both backends in use
        let products = Product::find()
            .order_by(Expr::cust("RANDOM()"), Order::Asc)
            .limit(count)
            .all(db)
            .await?;

        Ok(products)
    }

    /// Reports whether a product can be rush delivered
    #[instrument(skip(self))]
    pub async fn rush_eligibility(&self, id: Uuid) -> Result<RushEligibility, ServiceError> {
        let product = self.get_product(id).await?;

        let reason = if product.rush_delivery_eligible {
            None
        } else {
            Some("This item is not eligible for rush delivery".to_string())
        };

        Ok(RushEligibility {
            product_id: product.id,
            eligible: product.rush_delivery_eligible,
            reason,
        })
    }
}

/// Classifies how well current stock covers a requested quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockStatus {
    /// Fewer units on the shelf than requested; the line cannot be fulfilled
    Insufficient { available: i32, requested: i32 },
    /// Fulfillable, but the sale would drop stock below the item's threshold
    Low { available: i32 },
    Available,
}

impl StockStatus {
    pub fn code(&self) -> &'static str {
        match self {
            StockStatus::Insufficient { .. } => "INSUFFICIENT",
            StockStatus::Low { .. } => "LOW",
            StockStatus::Available => "AVAILABLE",
        }
    }

    pub fn message(&self) -> Option<String> {
        match self {
            StockStatus::Insufficient {
                available,
                requested,
            } => Some(format!(
                "Insufficient stock. Available: {}, Requested: {}",
                available, requested
            )),
            StockStatus::Low { available } => {
                Some(format!("Low stock warning. Available: {}", available))
            }
            StockStatus::Available => None,
        }
    }

    pub fn blocks_checkout(&self) -> bool {
        matches!(self, StockStatus::Insufficient { .. })
    }
}

/// Grades `requested` units against the product's stock and its
/// kind-specific minimum threshold
pub fn evaluate_stock(product: &product::Model, requested: i32) -> StockStatus {
    if requested > product.stock {
        StockStatus::Insufficient {
            available: product.stock,
            requested,
        }
    } else if product.stock - requested < product.min_stock_threshold() {
        StockStatus::Low {
            available: product.stock,
        }
    } else {
        StockStatus::Available
    }
}

/// Sort orders accepted by catalog search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProductSort {
    PriceAsc,
    PriceDesc,
    TitleAsc,
    TitleDesc,
    #[default]
    Newest,
}

/// Catalog search filters; all optional
#[derive(Debug, Clone, Deserialize)]
pub struct ProductSearchParams {
    pub query: Option<String>,
    pub media_type: Option<MediaType>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    #[serde(default)]
    pub sort: ProductSort,
    pub page: u64,
    pub per_page: u64,
}

/// Rush delivery answer for one product
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RushEligibility {
    pub product_id: Uuid,
    pub eligible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
