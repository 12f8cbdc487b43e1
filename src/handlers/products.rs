use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::entities::product::{self, MediaType};
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::catalog::{ProductSearchParams, ProductSort, RushEligibility};
use crate::{ApiResponse, PaginatedResponse};

/// Catalog item as presented to the storefront; the display price
/// includes the item's own VAT rate
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProductResponse {
    pub id: Uuid,
    pub title: String,
    pub media_type: MediaType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disc_type: Option<String>,
    pub current_price: Decimal,
    pub price_with_vat: Decimal,
    pub stock: i32,
    pub weight_kg: Decimal,
    pub rush_delivery_eligible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ProductResponse {
    pub fn from_model(product: &product::Model) -> Self {
        Self {
            id: product.id,
            title: product.title.clone(),
            media_type: product.media_type,
            disc_type: product.disc_type.clone(),
            current_price: product.current_price,
            price_with_vat: product.price_with_vat(),
            stock: product.stock,
            weight_kg: product.weight_kg,
            rush_delivery_eligible: product.rush_delivery_eligible,
            description: product.description.clone(),
            created_at: product.created_at,
        }
    }
}

pub fn product_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(search_products))
        .route("/random", get(random_products))
        .route("/:id", get(get_product))
        .route("/:id/rush-eligibility", get(rush_eligibility))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ProductSearchQuery {
    /// Title substring to match
    pub q: Option<String>,
    pub media_type: Option<MediaType>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    #[serde(default)]
    pub sort: ProductSort,
    #[serde(default = "default_page")]
    pub page: u64,
    /// Page size, defaulting to the configured size and capped at the maximum
    pub per_page: Option<u64>,
}

fn default_page() -> u64 {
    1
}

/// Search the catalog
#[utoipa::path(
    get,
    path = "/api/v1/products",
    params(ProductSearchQuery),
    responses(
        (status = 200, description = "Matching products", body = Object),
        (status = 400, description = "Invalid filters", body = crate::errors::ErrorResponse)
    ),
    tag = "Products"
)]
pub async fn search_products(
    State(state): State<AppState>,
    Query(query): Query<ProductSearchQuery>,
) -> Result<Json<ApiResponse<PaginatedResponse<ProductResponse>>>, ServiceError> {
    let per_page = query
        .per_page
        .unwrap_or(state.config.api_default_page_size as u64)
        .min(state.config.api_max_page_size as u64);
    let params = ProductSearchParams {
        query: query.q,
        media_type: query.media_type,
        min_price: query.min_price,
        max_price: query.max_price,
        sort: query.sort,
        page: query.page,
        per_page,
    };
    let (products, total) = state.services.catalog.search(&params).await?;

    let total_pages = if total == 0 {
        0
    } else {
        (total + per_page - 1) / per_page
    };
    Ok(Json(ApiResponse::success(PaginatedResponse {
        items: products.iter().map(ProductResponse::from_model).collect(),
        total,
        page: query.page,
        limit: per_page,
        total_pages,
    })))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct RandomQuery {
    #[serde(default = "default_random_count")]
    pub count: u64,
}

fn default_random_count() -> u64 {
    20
}

/// Random storefront picks
#[utoipa::path(
    get,
    path = "/api/v1/products/random",
    params(RandomQuery),
    responses((status = 200, description = "Random products", body = Object)),
    tag = "Products"
)]
pub async fn random_products(
    State(state): State<AppState>,
    Query(query): Query<RandomQuery>,
) -> Result<Json<ApiResponse<Vec<ProductResponse>>>, ServiceError> {
    let count = query.count.min(100);
    let products = state.services.catalog.random_products(count).await?;
    Ok(Json(ApiResponse::success(
        products.iter().map(ProductResponse::from_model).collect(),
    )))
}

/// Fetch one product
#[utoipa::path(
    get,
    path = "/api/v1/products/{id}",
    params(("id" = Uuid, Path, description = "Product id")),
    responses(
        (status = 200, description = "The product", body = Object),
        (status = 404, description = "Unknown product", body = crate::errors::ErrorResponse)
    ),
    tag = "Products"
)]
pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<ProductResponse>>, ServiceError> {
    let product = state.services.catalog.get_product(id).await?;
    Ok(Json(ApiResponse::success(ProductResponse::from_model(
        &product,
    ))))
}

/// Whether the product can be rush delivered
#[utoipa::path(
    get,
    path = "/api/v1/products/{id}/rush-eligibility",
    params(("id" = Uuid, Path, description = "Product id")),
    responses(
        (status = 200, description = "Eligibility verdict", body = Object),
        (status = 404, description = "Unknown product", body = crate::errors::ErrorResponse)
    ),
    tag = "Products"
)]
pub async fn rush_eligibility(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<RushEligibility>>, ServiceError> {
    let eligibility = state.services.catalog.rush_eligibility(id).await?;
    Ok(Json(ApiResponse::success(eligibility)))
}
