use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::cart;
use crate::errors::ServiceError;
use crate::handlers::common::session_token;
use crate::handlers::AppState;
use crate::services::carts::{CartContents, CartSummary, CartValidation};
use crate::services::delivery::DeliveryQuote;
use crate::ApiResponse;

pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/initialize", post(initialize_cart))
        .route("/", get(get_cart).delete(clear_cart))
        .route("/validate", get(validate_cart))
        .route("/items", post(add_item))
        .route(
            "/items/:product_id",
            put(update_item).delete(remove_item),
        )
        .route("/delivery-fees", post(quote_delivery_fees))
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct InitializeCartRequest {
    /// Reuse an existing session token; omitted means mint a fresh one
    pub session_token: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CartSession {
    pub cart_id: Uuid,
    pub session_token: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

impl CartSession {
    fn from_model(cart: &cart::Model) -> Self {
        Self {
            cart_id: cart.id,
            session_token: cart.session_token.clone(),
            expires_at: cart.expires_at,
        }
    }
}

/// Start (or resume) a cart session
#[utoipa::path(
    post,
    path = "/api/v1/carts/initialize",
    request_body = InitializeCartRequest,
    responses((status = 201, description = "Active cart for the session", body = Object)),
    tag = "Carts"
)]
pub async fn initialize_cart(
    State(state): State<AppState>,
    body: Option<Json<InitializeCartRequest>>,
) -> Result<(axum::http::StatusCode, Json<ApiResponse<CartSession>>), ServiceError> {
    let token = body
        .and_then(|Json(req)| req.session_token)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let cart = state.services.carts.get_or_create(&token).await?;
    Ok((
        axum::http::StatusCode::CREATED,
        Json(ApiResponse::success(CartSession::from_model(&cart))),
    ))
}

/// Contents plus totals for the session's cart
#[derive(Debug, Serialize, ToSchema)]
pub struct CartView {
    #[serde(flatten)]
    pub contents: CartContents,
    pub summary: CartSummary,
}

/// Current cart contents and totals
#[utoipa::path(
    get,
    path = "/api/v1/carts",
    responses(
        (status = 200, description = "Cart contents", body = Object),
        (status = 400, description = "Missing session token", body = crate::errors::ErrorResponse)
    ),
    tag = "Carts"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<CartView>>, ServiceError> {
    let token = session_token(&headers)?;
    let contents = state.services.carts.get_contents(&token).await?;
    let summary = state.services.carts.get_summary(&token).await?;
    Ok(Json(ApiResponse::success(CartView { contents, summary })))
}

/// Grade the cart against current stock
#[utoipa::path(
    get,
    path = "/api/v1/carts/validate",
    responses((status = 200, description = "Checkout-readiness verdict", body = Object)),
    tag = "Carts"
)]
pub async fn validate_cart(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<CartValidation>>, ServiceError> {
    let token = session_token(&headers)?;
    let validation = state.services.carts.validate(&token).await?;
    Ok(Json(ApiResponse::success(validation)))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddItemRequest {
    pub product_id: Uuid,
    pub quantity: i32,
}

/// Add a product to the cart
#[utoipa::path(
    post,
    path = "/api/v1/carts/items",
    request_body = AddItemRequest,
    responses(
        (status = 200, description = "Updated cart contents", body = Object),
        (status = 404, description = "Unknown product", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse)
    ),
    tag = "Carts"
)]
pub async fn add_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<AddItemRequest>,
) -> Result<Json<ApiResponse<CartContents>>, ServiceError> {
    let token = session_token(&headers)?;
    let contents = state
        .services
        .carts
        .add_item(&token, request.product_id, request.quantity)
        .await?;
    Ok(Json(ApiResponse::success(contents)))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateItemRequest {
    pub quantity: i32,
}

/// Change the quantity of a cart line
#[utoipa::path(
    put,
    path = "/api/v1/carts/items/{product_id}",
    params(("product_id" = Uuid, Path, description = "Product id")),
    request_body = UpdateItemRequest,
    responses(
        (status = 200, description = "Updated cart contents", body = Object),
        (status = 404, description = "Line not in cart", body = crate::errors::ErrorResponse)
    ),
    tag = "Carts"
)]
pub async fn update_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(product_id): Path<Uuid>,
    Json(request): Json<UpdateItemRequest>,
) -> Result<Json<ApiResponse<CartContents>>, ServiceError> {
    let token = session_token(&headers)?;
    let contents = state
        .services
        .carts
        .update_item_quantity(&token, product_id, request.quantity)
        .await?;
    Ok(Json(ApiResponse::success(contents)))
}

/// Remove a line from the cart
#[utoipa::path(
    delete,
    path = "/api/v1/carts/items/{product_id}",
    params(("product_id" = Uuid, Path, description = "Product id")),
    responses(
        (status = 200, description = "Updated cart contents", body = Object),
        (status = 404, description = "Line not in cart", body = crate::errors::ErrorResponse)
    ),
    tag = "Carts"
)]
pub async fn remove_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(product_id): Path<Uuid>,
) -> Result<Json<ApiResponse<CartContents>>, ServiceError> {
    let token = session_token(&headers)?;
    let contents = state.services.carts.remove_item(&token, product_id).await?;
    Ok(Json(ApiResponse::success(contents)))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct DeliveryFeeRequest {
    pub province: String,
    #[serde(default)]
    pub rush_requested: bool,
}

/// Quote delivery fees for the cart as it stands
#[utoipa::path(
    post,
    path = "/api/v1/carts/delivery-fees",
    request_body = DeliveryFeeRequest,
    responses(
        (status = 200, description = "Delivery quote", body = Object),
        (status = 400, description = "Empty cart or invalid destination", body = crate::errors::ErrorResponse)
    ),
    tag = "Carts"
)]
pub async fn quote_delivery_fees(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<DeliveryFeeRequest>,
) -> Result<Json<ApiResponse<DeliveryQuote>>, ServiceError> {
    let token = session_token(&headers)?;
    let quote = state
        .services
        .carts
        .delivery_quote(&token, &request.province, request.rush_requested)
        .await?;
    Ok(Json(ApiResponse::success(quote)))
}

/// Empty the cart
#[utoipa::path(
    delete,
    path = "/api/v1/carts",
    responses(
        (status = 204, description = "Cart emptied"),
        (status = 404, description = "No active cart", body = crate::errors::ErrorResponse)
    ),
    tag = "Carts"
)]
pub async fn clear_cart(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<axum::http::StatusCode, ServiceError> {
    let token = session_token(&headers)?;
    state.services.carts.clear(&token).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}
