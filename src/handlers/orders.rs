use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::entities::order::OrderStatus;
use crate::entities::order_status_history;
use crate::errors::ServiceError;
use crate::handlers::common::session_token;
use crate::handlers::AppState;
use crate::services::orders::{CreateOrderRequest, OrderDetails, OrderResponse};
use crate::{ApiResponse, PaginatedResponse};

pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_order).get(list_orders))
        .route("/:id", get(get_order))
        .route("/:id/history", get(get_order_history))
        .route("/:id/cancel", post(cancel_order))
        .route("/:id/approve", post(approve_order))
        .route("/:id/reject", post(reject_order))
        .route("/:id/resubmit", post(resubmit_order))
        .route("/:id/ship", post(ship_order))
        .route("/:id/deliver", post(deliver_order))
}

/// Check out the session's cart into an order
#[utoipa::path(
    post,
    path = "/api/v1/orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = Object),
        (status = 400, description = "Validation failed", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderDetails>>), ServiceError> {
    let token = session_token(&headers)?;
    let details = state.services.orders.create_order(&token, &request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(details))))
}

/// Fetch one order with lines and history
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "The order", body = Object),
        (status = 404, description = "Unknown order", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderDetails>>, ServiceError> {
    let details = state.services.orders.get_order(id).await?;
    Ok(Json(ApiResponse::success(details)))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListOrdersQuery {
    pub status: Option<OrderStatus>,
    #[serde(default = "default_page")]
    pub page: u64,
    /// Page size, defaulting to the configured size and capped at the maximum
    pub per_page: Option<u64>,
}

fn default_page() -> u64 {
    1
}

/// List orders, newest first
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(ListOrdersQuery),
    responses((status = 200, description = "Page of orders", body = Object)),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<ApiResponse<PaginatedResponse<OrderResponse>>>, ServiceError> {
    let per_page = query
        .per_page
        .unwrap_or(state.config.api_default_page_size as u64)
        .min(state.config.api_max_page_size as u64);
    let (orders, total) = state
        .services
        .orders
        .list_orders(query.status, query.page, per_page)
        .await?;

    let total_pages = if total == 0 {
        0
    } else {
        (total + per_page - 1) / per_page
    };
    Ok(Json(ApiResponse::success(PaginatedResponse {
        items: orders,
        total,
        page: query.page,
        limit: per_page,
        total_pages,
    })))
}

/// The order's status transition log
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}/history",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Transition log, oldest first", body = Object),
        (status = 404, description = "Unknown order", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn get_order_history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<order_status_history::Model>>>, ServiceError> {
    // surfaces NotFound before returning an empty log
    state.services.orders.get_order(id).await?;
    let history = state.services.orders.load_history(id).await?;
    Ok(Json(ApiResponse::success(history)))
}

/// Cancel an order and restock its lines
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/cancel",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Canceled order", body = Object),
        (status = 409, description = "Order is no longer cancelable", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state.services.orders.cancel_order(id).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Approve a pending order
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/approve",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Approved order", body = Object),
        (status = 402, description = "Rush order not yet paid", body = crate::errors::ErrorResponse),
        (status = 409, description = "Transition not allowed", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn approve_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state.services.order_status.approve(id).await?;
    Ok(Json(ApiResponse::success(order)))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RejectOrderRequest {
    pub reason: String,
}

/// Reject a pending order with a reason
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/reject",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = RejectOrderRequest,
    responses(
        (status = 200, description = "Rejected order", body = Object),
        (status = 409, description = "Transition not allowed", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn reject_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<RejectOrderRequest>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state.services.order_status.reject(id, request.reason).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Put a rejected order back in the review queue
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/resubmit",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order pending again", body = Object),
        (status = 409, description = "Transition not allowed", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn resubmit_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state.services.order_status.resubmit(id).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Mark an approved order shipped
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/ship",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Shipped order", body = Object),
        (status = 409, description = "Transition not allowed", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn ship_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state.services.order_status.mark_shipped(id).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Mark a shipped order delivered
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/deliver",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Delivered order", body = Object),
        (status = 409, description = "Transition not allowed", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn deliver_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state.services.order_status.mark_delivered(id).await?;
    Ok(Json(ApiResponse::success(order)))
}
