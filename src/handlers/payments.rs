use std::collections::HashMap;
use std::str::FromStr;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::payment::{self, PaymentMethod};
use crate::errors::ServiceError;
use crate::handlers::common::client_ip;
use crate::handlers::AppState;
use crate::services::payments::{PaymentMethodInfo, PaymentUrlResponse, ReconcileResult};
use crate::ApiResponse;

pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_payment))
        .route("/methods", get(list_methods))
        .route("/return", get(payment_return))
        .route("/callback/:method", get(payment_callback))
        .route("/:id/refund", post(refund_payment))
        .route("/by-order/:order_id", get(payments_by_order))
}

/// Providers this deployment accepts
#[utoipa::path(
    get,
    path = "/api/v1/payments/methods",
    responses((status = 200, description = "Supported payment methods", body = Object)),
    tag = "Payments"
)]
pub async fn list_methods(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<PaymentMethodInfo>>>, ServiceError> {
    Ok(Json(ApiResponse::success(state.services.payments.methods())))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreatePaymentRequest {
    pub order_id: Uuid,
    pub method: PaymentMethod,
}

/// Build the hosted-checkout redirect for an order
#[utoipa::path(
    post,
    path = "/api/v1/payments",
    request_body = CreatePaymentRequest,
    responses(
        (status = 200, description = "Redirect URL issued", body = Object),
        (status = 400, description = "Amount outside gateway bounds", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown order", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order already paid", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn create_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<Json<ApiResponse<PaymentUrlResponse>>, ServiceError> {
    let response = state
        .services
        .payments
        .create_payment_url(request.method, request.order_id, &client_ip(&headers))
        .await?;
    Ok(Json(ApiResponse::success(response)))
}

/// Shopper returning from the gateway.
///
/// Reconciles the signed query and sends the browser back to the
/// storefront confirmation page. When the callback cannot be tied to an
/// order, production still redirects; other environments answer with the
/// diagnostic JSON instead.
#[utoipa::path(
    get,
    path = "/api/v1/payments/return",
    responses((status = 303, description = "Redirect to the storefront confirmation page")),
    tag = "Payments"
)]
pub async fn payment_return(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ServiceError> {
    let result = state
        .services
        .payments
        .reconcile_callback(PaymentMethod::Vnpay, &params)
        .await?;

    let frontend = state.config.frontend_url.trim_end_matches('/');
    let status = if result.success { "success" } else { "failed" };

    match result.order_id {
        Some(order_id) => {
            info!(order_id = %order_id, status, "shopper returned from gateway");
            Ok(Redirect::to(&format!(
                "{}/order/confirmation/{}?status={}",
                frontend, order_id, status
            ))
            .into_response())
        }
        None if state.config.is_production() => {
            Ok(Redirect::to(&format!("{}?payment=failed", frontend)).into_response())
        }
        None => Ok((StatusCode::BAD_REQUEST, Json(ApiResponse::<()>::error(result.message)))
            .into_response()),
    }
}

/// Server-to-server notification from a payment provider
#[utoipa::path(
    get,
    path = "/api/v1/payments/callback/{method}",
    params(("method" = String, Path, description = "Provider, e.g. vnpay")),
    responses((status = 200, description = "Reconciliation verdict", body = Object)),
    tag = "Payments"
)]
pub async fn payment_callback(
    State(state): State<AppState>,
    Path(method): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<ReconcileResult>, ServiceError> {
    let method = PaymentMethod::from_str(&method)
        .map_err(|_| ServiceError::InvalidInput(format!("'{}' is not a payment method", method)))?;

    let result = state
        .services
        .payments
        .reconcile_callback(method, &params)
        .await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RefundPaymentRequest {
    pub amount: Decimal,
    pub reason: String,
}

/// Refund a completed payment
#[utoipa::path(
    post,
    path = "/api/v1/payments/{id}/refund",
    params(("id" = Uuid, Path, description = "Payment id")),
    request_body = RefundPaymentRequest,
    responses(
        (status = 200, description = "Refunded payment", body = Object),
        (status = 400, description = "Bad amount or reason", body = crate::errors::ErrorResponse),
        (status = 409, description = "Payment is not refundable", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn refund_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<RefundPaymentRequest>,
) -> Result<Json<ApiResponse<payment::Model>>, ServiceError> {
    let refunded = state
        .services
        .payments
        .refund(id, request.amount, &request.reason)
        .await?;
    Ok(Json(ApiResponse::success(refunded)))
}

/// Payments recorded against one order
#[utoipa::path(
    get,
    path = "/api/v1/payments/by-order/{order_id}",
    params(("order_id" = Uuid, Path, description = "Order id")),
    responses((status = 200, description = "Payments, newest first", body = Object)),
    tag = "Payments"
)]
pub async fn payments_by_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<payment::Model>>>, ServiceError> {
    let payments = state
        .services
        .payments
        .get_payments_for_order(order_id)
        .await?;
    Ok(Json(ApiResponse::success(payments)))
}
