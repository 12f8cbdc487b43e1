use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "AIMS API",
        version = "1.0.0",
        description = r#"
# AIMS Internet Media Store API

Backend for an online media store selling books, CDs, LP records, and DVDs.

## Features

- **Catalog**: Search and browse media products with per-kind VAT pricing
- **Carts**: Session-scoped carts with live stock grading
- **Delivery**: Standard and rush delivery fee quoting by province and weight
- **Orders**: Cart checkout, operator approval workflow, and cancellation
- **Payments**: VNPay hosted checkout with signed callback reconciliation

## Sessions

Cart and checkout endpoints identify the shopper by the opaque
`X-Session-Token` header. Obtain a token from `POST /api/v1/carts/initialize`.

## Error Handling

The API uses consistent error response formats with appropriate HTTP status codes:

```json
{
  "error": "Bad Request",
  "message": "Validation failed",
  "timestamp": "2024-01-01T00:00:00Z"
}
```

## Pagination

List endpoints support pagination with the following query parameters:
- `page`: Page number (default: 1)
- `per_page`: Items per page (default: 20)
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080/api/v1", description = "Local development")
    ),
    tags(
        (name = "Products", description = "Catalog browsing endpoints"),
        (name = "Carts", description = "Session cart endpoints"),
        (name = "Orders", description = "Checkout and order lifecycle endpoints"),
        (name = "Payments", description = "Payment processing endpoints")
    ),
    paths(
        // Products
        crate::handlers::products::search_products,
        crate::handlers::products::random_products,
        crate::handlers::products::get_product,
        crate::handlers::products::rush_eligibility,

        // Carts
        crate::handlers::carts::initialize_cart,
        crate::handlers::carts::get_cart,
        crate::handlers::carts::validate_cart,
        crate::handlers::carts::add_item,
        crate::handlers::carts::update_item,
        crate::handlers::carts::remove_item,
        crate::handlers::carts::quote_delivery_fees,
        crate::handlers::carts::clear_cart,

        // Orders
        crate::handlers::orders::create_order,
        crate::handlers::orders::get_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order_history,
        crate::handlers::orders::cancel_order,
        crate::handlers::orders::approve_order,
        crate::handlers::orders::reject_order,
        crate::handlers::orders::resubmit_order,
        crate::handlers::orders::ship_order,
        crate::handlers::orders::deliver_order,

        // Payments
        crate::handlers::payments::list_methods,
        crate::handlers::payments::create_payment,
        crate::handlers::payments::payment_return,
        crate::handlers::payments::payment_callback,
        crate::handlers::payments::refund_payment,
        crate::handlers::payments::payments_by_order,
    ),
    components(
        schemas(
            // Common types
            crate::ApiResponse<serde_json::Value>,
            crate::PaginatedResponse<serde_json::Value>,

            // Catalog types
            crate::handlers::products::ProductResponse,
            crate::entities::product::MediaType,
            crate::services::catalog::RushEligibility,

            // Cart types
            crate::handlers::carts::InitializeCartRequest,
            crate::handlers::carts::CartSession,
            crate::handlers::carts::AddItemRequest,
            crate::handlers::carts::UpdateItemRequest,
            crate::handlers::carts::DeliveryFeeRequest,
            crate::services::carts::CartContents,
            crate::services::carts::CartLine,
            crate::services::carts::CartSummary,
            crate::services::carts::CartValidation,
            crate::services::carts::InvalidCartItem,
            crate::services::delivery::DeliveryQuote,

            // Order types
            crate::services::orders::CreateOrderRequest,
            crate::services::orders::OrderResponse,
            crate::services::orders::OrderItemResponse,
            crate::handlers::orders::RejectOrderRequest,
            crate::entities::order::OrderStatus,
            crate::entities::order::DeliveryType,

            // Payments types
            crate::handlers::payments::CreatePaymentRequest,
            crate::handlers::payments::RefundPaymentRequest,
            crate::services::payments::PaymentMethodInfo,
            crate::services::payments::PaymentUrlResponse,
            crate::services::payments::ReconcileResult,
            crate::entities::payment::PaymentMethod,
            crate::entities::payment::PaymentState,

            // Error types
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
