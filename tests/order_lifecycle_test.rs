//! End-to-end tests for checkout and the order state machine:
//! cart checkout, stock movement, the operator approval workflow,
//! cancellation with restock, and the rush-order payment guard.

mod common;

use axum::http::{Method, StatusCode};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use uuid::Uuid;

use common::{body_json, gateway_query, sign_gateway_params, SeedProduct, TestApp};

fn money(value: &Value) -> Decimal {
    value
        .as_str()
        .unwrap_or_else(|| panic!("expected a decimal string, got {}", value))
        .parse()
        .expect("decimal field parses")
}

fn standard_order_body() -> Value {
    json!({
        "recipient_name": "Nguyen Van A",
        "recipient_email": "nguyen.van.a@example.com",
        "recipient_phone": "0912345678",
        "delivery_province": "Hanoi",
        "delivery_address": "12 Trang Tien Street, Hoan Kiem District",
        "delivery_type": "STANDARD"
    })
}

fn rush_order_body(delivery_time: chrono::DateTime<Utc>) -> Value {
    json!({
        "recipient_name": "Nguyen Van A",
        "recipient_email": "nguyen.van.a@example.com",
        "recipient_phone": "0912345678",
        "delivery_province": "Hanoi",
        "delivery_address": "12 Trang Tien Street, Hoan Kiem District",
        "delivery_type": "RUSH",
        "rush_delivery_time": delivery_time.to_rfc3339(),
        "rush_delivery_instructions": "Call on arrival"
    })
}

/// Seeds a product, fills a cart, and checks it out. Returns the order JSON.
async fn place_order(app: &TestApp, body: Value) -> Value {
    let product = app
        .seed_product(SeedProduct {
            price: dec!(100000),
            stock: 10,
            ..Default::default()
        })
        .await;
    place_order_for(app, product.id, 2, body).await
}

async fn place_order_for(app: &TestApp, product_id: Uuid, quantity: i32, body: Value) -> Value {
    let token = app.init_cart().await;
    let response = app
        .request(
            Method::POST,
            "/api/v1/carts/items",
            Some(json!({ "product_id": product_id, "quantity": quantity })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .request(Method::POST, "/api/v1/orders", Some(body), Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await
}

/// Drives a signed gateway callback marking the order paid.
async fn complete_payment(app: &TestApp, order_id: &str, total: Decimal) {
    let amount_minor = (total * Decimal::from(100)).normalize().to_string();
    let params = sign_gateway_params(
        &app.state.config.vnpay_hash_secret,
        &[
            ("vnp_TxnRef", order_id.to_string()),
            ("vnp_Amount", amount_minor),
            ("vnp_ResponseCode", "00".to_string()),
            ("vnp_TransactionStatus", "00".to_string()),
            ("vnp_TransactionNo", "14226112".to_string()),
            ("vnp_PayDate", "20240315104500".to_string()),
        ],
    );

    let uri = format!("/api/v1/payments/callback/vnpay?{}", gateway_query(&params));
    let response = app.request(Method::GET, &uri, None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true, "payment callback: {}", json);
}

#[tokio::test]
async fn checkout_creates_a_pending_order_and_decrements_stock() {
    let app = TestApp::new().await;
    let product = app
        .seed_product(SeedProduct {
            price: dec!(100000),
            stock: 10,
            weight_kg: dec!(1),
            ..Default::default()
        })
        .await;

    let json = place_order_for(&app, product.id, 2, standard_order_body()).await;
    let order = &json["data"];

    assert_eq!(order["status"], "PENDING_PROCESSING");
    assert_eq!(order["payment_status"], "PENDING");
    assert_eq!(money(&order["products_total"]), dec!(200000));
    assert_eq!(money(&order["vat_amount"]), dec!(20000));
    // 30000 base + 1kg x 5000 + 5000 Hanoi adjustment
    assert_eq!(money(&order["delivery_fee"]), dec!(40000));
    assert_eq!(money(&order["total_amount"]), dec!(260000));
    assert_eq!(order["items"].as_array().unwrap().len(), 1);
    assert_eq!(order["items"][0]["quantity"], 2);

    // stock was reserved at checkout
    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/products/{}", product.id),
            None,
            None,
        )
        .await;
    let product_json = body_json(response).await;
    assert_eq!(product_json["data"]["stock"], 8);
}

#[tokio::test]
async fn checkout_requires_an_active_cart_with_items() {
    let app = TestApp::new().await;
    let token = app.init_cart().await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(standard_order_body()),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn checkout_rejects_bad_recipient_details() {
    let app = TestApp::new().await;
    let product = app.seed_product(SeedProduct::default()).await;
    let token = app.init_cart().await;
    app.request(
        Method::POST,
        "/api/v1/carts/items",
        Some(json!({ "product_id": product.id, "quantity": 1 })),
        Some(&token),
    )
    .await;

    let mut body = standard_order_body();
    body["recipient_email"] = json!("not-an-email");
    body["delivery_address"] = json!("short");

    let response = app
        .request(Method::POST, "/api/v1/orders", Some(body), Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn the_order_can_be_fetched_with_its_history() {
    let app = TestApp::new().await;
    let json = place_order(&app, standard_order_body()).await;
    let order_id = json["data"]["id"].as_str().unwrap().to_string();

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}", order_id),
            None,
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}/history", order_id),
            None,
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let history = body_json(response).await;
    assert_eq!(history["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_orders_return_not_found() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}", Uuid::new_v4()),
            None,
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}/history", Uuid::new_v4()),
            None,
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn a_pending_order_walks_the_happy_path_to_delivered() {
    let app = TestApp::new().await;
    let json = place_order(&app, standard_order_body()).await;
    let order_id = json["data"]["id"].as_str().unwrap().to_string();

    for (action, expected) in [
        ("approve", "APPROVED"),
        ("ship", "SHIPPED"),
        ("deliver", "DELIVERED"),
    ] {
        let response = app
            .request(
                Method::POST,
                &format!("/api/v1/orders/{}/{}", order_id, action),
                None,
                None,
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK, "action {}", action);
        let json = body_json(response).await;
        assert_eq!(json["data"]["status"], expected);
    }

    // the log now records created -> approved -> shipped -> delivered
    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}/history", order_id),
            None,
            None,
        )
        .await;
    let history = body_json(response).await;
    assert_eq!(history["data"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn illegal_transitions_are_conflicts() {
    let app = TestApp::new().await;
    let json = place_order(&app, standard_order_body()).await;
    let order_id = json["data"]["id"].as_str().unwrap().to_string();

    // cannot ship an order that was never approved
    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/ship", order_id),
            None,
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // cannot deliver it either
    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/deliver", order_id),
            None,
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn rejection_records_a_reason_and_resubmission_clears_it() {
    let app = TestApp::new().await;
    let json = place_order(&app, standard_order_body()).await;
    let order_id = json["data"]["id"].as_str().unwrap().to_string();

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/reject", order_id),
            Some(json!({ "reason": "Suspicious delivery address" })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["status"], "REJECTED");
    assert_eq!(
        json["data"]["rejected_reason"],
        "Suspicious delivery address"
    );

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/resubmit", order_id),
            None,
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["status"], "PENDING_PROCESSING");
    assert!(json["data"]["rejected_reason"].is_null());
}

#[tokio::test]
async fn cancellation_restores_stock() {
    let app = TestApp::new().await;
    let product = app
        .seed_product(SeedProduct {
            stock: 10,
            ..Default::default()
        })
        .await;
    let json = place_order_for(&app, product.id, 4, standard_order_body()).await;
    let order_id = json["data"]["id"].as_str().unwrap().to_string();

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/cancel", order_id),
            None,
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["status"], "CANCELED");

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/products/{}", product.id),
            None,
            None,
        )
        .await;
    let product_json = body_json(response).await;
    assert_eq!(product_json["data"]["stock"], 10);

    // a canceled order cannot be canceled again
    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/cancel", order_id),
            None,
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn shipped_orders_are_no_longer_cancelable() {
    let app = TestApp::new().await;
    let json = place_order(&app, standard_order_body()).await;
    let order_id = json["data"]["id"].as_str().unwrap().to_string();

    for action in ["approve", "ship"] {
        app.request(
            Method::POST,
            &format!("/api/v1/orders/{}/{}", order_id, action),
            None,
            None,
        )
        .await;
    }

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/cancel", order_id),
            None,
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn rush_orders_within_the_window_are_accepted() {
    let app = TestApp::new().await;
    let json = place_order(&app, rush_order_body(Utc::now() + Duration::hours(47))).await;
    let order = &json["data"];

    assert_eq!(order["delivery_type"], "RUSH");
    assert!(money(&order["rush_delivery_fee"]) > Decimal::ZERO);
}

#[tokio::test]
async fn rush_orders_beyond_the_window_are_rejected() {
    let app = TestApp::new().await;
    let product = app.seed_product(SeedProduct::default()).await;
    let token = app.init_cart().await;
    app.request(
        Method::POST,
        "/api/v1/carts/items",
        Some(json!({ "product_id": product.id, "quantity": 1 })),
        Some(&token),
    )
    .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(rush_order_body(Utc::now() + Duration::hours(49))),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn rush_orders_need_every_item_rush_eligible() {
    let app = TestApp::new().await;
    let product = app
        .seed_product(SeedProduct {
            rush_delivery_eligible: false,
            ..Default::default()
        })
        .await;
    let token = app.init_cart().await;
    app.request(
        Method::POST,
        "/api/v1/carts/items",
        Some(json!({ "product_id": product.id, "quantity": 1 })),
        Some(&token),
    )
    .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(rush_order_body(Utc::now() + Duration::hours(24))),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn rush_orders_cannot_be_approved_before_payment() {
    let app = TestApp::new().await;
    let json = place_order(&app, rush_order_body(Utc::now() + Duration::hours(24))).await;
    let order_id = json["data"]["id"].as_str().unwrap().to_string();
    let total = money(&json["data"]["total_amount"]);

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/approve", order_id),
            None,
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);

    complete_payment(&app, &order_id, total).await;

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/approve", order_id),
            None,
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["status"], "APPROVED");
}

#[tokio::test]
async fn order_listing_filters_by_status() {
    let app = TestApp::new().await;
    let product = app
        .seed_product(SeedProduct {
            stock: 50,
            ..Default::default()
        })
        .await;

    let first = place_order_for(&app, product.id, 1, standard_order_body()).await;
    let _second = place_order_for(&app, product.id, 1, standard_order_body()).await;

    let first_id = first["data"]["id"].as_str().unwrap().to_string();
    app.request(
        Method::POST,
        &format!("/api/v1/orders/{}/approve", first_id),
        None,
        None,
    )
    .await;

    let response = app
        .request(Method::GET, "/api/v1/orders?status=APPROVED", None, None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["total"], 1);
    assert_eq!(json["data"]["items"][0]["id"], first_id.as_str());

    let response = app.request(Method::GET, "/api/v1/orders", None, None).await;
    let json = body_json(response).await;
    assert_eq!(json["data"]["total"], 2);
}
