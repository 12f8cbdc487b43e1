//! Payment flow tests: hosted-checkout URL issuance, signed gateway
//! callbacks, reconciliation idempotency, and refunds.

mod common;

use axum::http::{Method, StatusCode};
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

/// Seeds a product, checks out a cart, and returns (order_id, total_amount).
async fn place_order(app: &TestApp) -> (String, Decimal) {
    let product = app
        .seed_product(SeedProduct {
            price: dec!(100000),
            stock: 20,
            ..Default::default()
        })
        .await;
    let token = app.init_cart().await;
    app.request(
        Method::POST,
        "/api/v1/carts/items",
        Some(json!({ "product_id": product.id, "quantity": 2 })),
        Some(&token),
    )
    .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(json!({
                "recipient_name": "Tran Thi B",
                "recipient_email": "tran.thi.b@example.com",
                "recipient_phone": "0987654321",
                "delivery_province": "Ho Chi Minh City",
                "delivery_address": "45 Le Loi Boulevard, District 1",
                "delivery_type": "STANDARD"
            })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    (
        json["data"]["id"].as_str().unwrap().to_string(),
        money(&json["data"]["total_amount"]),
    )
}

fn success_callback_params(order_id: &str, total: Decimal) -> Vec<(&'static str, String)> {
    let amount_minor = (total * Decimal::from(100)).normalize().to_string();
    vec![
        ("vnp_TxnRef", order_id.to_string()),
        ("vnp_Amount", amount_minor),
        ("vnp_ResponseCode", "00".to_string()),
        ("vnp_TransactionStatus", "00".to_string()),
        ("vnp_TransactionNo", "14226112".to_string()),
        ("vnp_BankCode", "NCB".to_string()),
        ("vnp_PayDate", "20240315104500".to_string()),
        ("vnp_OrderInfo", format!("Thanh toan cho ma GD: {}", order_id)),
    ]
}

async fn send_callback(app: &TestApp, params: &[(&str, String)]) -> Value {
    let signed = sign_gateway_params(&app.state.config.vnpay_hash_secret, params);
    let uri = format!("/api/v1/payments/callback/vnpay?{}", gateway_query(&signed));
    let response = app.request(Method::GET, &uri, None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

#[tokio::test]
async fn the_method_listing_offers_vnpay() {
    let app = TestApp::new().await;

    let response = app
        .request(Method::GET, "/api/v1/payments/methods", None, None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let methods = json["data"].as_array().unwrap();
    assert_eq!(methods.len(), 1);
    assert_eq!(methods[0]["method"], "VNPAY");
    assert_eq!(methods[0]["display_name"], "VNPay");
}

#[tokio::test]
async fn a_payment_url_is_issued_for_a_pending_order() {
    let app = TestApp::new().await;
    let (order_id, total) = place_order(&app).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/payments",
            Some(json!({ "order_id": order_id, "method": "VNPAY" })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;

    let url = json["data"]["payment_url"].as_str().unwrap();
    assert!(url.starts_with("https://sandbox.vnpayment.vn/"));
    assert!(url.contains(&format!("vnp_TxnRef={}", order_id)));
    assert!(url.contains("vnp_SecureHash="));
    let amount_minor = (total * Decimal::from(100)).normalize().to_string();
    assert!(url.contains(&format!("vnp_Amount={}", amount_minor)));
}

#[tokio::test]
async fn payment_urls_are_refused_for_unknown_orders() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/payments",
            Some(json!({ "order_id": Uuid::new_v4(), "method": "VNPAY" })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn a_signed_success_callback_completes_the_payment() {
    let app = TestApp::new().await;
    let (order_id, total) = place_order(&app).await;

    let json = send_callback(&app, &success_callback_params(&order_id, total)).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["order_id"], order_id.as_str());
    assert!(json["payment_id"].as_str().is_some());

    // the order now reads as paid
    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}", order_id),
            None,
            None,
        )
        .await;
    let order = body_json(response).await;
    assert_eq!(order["data"]["payment_status"], "COMPLETED");

    // and the ledger shows exactly one payment
    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/payments/by-order/{}", order_id),
            None,
            None,
        )
        .await;
    let payments = body_json(response).await;
    assert_eq!(payments["data"].as_array().unwrap().len(), 1);
    assert_eq!(payments["data"][0]["status"], "COMPLETED");
}

#[tokio::test]
async fn replayed_callbacks_are_idempotent() {
    let app = TestApp::new().await;
    let (order_id, total) = place_order(&app).await;
    let params = success_callback_params(&order_id, total);

    let first = send_callback(&app, &params).await;
    let second = send_callback(&app, &params).await;

    assert_eq!(first["success"], true);
    assert_eq!(second["success"], true);
    assert_eq!(first["payment_id"], second["payment_id"]);

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/payments/by-order/{}", order_id),
            None,
            None,
        )
        .await;
    let payments = body_json(response).await;
    assert_eq!(payments["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn amount_mismatches_do_not_complete_the_payment() {
    let app = TestApp::new().await;
    let (order_id, _total) = place_order(&app).await;

    let json = send_callback(
        &app,
        &[
            ("vnp_TxnRef", order_id.clone()),
            ("vnp_Amount", "100".to_string()),
            ("vnp_ResponseCode", "00".to_string()),
            ("vnp_TransactionStatus", "00".to_string()),
        ],
    )
    .await;
    assert_eq!(json["success"], false);

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}", order_id),
            None,
            None,
        )
        .await;
    let order = body_json(response).await;
    assert_eq!(order["data"]["payment_status"], "PENDING");
}

#[tokio::test]
async fn declined_callbacks_leave_the_order_unpaid() {
    let app = TestApp::new().await;
    let (order_id, total) = place_order(&app).await;
    let amount_minor = (total * Decimal::from(100)).normalize().to_string();

    let json = send_callback(
        &app,
        &[
            ("vnp_TxnRef", order_id.clone()),
            ("vnp_Amount", amount_minor),
            ("vnp_ResponseCode", "24".to_string()),
        ],
    )
    .await;
    assert_eq!(json["success"], false);

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/payments/by-order/{}", order_id),
            None,
            None,
        )
        .await;
    let payments = body_json(response).await;
    assert!(payments["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn tampered_callbacks_fail_reconciliation() {
    let app = TestApp::new().await;
    let (order_id, total) = place_order(&app).await;

    let mut signed = sign_gateway_params(
        &app.state.config.vnpay_hash_secret,
        &success_callback_params(&order_id, total),
    );
    signed.insert("vnp_Amount".to_string(), "999".to_string());

    let uri = format!("/api/v1/payments/callback/vnpay?{}", gateway_query(&signed));
    let response = app.request(Method::GET, &uri, None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn paid_orders_refuse_a_second_payment_url() {
    let app = TestApp::new().await;
    let (order_id, total) = place_order(&app).await;
    send_callback(&app, &success_callback_params(&order_id, total)).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/payments",
            Some(json!({ "order_id": order_id, "method": "VNPAY" })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn the_return_endpoint_redirects_to_the_storefront() {
    let app = TestApp::new().await;
    let (order_id, total) = place_order(&app).await;

    let signed = sign_gateway_params(
        &app.state.config.vnpay_hash_secret,
        &success_callback_params(&order_id, total),
    );
    let uri = format!("/api/v1/payments/return?{}", gateway_query(&signed));
    let response = app.request(Method::GET, &uri, None, None).await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let location = response
        .headers()
        .get("location")
        .and_then(|v| v.to_str().ok())
        .expect("redirect location");
    assert!(location.contains(&format!("/order/confirmation/{}", order_id)));
    assert!(location.ends_with("status=success"));
}

#[tokio::test]
async fn unattributable_returns_answer_with_diagnostics_outside_production() {
    let app = TestApp::new().await;

    // unsigned junk cannot be tied to an order
    let response = app
        .request(
            Method::GET,
            "/api/v1/payments/return?vnp_ResponseCode=00",
            None,
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn completed_payments_can_be_refunded_once_within_bounds() {
    let app = TestApp::new().await;
    let (order_id, total) = place_order(&app).await;
    let json = send_callback(&app, &success_callback_params(&order_id, total)).await;
    let payment_id = json["payment_id"].as_str().unwrap().to_string();

    // a flimsy reason is refused
    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/payments/{}/refund", payment_id),
            Some(json!({ "amount": total, "reason": "oops" })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // so is refunding more than was captured
    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/payments/{}/refund", payment_id),
            Some(json!({ "amount": total + dec!(1), "reason": "Customer canceled the order" })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/payments/{}/refund", payment_id),
            Some(json!({ "amount": total, "reason": "Customer canceled the order" })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let refunded = body_json(response).await;
    assert_eq!(refunded["data"]["status"], "REFUNDED");

    // a refunded payment cannot be refunded again
    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/payments/{}/refund", payment_id),
            Some(json!({ "amount": total, "reason": "Customer canceled the order" })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn unknown_provider_callbacks_are_rejected() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::GET,
            "/api/v1/payments/callback/paypal?x=1",
            None,
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
