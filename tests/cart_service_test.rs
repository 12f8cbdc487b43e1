mod common;

use axum::http::{Method, StatusCode};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};

use aims_api::entities::product::MediaType;
use common::{body_json, SeedProduct, TestApp};

/// Decimal fields serialize as JSON strings; parse them back for comparison.
fn money(value: &Value) -> Decimal {
    value
        .as_str()
        .unwrap_or_else(|| panic!("expected a decimal string, got {}", value))
        .parse()
        .expect("decimal field parses")
}

#[tokio::test]
async fn initialize_returns_a_fresh_session() {
    let app = TestApp::new().await;

    let response = app
        .request(Method::POST, "/api/v1/carts/initialize", None, None)
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert!(json["data"]["session_token"].as_str().is_some());
    assert!(json["data"]["cart_id"].as_str().is_some());
    assert!(json["data"]["expires_at"].as_str().is_some());
}

#[tokio::test]
async fn initialize_reuses_a_supplied_token() {
    let app = TestApp::new().await;
    let token = app.init_cart().await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/carts/initialize",
            Some(json!({ "session_token": token })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let json = body_json(response).await;
    assert_eq!(json["data"]["session_token"], token.as_str());
}

#[tokio::test]
async fn cart_endpoints_require_a_session_token() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/api/v1/carts", None, None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn adding_items_accumulates_lines_and_totals() {
    let app = TestApp::new().await;
    let token = app.init_cart().await;

    let cd = app
        .seed_product(SeedProduct {
            price: dec!(100000),
            ..Default::default()
        })
        .await;
    let book = app
        .seed_product(SeedProduct {
            title: "Test Novel".to_string(),
            media_type: MediaType::Book,
            price: dec!(50000),
            ..Default::default()
        })
        .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/carts/items",
            Some(json!({ "product_id": cd.id, "quantity": 2 })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .request(
            Method::POST,
            "/api/v1/carts/items",
            Some(json!({ "product_id": book.id, "quantity": 1 })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .request(Method::GET, "/api/v1/carts", None, Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let items = json["data"]["items"].as_array().expect("cart items");
    assert_eq!(items.len(), 2);
    // 2 x 100000 + 1 x 50000, flat 10% VAT on the cart total
    let summary = &json["data"]["summary"];
    assert_eq!(money(&summary["total_excluding_vat"]), dec!(250000));
    assert_eq!(money(&summary["vat_amount"]), dec!(25000));
    assert_eq!(money(&summary["total_including_vat"]), dec!(275000));
    assert_eq!(summary["item_count"], 3);
}

#[tokio::test]
async fn adding_the_same_product_merges_the_line() {
    let app = TestApp::new().await;
    let token = app.init_cart().await;
    let product = app.seed_product(SeedProduct::default()).await;

    for _ in 0..2 {
        let response = app
            .request(
                Method::POST,
                "/api/v1/carts/items",
                Some(json!({ "product_id": product.id, "quantity": 3 })),
                Some(&token),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .request(Method::GET, "/api/v1/carts", None, Some(&token))
        .await;
    let json = body_json(response).await;
    let items = json["data"]["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["quantity"], 6);
}

#[tokio::test]
async fn requests_beyond_stock_are_refused() {
    let app = TestApp::new().await;
    let token = app.init_cart().await;
    let product = app
        .seed_product(SeedProduct {
            stock: 3,
            ..Default::default()
        })
        .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/carts/items",
            Some(json!({ "product_id": product.id, "quantity": 5 })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn unknown_products_cannot_be_added() {
    let app = TestApp::new().await;
    let token = app.init_cart().await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/carts/items",
            Some(json!({ "product_id": uuid::Uuid::new_v4(), "quantity": 1 })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn line_quantity_can_be_updated_and_removed() {
    let app = TestApp::new().await;
    let token = app.init_cart().await;
    let product = app.seed_product(SeedProduct::default()).await;

    app.request(
        Method::POST,
        "/api/v1/carts/items",
        Some(json!({ "product_id": product.id, "quantity": 2 })),
        Some(&token),
    )
    .await;

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/carts/items/{}", product.id),
            Some(json!({ "quantity": 5 })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["items"][0]["quantity"], 5);

    let response = app
        .request(
            Method::DELETE,
            &format!("/api/v1/carts/items/{}", product.id),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert!(json["data"]["items"].as_array().unwrap().is_empty());

    // the line is gone, so a second removal is a miss
    let response = app
        .request(
            Method::DELETE,
            &format!("/api/v1/carts/items/{}", product.id),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn per_line_quantities_are_capped() {
    let app = TestApp::new().await;
    let token = app.init_cart().await;
    let product = app
        .seed_product(SeedProduct {
            stock: 500,
            ..Default::default()
        })
        .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/carts/items",
            Some(json!({ "product_id": product.id, "quantity": 100 })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn an_empty_cart_fails_validation() {
    let app = TestApp::new().await;
    let token = app.init_cart().await;

    let response = app
        .request(Method::GET, "/api/v1/carts/validate", None, Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["is_valid"], false);
}

#[tokio::test]
async fn a_stocked_cart_passes_validation() {
    let app = TestApp::new().await;
    let token = app.init_cart().await;
    let product = app.seed_product(SeedProduct::default()).await;

    app.request(
        Method::POST,
        "/api/v1/carts/items",
        Some(json!({ "product_id": product.id, "quantity": 2 })),
        Some(&token),
    )
    .await;

    let response = app
        .request(Method::GET, "/api/v1/carts/validate", None, Some(&token))
        .await;
    let json = body_json(response).await;
    assert_eq!(json["data"]["is_valid"], true);
    assert!(json["data"]["invalid_items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn delivery_quote_covers_the_cart() {
    let app = TestApp::new().await;
    let token = app.init_cart().await;
    let product = app
        .seed_product(SeedProduct {
            price: dec!(100000),
            weight_kg: dec!(2),
            ..Default::default()
        })
        .await;

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
            "/api/v1/carts/delivery-fees",
            Some(json!({ "province": "Hanoi", "rush_requested": false })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    // 30000 base + 2kg x 5000 + 5000 Hanoi adjustment
    assert_eq!(money(&json["data"]["standard_fee"]), dec!(45000));
    assert_eq!(json["data"]["free_shipping_applied"], false);
}

#[tokio::test]
async fn rush_quotes_are_refused_in_restricted_provinces() {
    let app = TestApp::new().await;
    let token = app.init_cart().await;
    let product = app.seed_product(SeedProduct::default()).await;

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
            "/api/v1/carts/delivery-fees",
            Some(json!({ "province": "Remote Areas", "rush_requested": true })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn clearing_the_cart_empties_it() {
    let app = TestApp::new().await;
    let token = app.init_cart().await;
    let product = app.seed_product(SeedProduct::default()).await;

    app.request(
        Method::POST,
        "/api/v1/carts/items",
        Some(json!({ "product_id": product.id, "quantity": 1 })),
        Some(&token),
    )
    .await;

    let response = app
        .request(Method::DELETE, "/api/v1/carts", None, Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .request(Method::GET, "/api/v1/carts", None, Some(&token))
        .await;
    let json = body_json(response).await;
    assert!(json["data"]["items"].as_array().unwrap().is_empty());
}
