#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request},
    Router,
};
use chrono::Utc;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use sha2::Sha512;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use aims_api::{
    config::AppConfig,
    db,
    entities::product::{self, MediaType},
    events::{self, EventSender},
    handlers::{common::SESSION_TOKEN_HEADER, AppServices},
    services::notifications::LogMailer,
    AppState,
};

/// Test harness that runs the full router against a throwaway SQLite file.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    db_file: PathBuf,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let db_file =
            std::env::temp_dir().join(format!("aims_test_{}.db", Uuid::new_v4().simple()));
        let _ = std::fs::remove_file(&db_file);

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_file.display()),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let cfg = Arc::new(cfg);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(
            event_rx,
            db_arc.clone(),
            Arc::new(LogMailer::new()),
        ));

        let services = AppServices::new(db_arc.clone(), event_sender.clone(), cfg.clone());

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
        };

        let router = Router::new()
            .nest("/api/v1", aims_api::api_v1_routes())
            .with_state(state.clone());

        Self {
            router,
            state,
            db_file,
            _event_task: event_task,
        }
    }

    /// Send a request against the router, optionally carrying a session token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        session: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(token) = session {
            builder = builder.header(SESSION_TOKEN_HEADER, token);
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Open a cart session and hand back its token.
    pub async fn init_cart(&self) -> String {
        let response = self
            .request(Method::POST, "/api/v1/carts/initialize", None, None)
            .await;
        assert_eq!(response.status(), axum::http::StatusCode::CREATED);
        let json = body_json(response).await;
        json["data"]["session_token"]
            .as_str()
            .expect("cart session token in response")
            .to_string()
    }

    /// Insert a catalog row directly, bypassing the HTTP surface.
    pub async fn seed_product(&self, seed: SeedProduct) -> product::Model {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            title: Set(seed.title),
            media_type: Set(seed.media_type),
            disc_type: Set(seed.disc_type),
            base_value: Set(seed.price),
            current_price: Set(seed.price),
            stock: Set(seed.stock),
            weight_kg: Set(seed.weight_kg),
            rush_delivery_eligible: Set(seed.rush_delivery_eligible),
            description: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("seed product for tests")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
        let _ = std::fs::remove_file(&self.db_file);
    }
}

/// Seed row for the products table; defaults describe an unremarkable CD.
pub struct SeedProduct {
    pub title: String,
    pub media_type: MediaType,
    pub disc_type: Option<String>,
    pub price: Decimal,
    pub stock: i32,
    pub weight_kg: Decimal,
    pub rush_delivery_eligible: bool,
}

impl Default for SeedProduct {
    fn default() -> Self {
        Self {
            title: "Test Album".to_string(),
            media_type: MediaType::Cd,
            disc_type: None,
            price: dec!(120000),
            stock: 10,
            weight_kg: dec!(0.3),
            rush_delivery_eligible: true,
        }
    }
}

/// Drain a response body into JSON.
pub async fn body_json(response: axum::response::Response) -> Value {
    use http_body_util::BodyExt;
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read response body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("response body is json")
}

/// Signs callback parameters the way the gateway does: sorted, URL-encoded
/// with `+` for spaces, HMAC-SHA512 over the merchant secret.
pub fn sign_gateway_params(secret: &str, pairs: &[(&str, String)]) -> HashMap<String, String> {
    let sorted: BTreeMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();

    let hash_data = sorted
        .iter()
        .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    let mut mac = Hmac::<Sha512>::new_from_slice(secret.as_bytes())
        .expect("hmac accepts any key length");
    mac.update(hash_data.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    let mut out: HashMap<String, String> = sorted.into_iter().collect();
    out.insert("vnp_SecureHash".to_string(), signature);
    out
}

/// Renders signed callback parameters as a query string.
pub fn gateway_query(params: &HashMap<String, String>) -> String {
    let mut pairs: Vec<(&String, &String)> = params.iter().collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn encode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}
