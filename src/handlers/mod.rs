pub mod carts;
pub mod common;
pub mod orders;
pub mod payments;
pub mod products;

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::config::AppConfig;
use crate::events::EventSender;
use crate::services::carts::CartService;
use crate::services::catalog::CatalogService;
use crate::services::delivery::DeliveryService;
use crate::services::order_status::OrderStatusService;
use crate::services::orders::OrderService;
use crate::services::payments::{PaymentService, PaymentStrategy};
use crate::services::vnpay::VnpayStrategy;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub catalog: Arc<CatalogService>,
    pub carts: Arc<CartService>,
    pub delivery: Arc<DeliveryService>,
    pub orders: Arc<OrderService>,
    pub order_status: Arc<OrderStatusService>,
    pub payments: Arc<PaymentService>,
}

impl AppServices {
    /// Wires every service against the shared connection and event channel
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        config: Arc<AppConfig>,
    ) -> Self {
        let delivery = Arc::new(DeliveryService::new());
        let catalog = Arc::new(CatalogService::new(db.clone()));
        let carts = Arc::new(CartService::new(
            db.clone(),
            config.clone(),
            delivery.clone(),
        ));
        let orders = Arc::new(OrderService::new(
            db.clone(),
            event_sender.clone(),
            delivery.clone(),
        ));
        let order_status = Arc::new(OrderStatusService::new(db.clone(), event_sender.clone()));

        let strategies: Vec<Arc<dyn PaymentStrategy>> =
            vec![Arc::new(VnpayStrategy::from_config(&config))];
        let payments = Arc::new(PaymentService::new(db, event_sender, strategies));

        Self {
            catalog,
            carts,
            delivery,
            orders,
            order_status,
            payments,
        }
    }
}
