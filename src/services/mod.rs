// Catalog and cart
pub mod carts;
pub mod catalog;
pub mod delivery;

// Checkout and fulfilment
pub mod order_status;
pub mod orders;

// Payments
pub mod payments;
pub mod vnpay;

// Customer notifications
pub mod notifications;
