// Pure pricing and aggregation
pub mod analytics;
pub mod totals;
pub mod validation;

// Order lifecycle
pub mod checkout;
pub mod customers;
pub mod order_status;
pub mod views;

// Screens
pub mod admin;
pub mod catalog;
pub mod kitchen;
