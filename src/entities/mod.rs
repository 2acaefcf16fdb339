//! Typed records for every table the service reads or writes.
//!
//! The schema is owned by the hosted database; these models are the
//! boundary where raw rows are decoded and checked.

pub mod auth_user;
pub mod category;
pub mod customer;
pub mod inventory;
pub mod order;
pub mod order_item;
pub mod payment;
pub mod product;
pub mod profile;
pub mod store;
pub mod user_role;
pub mod vendor;

pub use order::{OrderStatus, OrderType};
pub use payment::PaymentMethod;
pub use user_role::AppRole;
