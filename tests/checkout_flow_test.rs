//! Kiosk flow: menu, quote and checkout through the HTTP surface.

mod common;

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use assert_matches::assert_matches;
use axum::http::Method;
use common::{decimal, response_json, TestApp};
use orderly_api::{
    entities::{customer, order, order_item, payment},
    errors::ServiceError,
    services::{
        checkout::{CheckoutRequest, CheckoutService, OrderNumberSource},
        customers::{self, VisitContact},
        totals::MAX_MONEY,
    },
};
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter};
use serde_json::json;
use uuid::Uuid;

async fn row_counts(app: &TestApp) -> (u64, u64, u64, u64) {
    let db = &*app.state.db;
    (
        order::Entity::find().count(db).await.expect("count orders"),
        order_item::Entity::find().count(db).await.expect("count items"),
        payment::Entity::find().count(db).await.expect("count payments"),
        customer::Entity::find().count(db).await.expect("count customers"),
    )
}

fn checkout_request(product_id: Uuid, phone: Option<&str>) -> CheckoutRequest {
    serde_json::from_value(json!({
        "items": [{ "product_id": product_id, "quantity": 1 }],
        "order_type": "take_away",
        "payment_method": "cash",
        "customer_name": "Farah",
        "customer_phone": phone
    }))
    .expect("checkout request")
}

/// Hands out the same number every time and counts the requests
struct RepeatingNumbers {
    issued: AtomicUsize,
}

impl OrderNumberSource for RepeatingNumbers {
    fn next_number(&self) -> String {
        self.issued.fetch_add(1, Ordering::SeqCst);
        "ORD-00000001".to_string()
    }
}

#[tokio::test]
async fn default_store_and_menu_show_only_available_products() {
    let app = TestApp::new().await;
    let store = app.seed_store("Spice Route").await;
    let mains = app.seed_category(store.id, "Mains", 1).await;
    let visible = app
        .seed_product(store.id, Some(mains.id), "Paneer Tikka", dec!(180), dec!(5))
        .await;
    let hidden = app
        .seed_product(store.id, Some(mains.id), "Seasonal Special", dec!(240), dec!(5))
        .await;
    app.state
        .services
        .catalog
        .toggle_availability(store.id, hidden.id)
        .await
        .expect("hide product");

    let response = app
        .request(Method::GET, "/api/v1/stores/default", None, None)
        .await;
    assert_eq!(response.status(), 200);
    let body = response_json(response).await;
    assert_eq!(body["data"]["id"], store.id.to_string());
    assert_eq!(body["data"]["currency_symbol"], "₹");

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/stores/{}/menu", store.id),
            None,
            None,
        )
        .await;
    assert_eq!(response.status(), 200);
    let body = response_json(response).await;
    let products = body["data"]["products"].as_array().expect("products");
    assert_eq!(products.len(), 1);
    assert_eq!(products[0]["id"], visible.id.to_string());
    assert_eq!(body["data"]["categories"][0]["name"], "Mains");
}

#[tokio::test]
async fn quote_prices_cart_without_placing_an_order() {
    let app = TestApp::new().await;
    let store = app.seed_store("Quote Cafe").await;
    let coffee = app
        .seed_product(store.id, None, "Filter Coffee", dec!(40), dec!(5))
        .await;

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/stores/{}/cart/quote", store.id),
            Some(json!({
                "items": [{ "product_id": coffee.id, "quantity": 3 }],
                "tip": "5"
            })),
            None,
        )
        .await;
    assert_eq!(response.status(), 200);
    let body = response_json(response).await;
    let totals = &body["data"]["totals"];
    assert_eq!(decimal(&totals["subtotal"]), dec!(120));
    assert_eq!(decimal(&totals["tax_amount"]), dec!(6));
    assert_eq!(decimal(&totals["total_amount"]), dec!(131));

    let orders = app
        .state
        .services
        .admin
        .list_orders(store.id, &Default::default())
        .await
        .expect("list orders");
    assert!(orders.is_empty());
}

#[tokio::test]
async fn checkout_places_paid_order_and_credits_loyalty() {
    let app = TestApp::new().await;
    let store = app.seed_store("Spice Route").await;
    let thali = app
        .seed_product(store.id, None, "Veg Thali", dec!(100), dec!(5))
        .await;

    let body = app
        .place_order(
            store.id,
            json!({
                "items": [{ "product_id": thali.id, "quantity": 2, "special_instructions": "less spicy" }],
                "order_type": "dine_in",
                "payment_method": "card",
                "tip": "10",
                "customer_name": "Asha",
                "customer_phone": "9876543210",
                "customer_email": "asha@example.com"
            }),
        )
        .await;

    let receipt = &body["data"];
    assert_eq!(decimal(&receipt["totals"]["subtotal"]), dec!(200));
    assert_eq!(decimal(&receipt["totals"]["tax_amount"]), dec!(10));
    assert_eq!(decimal(&receipt["totals"]["tip_amount"]), dec!(10));
    assert_eq!(decimal(&receipt["totals"]["total_amount"]), dec!(220));

    let order = &receipt["order"];
    assert_eq!(order["status"], "pending");
    assert_eq!(order["order_type"], "dine_in");
    assert!(order["order_number"]
        .as_str()
        .expect("order number")
        .starts_with("ORD-"));
    assert_eq!(decimal(&order["total_amount"]), dec!(220));

    let items = receipt["items"].as_array().expect("items");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["quantity"], 2);
    assert_eq!(items[0]["special_instructions"], "less spicy");

    assert_eq!(receipt["payment"]["method"], "card");
    assert_eq!(decimal(&receipt["payment"]["amount"]), dec!(220));

    assert_eq!(receipt["loyalty"]["points_earned"], 22);
    assert_eq!(receipt["loyalty"]["new_customer"], true);

    let customer = customer::Entity::find()
        .filter(customer::Column::StoreId.eq(store.id))
        .filter(customer::Column::Phone.eq("9876543210"))
        .one(&*app.state.db)
        .await
        .expect("query customer")
        .expect("customer created");
    assert_eq!(customer.loyalty_points, Some(22));
    assert_eq!(customer.total_orders, Some(1));
}

#[tokio::test]
async fn repeat_visit_increments_existing_customer() {
    let app = TestApp::new().await;
    let store = app.seed_store("Spice Route").await;
    let thali = app
        .seed_product(store.id, None, "Veg Thali", dec!(100), dec!(5))
        .await;

    let order = |tip: &str| {
        json!({
            "items": [{ "product_id": thali.id, "quantity": 2 }],
            "order_type": "take_away",
            "payment_method": "upi",
            "tip": tip,
            "customer_name": "Asha",
            "customer_phone": "9876543210"
        })
    };

    app.place_order(store.id, order("10")).await;
    let second = app.place_order(store.id, order("0")).await;
    assert_eq!(second["data"]["loyalty"]["points_earned"], 21);
    assert_eq!(second["data"]["loyalty"]["new_customer"], false);

    let customers = app
        .state
        .services
        .customers
        .list(store.id)
        .await
        .expect("list customers");
    assert_eq!(customers.len(), 1);
    assert_eq!(customers[0].loyalty_points, Some(43));
    assert_eq!(customers[0].total_orders, Some(2));
}

#[tokio::test]
async fn checkout_without_phone_skips_loyalty() {
    let app = TestApp::new().await;
    let store = app.seed_store("Walk In").await;
    let tea = app
        .seed_product(store.id, None, "Masala Chai", dec!(30), dec!(0))
        .await;

    let body = app
        .place_order(
            store.id,
            json!({
                "items": [{ "product_id": tea.id, "quantity": 1 }],
                "order_type": "take_away",
                "payment_method": "cash",
                "customer_name": "Ravi"
            }),
        )
        .await;
    assert!(body["data"]["loyalty"].is_null());
    assert_eq!(decimal(&body["data"]["totals"]["total_amount"]), dec!(30));
}

#[tokio::test]
async fn checkout_rejects_bad_carts() {
    let app = TestApp::new().await;
    let store = app.seed_store("Strict Kitchen").await;
    let dosa = app
        .seed_product(store.id, None, "Masala Dosa", dec!(90), dec!(5))
        .await;
    let uri = format!("/api/v1/stores/{}/checkout", store.id);

    let base = |items: serde_json::Value| {
        json!({
            "items": items,
            "order_type": "take_away",
            "payment_method": "card",
            "customer_name": "Meera"
        })
    };

    let empty = app
        .request(Method::POST, &uri, Some(base(json!([]))), None)
        .await;
    assert_eq!(empty.status(), 400);

    let zero_qty = app
        .request(
            Method::POST,
            &uri,
            Some(base(json!([{ "product_id": dosa.id, "quantity": 0 }]))),
            None,
        )
        .await;
    assert_eq!(zero_qty.status(), 400);

    let unknown = app
        .request(
            Method::POST,
            &uri,
            Some(base(json!([{ "product_id": Uuid::new_v4(), "quantity": 1 }]))),
            None,
        )
        .await;
    assert_eq!(unknown.status(), 400);

    app.state
        .services
        .catalog
        .toggle_availability(store.id, dosa.id)
        .await
        .expect("hide product");
    let unavailable = app
        .request(
            Method::POST,
            &uri,
            Some(base(json!([{ "product_id": dosa.id, "quantity": 1 }]))),
            None,
        )
        .await;
    assert_eq!(unavailable.status(), 400);

    let orders = app
        .state
        .services
        .admin
        .list_orders(store.id, &Default::default())
        .await
        .expect("list orders");
    assert!(orders.is_empty(), "rejected carts must not leave orders behind");
}

#[tokio::test]
async fn checkout_for_unknown_store_is_not_found() {
    let app = TestApp::new().await;
    let store = app.seed_store("Real Store").await;
    let item = app
        .seed_product(store.id, None, "Idli", dec!(50), dec!(5))
        .await;

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/stores/{}/checkout", Uuid::new_v4()),
            Some(json!({
                "items": [{ "product_id": item.id, "quantity": 1 }],
                "order_type": "take_away",
                "payment_method": "card",
                "customer_name": "Nobody"
            })),
            None,
        )
        .await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn oversized_amounts_are_rejected_without_crashing() {
    let app = TestApp::new().await;
    let store = app.seed_store("Big Spender").await;
    let coffee = app
        .seed_product(store.id, None, "Filter Coffee", dec!(40), dec!(5))
        .await;
    let gold = app
        .seed_product(store.id, None, "Gold Leaf Thali", MAX_MONEY, dec!(100))
        .await;
    let quote_uri = format!("/api/v1/stores/{}/cart/quote", store.id);

    let huge_tip = app
        .request(
            Method::POST,
            &quote_uri,
            Some(json!({
                "items": [{ "product_id": coffee.id, "quantity": 1 }],
                "tip": "79228162514264337593543950335"
            })),
            None,
        )
        .await;
    assert_eq!(huge_tip.status(), 400);

    let huge_cart = app
        .request(
            Method::POST,
            &quote_uri,
            Some(json!({ "items": [{ "product_id": gold.id, "quantity": 999 }] })),
            None,
        )
        .await;
    assert_eq!(huge_cart.status(), 400);
    let body = response_json(huge_cart).await;
    assert_eq!(body["code"], "VALIDATION_FAILED");

    let checkout = app
        .request(
            Method::POST,
            &format!("/api/v1/stores/{}/checkout", store.id),
            Some(json!({
                "items": [{ "product_id": gold.id, "quantity": 2 }],
                "order_type": "dine_in",
                "payment_method": "card",
                "customer_name": "Croesus"
            })),
            None,
        )
        .await;
    assert_eq!(checkout.status(), 400);
    assert_eq!(row_counts(&app).await.0, 0);
}

#[tokio::test]
async fn another_stores_product_cannot_be_ordered() {
    let app = TestApp::new().await;
    let here = app.seed_store("Here").await;
    let there = app.seed_store("There").await;
    let theirs = app
        .seed_product(there.id, None, "Their Special", dec!(120), dec!(5))
        .await;

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/stores/{}/checkout", here.id),
            Some(json!({
                "items": [{ "product_id": theirs.id, "quantity": 1 }],
                "order_type": "take_away",
                "payment_method": "card",
                "customer_name": "Omar"
            })),
            None,
        )
        .await;
    assert_eq!(response.status(), 400);

    let quote = app
        .request(
            Method::POST,
            &format!("/api/v1/stores/{}/cart/quote", here.id),
            Some(json!({ "items": [{ "product_id": theirs.id, "quantity": 1 }] })),
            None,
        )
        .await;
    assert_eq!(quote.status(), 400);
    assert_eq!(row_counts(&app).await.0, 0);
}

#[tokio::test]
async fn order_number_collisions_retry_then_conflict() {
    let app = TestApp::new().await;
    let store = app.seed_store("Busy Counter").await;
    let vada = app
        .seed_product(store.id, None, "Medu Vada", dec!(35), dec!(5))
        .await;
    let numbers = Arc::new(RepeatingNumbers {
        issued: AtomicUsize::new(0),
    });
    let checkout = CheckoutService::new(app.state.db.clone(), app.state.event_sender.clone())
        .with_order_numbers(numbers.clone());

    let first = checkout
        .checkout(store.id, checkout_request(vada.id, None))
        .await
        .expect("first order");
    assert_eq!(first.order.order.order_number, "ORD-00000001");
    assert_eq!(numbers.issued.load(Ordering::SeqCst), 1);

    let second = checkout
        .checkout(store.id, checkout_request(vada.id, None))
        .await;
    assert_matches!(second, Err(ServiceError::Conflict(_)));
    // One try for the first order, three for the second
    assert_eq!(numbers.issued.load(Ordering::SeqCst), 4);

    let (orders, items, payments, _) = row_counts(&app).await;
    assert_eq!((orders, items, payments), (1, 1, 1));
}

#[tokio::test]
async fn failure_after_the_order_insert_rolls_everything_back() {
    let app = TestApp::new().await;
    let store = app.seed_store("Fragile Till").await;
    let dosa = app
        .seed_product(store.id, None, "Rava Dosa", dec!(110), dec!(5))
        .await;
    // Breaks the last write of checkout: linking the order to its customer
    app.state
        .db
        .execute_unprepared(
            "CREATE TRIGGER reject_customer_link BEFORE UPDATE OF customer_id ON orders \
             BEGIN SELECT RAISE(ABORT, 'customer link rejected'); END;",
        )
        .await
        .expect("create trigger");

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/stores/{}/checkout", store.id),
            Some(json!({
                "items": [{ "product_id": dosa.id, "quantity": 2 }],
                "order_type": "dine_in",
                "payment_method": "card",
                "customer_name": "Leela",
                "customer_phone": "9123456780"
            })),
            None,
        )
        .await;
    assert_eq!(response.status(), 500);
    let body = response_json(response).await;
    assert_eq!(body["code"], "DATABASE_ERROR");
    assert_eq!(body["message"], "Database error");

    assert_eq!(row_counts(&app).await, (0, 0, 0, 0));
}

#[tokio::test]
async fn losing_the_first_visit_race_credits_the_existing_customer() {
    let app = TestApp::new().await;
    let store = app.seed_store("Crowded Counter").await;
    let db = &*app.state.db;
    let contact = || VisitContact {
        phone: "9000000001",
        name: Some("Zara"),
        email: None,
    };

    let winner = customers::record_visit(db, store.id, contact(), dec!(100))
        .await
        .expect("first visit");
    assert!(winner.new_customer);

    // A second checkout that looked the phone up before the winner committed
    let loser = customers::create_or_credit(db, store.id, contact(), 7)
        .await
        .expect("fallback credit");
    assert!(!loser.new_customer);
    assert_eq!(loser.customer_id, winner.customer_id);
    assert_eq!(loser.points_earned, 7);

    let all = app
        .state
        .services
        .customers
        .list(store.id)
        .await
        .expect("list customers");
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].loyalty_points, Some(17));
    assert_eq!(all[0].total_orders, Some(2));
}
