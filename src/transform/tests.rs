use super::*;

use chrono::TimeZone;
use serde_json::json;

use crate::geocode::{DisabledResolver, StaticResolver};

fn normalizer() -> Normalizer {
    Normalizer::new(Arc::new(DisabledResolver))
}

fn raw(value: Value) -> RawOrder {
    RawOrder::new(value)
}

fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

#[tokio::test]
async fn test_reference_order() {
    let order = raw(json!({
        "id": 1,
        "date_modified": "2024-01-02T10:00",
        "total": "49.99",
        "shipping_total": "5.00",
        "customer_id": 0,
        "billing": {"email": "A@B.com"},
        "line_items": [{"product_id": 7, "name": "Fish", "quantity": 2, "price": "10.00"}],
        "meta_data": [{"key": "_wc_order_attribution_device_type", "value": "Mobile"}]
    }));

    let normalized = normalizer().normalize(vec![order]).await;
    let order = &normalized.orders[0];

    assert_eq!(order.order_id, 1);
    assert_eq!(order.order_total, Some(49.99));
    assert_eq!(order.shipping_total, Some(5.0));
    assert!(order.is_guest);
    assert_eq!(order.customer_identifier, Some(sha256_hex("a@b.com")));
    assert_eq!(order.total_items, 2);
    assert_eq!(
        order.item_details,
        vec![ItemDetail {
            product_id: Some(7),
            name: Some("Fish".to_string()),
            quantity: 2,
            total_price: 20.0,
        }]
    );
    assert_eq!(order.device_type.as_deref(), Some("Mobile"));
    assert_eq!(
        order.date_modified,
        Some(Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap())
    );
}

#[tokio::test]
async fn test_dedup_keeps_latest_modification() {
    let older = raw(json!({"id": 5, "date_modified": "2024-01-01T10:00:00", "status": "pending"}));
    let newer = raw(json!({"id": 5, "date_modified": "2024-01-03T10:00:00", "status": "completed"}));

    let normalized = normalizer().normalize(vec![older, newer]).await;

    assert_eq!(normalized.orders.len(), 1);
    assert_eq!(normalized.orders[0].status.as_deref(), Some("completed"));
    assert_eq!(normalized.duplicates, 1);
}

#[tokio::test]
async fn test_dedup_prefers_dated_over_undated() {
    let undated = raw(json!({"id": 9, "date_modified": "garbage", "status": "pending"}));
    let dated = raw(json!({"id": 9, "date_modified": "2024-01-03T10:00:00", "status": "completed"}));

    let normalized = normalizer().normalize(vec![undated, dated]).await;

    assert_eq!(normalized.orders.len(), 1);
    assert_eq!(normalized.orders[0].status.as_deref(), Some("completed"));
}

#[tokio::test]
async fn test_records_without_id_are_dropped() {
    let normalized = normalizer()
        .normalize(vec![raw(json!({"status": "pending"})), raw(json!({"id": 3}))])
        .await;

    assert_eq!(normalized.orders.len(), 1);
    assert_eq!(normalized.dropped, 1);
}

#[test]
fn test_customer_identifier_stable_across_formatting() {
    let a = customer_identifier(None, Some("  Shopper@Example.COM "));
    let b = customer_identifier(Some(0), Some("shopper@example.com"));
    assert_eq!(a, b);
    assert_eq!(a, Some(sha256_hex("shopper@example.com")));
}

#[test]
fn test_customer_identifier_prefers_customer_id() {
    assert_eq!(
        customer_identifier(Some(42), Some("a@b.com")).as_deref(),
        Some("42")
    );
}

#[test]
fn test_customer_identifier_absent() {
    assert_eq!(customer_identifier(None, None), None);
    assert_eq!(customer_identifier(Some(-1), Some("   ")), None);
}

#[tokio::test]
async fn test_guest_classification() {
    let normalized = normalizer()
        .normalize(vec![
            raw(json!({"id": 1, "customer_id": 0})),
            raw(json!({"id": 2, "customer_id": 12})),
            raw(json!({"id": 3})),
        ])
        .await;

    let guest: Vec<(i64, bool)> = normalized
        .orders
        .iter()
        .map(|o| (o.order_id, o.is_guest))
        .collect();
    assert!(guest.contains(&(1, true)));
    assert!(guest.contains(&(2, false)));
    assert!(guest.contains(&(3, true)));
}

#[tokio::test]
async fn test_order_without_line_items() {
    let normalized = normalizer().normalize(vec![raw(json!({"id": 1}))]).await;
    let order = &normalized.orders[0];

    assert_eq!(order.total_items, 0);
    assert_eq!(order.distinct_items, 0);
    assert!(order.item_details.is_empty());
    assert!(order.coupon_details.is_empty());
}

#[tokio::test]
async fn test_unparseable_totals_become_none() {
    let normalized = normalizer()
        .normalize(vec![raw(json!({
            "id": 1,
            "total": "n/a",
            "total_tax": {"amount": 1},
            "discount_total": "0.00",
            "date_created": "not a date"
        }))])
        .await;
    let order = &normalized.orders[0];

    assert_eq!(order.order_total, None);
    assert_eq!(order.total_tax, None);
    assert_eq!(order.discount_total, Some(0.0));
    assert_eq!(order.date_created, None);
    assert_eq!(order.order_day, None);
}

#[test]
fn test_item_aggregates() {
    let items = vec![
        json!({"sku": "FISH-1", "quantity": 2, "price": "3.335"}),
        json!({"sku": "FISH-1", "quantity": "1", "price": 4}),
        json!({"sku": "", "quantity": 3, "price": "1.10"}),
        json!({"sku": "TANK", "quantity": 1, "price": "free"}),
    ];

    assert_eq!(total_items(&items), 7);
    assert_eq!(distinct_items(&items), 2);

    let details = item_details(&items);
    assert_eq!(details.len(), 3);
    assert_eq!(details[0].total_price, 6.67);
    assert_eq!(details[1].total_price, 4.0);
    assert_eq!(details[2].total_price, 3.3);
}

#[test]
fn test_coupon_details() {
    let coupons = vec![
        json!({"code": "SPRING10", "discount": "4.50"}),
        json!({"code": "FREESHIP"}),
        json!({"code": "BROKEN", "discount": "lots"}),
        json!("not a coupon"),
    ];

    assert_eq!(
        coupon_details(&coupons),
        vec![
            CouponDetail {
                code: Some("SPRING10".to_string()),
                discount_amount: Some(4.5),
            },
            CouponDetail {
                code: Some("FREESHIP".to_string()),
                discount_amount: Some(0.0),
            },
            CouponDetail {
                code: Some("BROKEN".to_string()),
                discount_amount: None,
            },
        ]
    );
}

#[tokio::test]
async fn test_payment_method_and_order_day() {
    let normalized = normalizer()
        .normalize(vec![raw(json!({
            "id": 1,
            "payment_method": "stripe",
            "payment_method_title": "Credit card",
            "date_created": "2024-01-03T09:30:00"
        }))])
        .await;
    let order = &normalized.orders[0];

    assert_eq!(order.payment_method.as_deref(), Some("Credit card"));
    // 2024-01-03 was a Wednesday
    assert_eq!(order.order_day, Some(2));
}

#[tokio::test]
async fn test_sorted_by_creation_oldest_first() {
    let normalized = normalizer()
        .normalize(vec![
            raw(json!({"id": 1, "date_created": "2024-03-01T00:00:00"})),
            raw(json!({"id": 2})),
            raw(json!({"id": 3, "date_created": "2024-01-01T00:00:00"})),
        ])
        .await;

    let ids: Vec<i64> = normalized.orders.iter().map(|o| o.order_id).collect();
    assert_eq!(ids, vec![3, 1, 2]);
}

#[tokio::test]
async fn test_coordinates_merged_by_normalized_postcode() {
    let resolver = StaticResolver::new().with("SW1A 1AA", 51.5, -0.14);
    let normalizer = Normalizer::new(Arc::new(resolver));

    let normalized = normalizer
        .normalize(vec![
            raw(json!({"id": 1, "shipping": {"postcode": "sw1a 1aa"}})),
            raw(json!({"id": 2, "shipping": {"postcode": "SW1A\u{a0}1AA"}})),
            raw(json!({"id": 3, "shipping": {"postcode": "ZZ9 9ZZ"}})),
            raw(json!({"id": 4, "shipping": {}})),
        ])
        .await;

    let coords: Vec<(i64, Option<f64>, Option<f64>)> = normalized
        .orders
        .iter()
        .map(|o| (o.order_id, o.latitude, o.longitude))
        .collect();
    assert!(coords.contains(&(1, Some(51.5), Some(-0.14))));
    assert!(coords.contains(&(2, Some(51.5), Some(-0.14))));
    assert!(coords.contains(&(3, None, None)));
    assert!(coords.contains(&(4, None, None)));
    assert_eq!(normalized.postcodes_resolved, 1);
    assert_eq!(normalized.postcodes_unresolved, 1);
}

#[tokio::test]
async fn test_empty_input() {
    let normalized = normalizer().normalize(Vec::new()).await;
    assert!(normalized.orders.is_empty());
}
