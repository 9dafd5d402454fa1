//! Raw order normalization.
//!
//! Turns a batch of raw API payloads into canonical records:
//! deduplicate by id (latest `date_modified` wins), derive customer
//! linkage, geocode shipping postcodes, flatten line items and coupons,
//! read attribution tags, then order by creation time.

mod attribution;
pub mod payload;

pub use attribution::Attribution;
pub use payload::RawOrder;

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::geocode::{normalize_postcode, GeocodingResolver};
use crate::model::{CanonicalOrder, CouponDetail, ItemDetail};
use payload::{as_f64, as_i64, as_text};

/// Result of normalizing one batch.
#[derive(Debug, Clone, Default)]
pub struct Normalized {
    /// Canonical records, oldest `date_created` first.
    pub orders: Vec<CanonicalOrder>,
    /// Raw records without a usable id.
    pub dropped: usize,
    /// Raw records superseded by a newer version of the same order.
    pub duplicates: usize,
    pub postcodes_resolved: usize,
    pub postcodes_unresolved: usize,
}

/// Normalizes raw orders, geocoding through the given resolver.
pub struct Normalizer {
    resolver: Arc<dyn GeocodingResolver>,
}

impl Normalizer {
    pub fn new(resolver: Arc<dyn GeocodingResolver>) -> Self {
        Self { resolver }
    }

    /// Normalize a batch. Field-level problems degrade to `None`.
    pub async fn normalize(&self, raw: Vec<RawOrder>) -> Normalized {
        if raw.is_empty() {
            info!("No new data to transform");
            return Normalized::default();
        }

        let (latest, dropped, duplicates) = deduplicate(raw);

        let mut rows: Vec<(CanonicalOrder, Option<String>)> = latest
            .iter()
            .map(|(id, order)| (to_canonical(*id, order), shipping_postcode(order)))
            .collect();

        let postcodes: BTreeSet<String> = rows.iter().filter_map(|(_, p)| p.clone()).collect();
        let coordinates = if postcodes.is_empty() {
            Default::default()
        } else {
            self.resolver.resolve(&postcodes).await
        };
        let postcodes_resolved = postcodes
            .iter()
            .filter(|p| matches!(coordinates.get(*p), Some(Some(_))))
            .count();

        for (order, postcode) in rows.iter_mut() {
            if let Some(found) = postcode.as_ref().and_then(|p| coordinates.get(p)).copied().flatten() {
                order.latitude = Some(found.latitude);
                order.longitude = Some(found.longitude);
            }
        }

        let mut orders: Vec<CanonicalOrder> = rows.into_iter().map(|(order, _)| order).collect();
        orders.sort_by(|a, b| cmp_none_last(a.date_created, b.date_created, Ordering::Less));

        info!(
            records = orders.len(),
            dropped,
            duplicates,
            postcodes = postcodes.len(),
            postcodes_resolved,
            "Transformed records"
        );

        Normalized {
            orders,
            dropped,
            duplicates,
            postcodes_resolved,
            postcodes_unresolved: postcodes.len() - postcodes_resolved,
        }
    }
}

/// Keep the most recently modified version of each order id.
///
/// Returns survivors in ascending id order, plus counts of records dropped
/// for lacking an id and of superseded duplicates.
fn deduplicate(raw: Vec<RawOrder>) -> (Vec<(i64, RawOrder)>, usize, usize) {
    let total = raw.len();
    let mut keyed: Vec<(i64, Option<DateTime<Utc>>, RawOrder)> = raw
        .into_iter()
        .filter_map(|order| match order.id() {
            Some(id) => Some((id, order.timestamp("date_modified"), order)),
            None => {
                warn!(record = %truncate(order.as_value()), "Dropping record without a usable id");
                None
            }
        })
        .collect();
    let dropped = total - keyed.len();

    keyed.sort_by(|a, b| {
        a.0.cmp(&b.0)
            .then_with(|| cmp_none_last(a.1, b.1, Ordering::Greater))
    });

    let mut seen = HashSet::new();
    let latest: Vec<(i64, RawOrder)> = keyed
        .into_iter()
        .filter(|(id, _, _)| seen.insert(*id))
        .map(|(id, _, order)| (id, order))
        .collect();
    let duplicates = total - dropped - latest.len();

    (latest, dropped, duplicates)
}

/// Compare optional values with `None` always last.
///
/// `direction` is `Less` for ascending and `Greater` for descending.
fn cmp_none_last<T: Ord>(a: Option<T>, b: Option<T>, direction: Ordering) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => {
            if direction == Ordering::Less {
                a.cmp(&b)
            } else {
                b.cmp(&a)
            }
        }
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn to_canonical(order_id: i64, order: &RawOrder) -> CanonicalOrder {
    let date_created = order.timestamp("date_created");
    let customer_id = order.int("customer_id");
    let line_items = order.list("line_items");
    let attribution = Attribution::from_metadata(order.list("meta_data"));

    CanonicalOrder {
        order_id,
        date_created,
        date_modified: order.timestamp("date_modified"),
        date_paid: order.timestamp("date_paid"),
        status: order.text("status"),
        order_day: date_created.map(|d| d.weekday().num_days_from_monday() as i16),
        customer_id,
        customer_identifier: customer_identifier(
            customer_id,
            order.nested_text("billing", "email").as_deref(),
        ),
        is_guest: customer_id.map_or(true, |id| id <= 0),
        order_total: order.number("total"),
        shipping_total: order.number("shipping_total"),
        total_tax: order.number("total_tax"),
        discount_total: order.number("discount_total"),
        total_items: total_items(line_items),
        distinct_items: distinct_items(line_items),
        latitude: None,
        longitude: None,
        payment_method: order.text("payment_method_title"),
        device_type: attribution.device_type,
        attribution_source: attribution.attribution_source,
        campaign_source: attribution.campaign_source,
        campaign_medium: attribution.campaign_medium,
        referrer_url: attribution.referrer_url,
        item_details: item_details(line_items),
        coupon_details: coupon_details(order.list("coupon_lines")),
    }
}

/// Stable pseudonymous customer key.
///
/// The customer id for logged-in customers, otherwise the SHA-256 of the
/// trimmed, lowercased billing email.
pub fn customer_identifier(customer_id: Option<i64>, email: Option<&str>) -> Option<String> {
    if let Some(id) = customer_id.filter(|id| *id > 0) {
        return Some(id.to_string());
    }
    let email = email.map(|e| e.trim().to_lowercase()).filter(|e| !e.is_empty())?;
    Some(hex::encode(Sha256::digest(email.as_bytes())))
}

fn shipping_postcode(order: &RawOrder) -> Option<String> {
    order
        .nested_text("shipping", "postcode")
        .and_then(|p| normalize_postcode(&p))
}

fn total_items(line_items: &[Value]) -> i64 {
    line_items
        .iter()
        .filter_map(|item| item.get("quantity").and_then(as_i64))
        .sum()
}

fn distinct_items(line_items: &[Value]) -> i64 {
    line_items
        .iter()
        .filter_map(|item| item.get("sku").and_then(as_text))
        .collect::<HashSet<_>>()
        .len() as i64
}

/// Flatten line items. Items with a non-numeric price or quantity are skipped.
fn item_details(line_items: &[Value]) -> Vec<ItemDetail> {
    line_items
        .iter()
        .filter(|item| item.is_object())
        .filter_map(|item| {
            let quantity = numeric_or_default(item.get("quantity"), as_i64, 0)?;
            let price = numeric_or_default(item.get("price"), as_f64, 0.0)?;
            Some(ItemDetail {
                product_id: item.get("product_id").and_then(as_i64),
                name: item.get("name").and_then(as_text),
                quantity,
                total_price: round_money(price * quantity as f64),
            })
        })
        .collect()
}

/// Flatten coupon lines, skipping anything that is not an object.
fn coupon_details(coupon_lines: &[Value]) -> Vec<CouponDetail> {
    coupon_lines
        .iter()
        .filter(|coupon| coupon.is_object())
        .map(|coupon| CouponDetail {
            code: coupon.get("code").and_then(as_text),
            discount_amount: match coupon.get("discount").filter(|v| !v.is_null()) {
                Some(value) => as_f64(value),
                None => Some(0.0),
            },
        })
        .collect()
}

/// Missing (or null) falls back to `default`; present but unparseable is None.
fn numeric_or_default<T>(value: Option<&Value>, parse: fn(&Value) -> Option<T>, default: T) -> Option<T> {
    match value.filter(|v| !v.is_null()) {
        Some(v) => parse(v),
        None => Some(default),
    }
}

fn round_money(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn truncate(value: &Value) -> String {
    value.to_string().chars().take(120).collect()
}

#[cfg(test)]
mod tests;
