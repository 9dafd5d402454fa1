//! Canonical order record and its nested detail types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Rounded coordinates for a postcode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// One line item, reduced to what the dashboards read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemDetail {
    pub product_id: Option<i64>,
    pub name: Option<String>,
    pub quantity: i64,
    /// `price * quantity`, rounded to 2 decimal places.
    pub total_price: f64,
}

/// One applied coupon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CouponDetail {
    pub code: Option<String>,
    pub discount_amount: Option<f64>,
}

/// Flattened, typed order ready for storage.
///
/// `order_id` is the row key: re-extracting an order overwrites its row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalOrder {
    pub order_id: i64,
    pub date_created: Option<DateTime<Utc>>,
    pub date_modified: Option<DateTime<Utc>>,
    pub date_paid: Option<DateTime<Utc>>,
    pub status: Option<String>,
    /// Day of week of `date_created`, Monday = 0.
    pub order_day: Option<i16>,
    pub customer_id: Option<i64>,
    pub customer_identifier: Option<String>,
    pub is_guest: bool,
    pub order_total: Option<f64>,
    pub shipping_total: Option<f64>,
    pub total_tax: Option<f64>,
    pub discount_total: Option<f64>,
    pub total_items: i64,
    pub distinct_items: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub payment_method: Option<String>,
    pub device_type: Option<String>,
    pub attribution_source: Option<String>,
    pub campaign_source: Option<String>,
    pub campaign_medium: Option<String>,
    pub referrer_url: Option<String>,
    pub item_details: Vec<ItemDetail>,
    pub coupon_details: Vec<CouponDetail>,
}

impl CanonicalOrder {
    /// A record with only the key set. Useful as a base in tests.
    pub fn empty(order_id: i64) -> Self {
        Self {
            order_id,
            date_created: None,
            date_modified: None,
            date_paid: None,
            status: None,
            order_day: None,
            customer_id: None,
            customer_identifier: None,
            is_guest: true,
            order_total: None,
            shipping_total: None,
            total_tax: None,
            discount_total: None,
            total_items: 0,
            distinct_items: 0,
            latitude: None,
            longitude: None,
            payment_method: None,
            device_type: None,
            attribution_source: None,
            campaign_source: None,
            campaign_medium: None,
            referrer_url: None,
            item_details: Vec::new(),
            coupon_details: Vec::new(),
        }
    }
}
