//! Order ETL
//!
//! Incremental extraction of WooCommerce orders into a relational table:
//! checkpointed extraction, normalization with postcode geocoding, and an
//! idempotent upsert keyed by order id.

pub mod checkpoint;
pub mod config;
pub mod extract;
pub mod geocode;
pub mod model;
pub mod pipeline;
pub mod storage;
pub mod transform;
pub mod utils;
