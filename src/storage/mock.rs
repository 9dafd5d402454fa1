//! Mock storage implementation for testing.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{collapse_duplicates, OrderSink, Result, StorageError, UpsertSummary};
use crate::model::CanonicalOrder;

/// Mock order sink that keeps rows in memory, keyed by `order_id`.
#[derive(Default)]
pub struct MockOrderSink {
    rows: RwLock<BTreeMap<i64, CanonicalOrder>>,
    calls: RwLock<usize>,
    fail_on_upsert: RwLock<bool>,
}

impl MockOrderSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_upsert(&self, fail: bool) {
        *self.fail_on_upsert.write().await = fail;
    }

    /// Stored rows in `order_id` order.
    pub async fn rows(&self) -> Vec<CanonicalOrder> {
        self.rows.read().await.values().cloned().collect()
    }

    pub async fn get(&self, order_id: i64) -> Option<CanonicalOrder> {
        self.rows.read().await.get(&order_id).cloned()
    }

    /// Number of upsert calls that reached storage (non-empty input).
    pub async fn calls(&self) -> usize {
        *self.calls.read().await
    }
}

#[async_trait]
impl OrderSink for MockOrderSink {
    async fn upsert(&self, orders: &[CanonicalOrder]) -> Result<UpsertSummary> {
        if orders.is_empty() {
            return Ok(UpsertSummary::default());
        }
        if *self.fail_on_upsert.read().await {
            return Err(StorageError::Simulated);
        }

        *self.calls.write().await += 1;
        let orders = collapse_duplicates(orders);
        let mut rows = self.rows.write().await;
        for order in orders.iter() {
            rows.insert(order.order_id, order.clone());
        }

        Ok(UpsertSummary {
            rows: orders.len(),
            batches: 1,
        })
    }
}
