//! Unified SQL OrderSink implementation.
//!
//! Uses a macro to generate implementations for each SQL backend,
//! eliminating code duplication while maintaining type safety.

use std::marker::PhantomData;

use tracing::warn;

use super::SqlDatabase;
use crate::storage::schema::TableName;

/// SQL-based implementation of OrderSink.
///
/// This generic implementation works with any SQL database that implements
/// the `SqlDatabase` trait (PostgreSQL, SQLite).
pub struct SqlOrderSink<DB: SqlDatabase> {
    pool: DB::Pool,
    table: TableName,
    batch_size: usize,
    _marker: PhantomData<DB>,
}

impl<DB: SqlDatabase> SqlOrderSink<DB> {
    /// Create a new SQL order sink writing to `table` in batches.
    pub fn new(pool: DB::Pool, table: TableName, batch_size: usize) -> Self {
        let table = if table.schema.is_some() && !DB::SUPPORTS_SCHEMAS {
            warn!(backend = DB::NAME, table = %table, "Backend has no schemas, ignoring schema qualifier");
            table.unqualified()
        } else {
            table
        };

        Self {
            pool,
            table,
            batch_size: batch_size.max(1),
            _marker: PhantomData,
        }
    }

    /// Destination table.
    pub fn table(&self) -> &TableName {
        &self.table
    }
}

/// Macro to implement OrderSink for a specific SQL backend.
///
/// This eliminates duplication between PostgreSQL and SQLite implementations
/// while maintaining full type safety.
macro_rules! impl_order_sink {
    ($db_type:ty, $feature:literal) => {
        #[cfg(feature = $feature)]
        #[async_trait::async_trait]
        impl crate::storage::OrderSink for SqlOrderSink<$db_type> {
            async fn upsert(
                &self,
                orders: &[crate::model::CanonicalOrder],
            ) -> crate::storage::Result<crate::storage::UpsertSummary> {
                use tracing::{debug, info};

                use crate::storage::schema;

                if orders.is_empty() {
                    debug!(table = %self.table, "No data to load");
                    return Ok(crate::storage::UpsertSummary::default());
                }

                let create = <$db_type>::build_table_create(schema::create_table(&self.table));
                sqlx::query(&create).execute(&self.pool).await?;

                let orders = crate::storage::collapse_duplicates(orders);
                let mut summary = crate::storage::UpsertSummary::default();

                for (index, batch) in orders.chunks(self.batch_size).enumerate() {
                    let sql = <$db_type>::build_insert(schema::upsert(&self.table, batch)?);

                    let mut tx = self.pool.begin().await?;
                    sqlx::query(&sql).execute(&mut *tx).await?;
                    tx.commit().await?;

                    summary.batches += 1;
                    summary.rows += batch.len();
                    debug!(table = %self.table, batch = index, rows = batch.len(), "Upserted batch");
                }

                info!(
                    backend = <$db_type as SqlDatabase>::NAME,
                    table = %self.table,
                    rows = summary.rows,
                    batches = summary.batches,
                    "Data uploaded"
                );
                Ok(summary)
            }
        }
    };
}

// Generate implementations for each SQL backend
impl_order_sink!(super::postgres::Postgres, "postgres");
impl_order_sink!(super::sqlite::Sqlite, "sqlite");
