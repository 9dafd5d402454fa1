//! Storage implementations.
//!
//! The order sink writes canonical records into a relational table,
//! keyed by `order_id`. Writing the same records again leaves the table
//! unchanged; writing a newer version of an order overwrites its row.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::{StorageConfig, StorageType};
use crate::model::CanonicalOrder;

pub mod mock;
pub mod schema;
pub mod sql;

pub use mock::MockOrderSink;
pub use schema::{TableName, UpsertBuildError};
pub use sql::{SqlDatabase, SqlOrderSink};

#[cfg(feature = "postgres")]
pub use sql::postgres::PostgresOrderSink;
#[cfg(feature = "sqlite")]
pub use sql::sqlite::SqliteOrderSink;

/// Storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to build upsert: {0}")]
    Build(#[from] UpsertBuildError),

    #[error("No database configured")]
    NotConfigured,

    #[error("Unsupported database URL: {0}")]
    UnsupportedUrl(String),

    #[error("Storage backend '{0}' is not enabled in this build")]
    BackendDisabled(&'static str),

    #[error("Timed out connecting to the database")]
    ConnectTimeout,

    #[error("Simulated storage failure")]
    Simulated,
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Outcome of one upsert call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    /// Rows written (inserted or overwritten).
    pub rows: usize,
    /// Transactions committed.
    pub batches: usize,
}

/// Idempotent destination for canonical orders.
#[async_trait]
pub trait OrderSink: Send + Sync {
    /// Insert or overwrite `orders`, keyed by `order_id`.
    ///
    /// Empty input is a no-op and touches nothing. Otherwise the table is
    /// created if absent and rows are written in fixed-size batches, each
    /// in its own transaction.
    async fn upsert(&self, orders: &[CanonicalOrder]) -> Result<UpsertSummary>;
}

/// Keep only the last occurrence of each `order_id`.
///
/// A single multi-row upsert cannot touch the same key twice.
pub(crate) fn collapse_duplicates(orders: &[CanonicalOrder]) -> Cow<'_, [CanonicalOrder]> {
    let mut last: HashMap<i64, usize> = HashMap::with_capacity(orders.len());
    for (index, order) in orders.iter().enumerate() {
        last.insert(order.order_id, index);
    }
    if last.len() == orders.len() {
        return Cow::Borrowed(orders);
    }
    Cow::Owned(
        orders
            .iter()
            .enumerate()
            .filter(|(index, order)| last.get(&order.order_id) == Some(index))
            .map(|(_, order)| order.clone())
            .collect(),
    )
}

/// Connect to the configured database and build the order sink.
///
/// Connection attempts are retried with backoff, bounded by the configured
/// connect timeout.
pub async fn connect(config: &StorageConfig) -> Result<Arc<dyn OrderSink>> {
    let url = config.resolved_url().ok_or(StorageError::NotConfigured)?;
    let storage_type =
        StorageType::from_url(&url).ok_or_else(|| StorageError::UnsupportedUrl(redact(&url)))?;
    let table = TableName::new(config.schema.clone(), config.table.clone());

    info!(backend = ?storage_type, address = %redact(&url), table = %table, "Storage");

    match storage_type {
        StorageType::Postgres => connect_postgres(config, &url, table).await,
        StorageType::Sqlite => connect_sqlite(config, &url, table).await,
    }
}

#[cfg(feature = "postgres")]
async fn connect_postgres(
    config: &StorageConfig,
    url: &str,
    table: TableName,
) -> Result<Arc<dyn OrderSink>> {
    use sqlx::postgres::PgPoolOptions;

    let address = redact(url);
    let pool = with_timeout(config, async {
        crate::utils::bootstrap::connect_with_retry("database", &address, || {
            PgPoolOptions::new()
                .max_connections(2)
                .acquire_timeout(config.connect_timeout())
                .connect(url)
        })
        .await
    })
    .await?;

    Ok(Arc::new(PostgresOrderSink::new(pool, table, config.batch_size)))
}

#[cfg(not(feature = "postgres"))]
async fn connect_postgres(
    _config: &StorageConfig,
    _url: &str,
    _table: TableName,
) -> Result<Arc<dyn OrderSink>> {
    Err(StorageError::BackendDisabled("postgres"))
}

#[cfg(feature = "sqlite")]
async fn connect_sqlite(
    config: &StorageConfig,
    url: &str,
    table: TableName,
) -> Result<Arc<dyn OrderSink>> {
    use std::str::FromStr;

    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    let address = redact(url);
    // One connection: an in-memory database lives and dies with it.
    let pool = with_timeout(config, async {
        crate::utils::bootstrap::connect_with_retry("database", &address, || {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .acquire_timeout(config.connect_timeout())
                .connect_with(options.clone())
        })
        .await
    })
    .await?;

    Ok(Arc::new(SqliteOrderSink::new(pool, table, config.batch_size)))
}

#[cfg(not(feature = "sqlite"))]
async fn connect_sqlite(
    _config: &StorageConfig,
    _url: &str,
    _table: TableName,
) -> Result<Arc<dyn OrderSink>> {
    Err(StorageError::BackendDisabled("sqlite"))
}

#[allow(dead_code)]
async fn with_timeout<T>(
    config: &StorageConfig,
    connect: impl std::future::Future<Output = std::result::Result<T, sqlx::Error>>,
) -> Result<T> {
    tokio::time::timeout(config.connect_timeout(), connect)
        .await
        .map_err(|_| StorageError::ConnectTimeout)?
        .map_err(StorageError::from)
}

fn redact(url: &str) -> String {
    crate::utils::bootstrap::redact_url(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapse_duplicates_keeps_last() {
        let mut first = CanonicalOrder::empty(1);
        first.status = Some("pending".to_string());
        let mut second = CanonicalOrder::empty(1);
        second.status = Some("completed".to_string());
        let other = CanonicalOrder::empty(2);
        let orders = vec![first, other, second];

        let collapsed = collapse_duplicates(&orders);

        assert_eq!(collapsed.len(), 2);
        assert_eq!(collapsed[0].order_id, 2);
        assert_eq!(collapsed[1].status.as_deref(), Some("completed"));
    }

    #[test]
    fn test_collapse_duplicates_borrows_when_unique() {
        let orders = vec![CanonicalOrder::empty(1), CanonicalOrder::empty(2)];
        assert!(matches!(collapse_duplicates(&orders), Cow::Borrowed(_)));
    }

    #[tokio::test]
    async fn test_connect_rejects_unknown_scheme() {
        let config = StorageConfig {
            database_url: Some("mysql://localhost/shop".to_string()),
            ..StorageConfig::default()
        };
        assert!(matches!(
            connect(&config).await,
            Err(StorageError::UnsupportedUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_requires_database() {
        let config = StorageConfig::default();
        assert!(matches!(
            connect(&config).await,
            Err(StorageError::NotConfigured)
        ));
    }
}
