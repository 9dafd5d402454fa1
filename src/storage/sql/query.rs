//! SQL database abstraction trait.

/// Trait for SQL database backends.
///
/// This trait abstracts over different SQL databases (PostgreSQL, SQLite)
/// by providing the pool type and query building methods.
pub trait SqlDatabase: Send + Sync + 'static {
    /// The connection pool type for this database.
    type Pool: Clone + Send + Sync;

    /// Backend name for logging.
    const NAME: &'static str;

    /// Whether table names may be schema-qualified.
    const SUPPORTS_SCHEMAS: bool;

    /// Build a SQL query string from a sea-query INSERT statement.
    fn build_insert(stmt: sea_query::InsertStatement) -> String;

    /// Build a SQL query string from a sea-query CREATE TABLE statement.
    fn build_table_create(stmt: sea_query::TableCreateStatement) -> String;
}
