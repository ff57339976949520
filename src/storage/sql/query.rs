//! SQL database abstraction trait.

use sea_query_binder::SqlxValues;

/// Trait for SQL database backends.
///
/// Abstracts over PostgreSQL and SQLite by providing the pool type and the
/// dialect used to render sea-query statements into SQL plus bound values.
pub trait SqlDatabase: Send + Sync + 'static {
    /// The connection pool type for this database.
    type Pool: Clone + Send + Sync;

    /// Render a SELECT statement with bound values.
    fn build_select(stmt: sea_query::SelectStatement) -> (String, SqlxValues);

    /// Render an INSERT statement with bound values.
    fn build_insert(stmt: sea_query::InsertStatement) -> (String, SqlxValues);

    /// Render a DELETE statement with bound values.
    fn build_delete(stmt: sea_query::DeleteStatement) -> (String, SqlxValues);
}
