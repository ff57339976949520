//! Unified SQL storage implementation.
//!
//! The inventory store is parameterized by database type using the
//! `SqlDatabase` trait; statements are built once with sea-query and rendered
//! per dialect.

mod inventory_store;
mod query;

pub use inventory_store::SqlInventoryStore;
pub use query::SqlDatabase;

#[cfg(feature = "postgres")]
pub mod postgres {
    //! PostgreSQL database backend.

    use sea_query::PostgresQueryBuilder;
    use sea_query_binder::{SqlxBinder, SqlxValues};
    use sqlx::PgPool;

    /// PostgreSQL database marker type.
    pub struct Postgres;

    impl super::SqlDatabase for Postgres {
        type Pool = PgPool;

        fn build_select(stmt: sea_query::SelectStatement) -> (String, SqlxValues) {
            stmt.build_sqlx(PostgresQueryBuilder)
        }

        fn build_insert(stmt: sea_query::InsertStatement) -> (String, SqlxValues) {
            stmt.build_sqlx(PostgresQueryBuilder)
        }

        fn build_delete(stmt: sea_query::DeleteStatement) -> (String, SqlxValues) {
            stmt.build_sqlx(PostgresQueryBuilder)
        }
    }

    /// PostgreSQL inventory store.
    pub type PostgresInventoryStore = super::SqlInventoryStore<Postgres>;
}

#[cfg(feature = "sqlite")]
pub mod sqlite {
    //! SQLite database backend.

    use sea_query::SqliteQueryBuilder;
    use sea_query_binder::{SqlxBinder, SqlxValues};
    use sqlx::SqlitePool;

    /// SQLite database marker type.
    pub struct Sqlite;

    impl super::SqlDatabase for Sqlite {
        type Pool = SqlitePool;

        fn build_select(stmt: sea_query::SelectStatement) -> (String, SqlxValues) {
            stmt.build_sqlx(SqliteQueryBuilder)
        }

        fn build_insert(stmt: sea_query::InsertStatement) -> (String, SqlxValues) {
            stmt.build_sqlx(SqliteQueryBuilder)
        }

        fn build_delete(stmt: sea_query::DeleteStatement) -> (String, SqlxValues) {
            stmt.build_sqlx(SqliteQueryBuilder)
        }
    }

    /// SQLite inventory store.
    pub type SqliteInventoryStore = super::SqlInventoryStore<Sqlite>;
}
