//! Inventory persistence.
//!
//! This module contains:
//! - `InventoryStore` trait: idempotent entity writes and per-customer reads
//! - `StorageError`
//! - Implementations: SQL (SQLite, PostgreSQL) and an in-memory mock

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::config::{StorageConfig, StorageType};
use crate::model::{
    Entity, Group, GroupDetail, GroupQuery, GroupRecord, Instance, InstanceQuery, InstanceRecord,
    UnknownType,
};

pub mod mock;
#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub mod schema;
#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub mod sql;

pub use mock::MockInventoryStore;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("must provide customer id")]
    MissingCustomerId,

    #[error("must provide instance id")]
    MissingInstanceId,

    #[error("must provide group id")]
    MissingGroupId,

    #[error(transparent)]
    UnknownType(#[from] UnknownType),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(#[from] chrono::ParseError),

    #[error("Invalid stored payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(any(feature = "sqlite", feature = "postgres"))]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage configuration error: {0}")]
    Config(String),
}

/// Interface for inventory persistence.
///
/// Writes are idempotent per natural key and commit statement by statement:
/// an entity row may land without its links if a later statement fails, and
/// replaying the same entity repairs it.
///
/// Implementations:
/// - `SqlInventoryStore<Sqlite>` / `SqlInventoryStore<Postgres>`
/// - `MockInventoryStore`: in-memory, for tests
#[async_trait]
pub trait InventoryStore: Send + Sync + 'static {
    /// Create tables and indexes if absent.
    async fn init_schema(&self) -> Result<()>;

    /// Insert or update an instance, ensure its referenced groups exist and
    /// link them.
    async fn upsert_instance(&self, instance: &Instance) -> Result<()>;

    /// Insert or update a group, ensure its member instances exist and link
    /// them.
    async fn upsert_group(&self, group: &Group) -> Result<()>;

    /// Get a single instance.
    async fn get_instance(&self, customer_id: &str, instance_id: &str)
        -> Result<Option<InstanceRecord>>;

    /// List instances, optionally filtered by type and group membership.
    async fn list_instances(&self, query: &InstanceQuery) -> Result<Vec<InstanceRecord>>;

    /// Count instances matching the same filters as `list_instances`.
    async fn count_instances(&self, query: &InstanceQuery) -> Result<u64>;

    /// Get a group with its member instances.
    async fn get_group(&self, customer_id: &str, group_name: &str) -> Result<Option<GroupDetail>>;

    /// List groups with their member counts.
    async fn list_groups(&self, query: &GroupQuery) -> Result<Vec<GroupRecord>>;

    /// Count groups, optionally filtered by type.
    async fn count_groups(&self, query: &GroupQuery) -> Result<u64>;

    /// Remove every link, instance and group.
    async fn delete_all(&self) -> Result<()>;

    /// Write a normalized entity. Network resources are accepted and skipped.
    async fn put_entity(&self, entity: &Entity) -> Result<()> {
        match entity {
            Entity::Instance(instance) => self.upsert_instance(instance).await,
            Entity::Group(group) => self.upsert_group(group).await,
            Entity::Network(resource) => {
                debug!(
                    customer_id = %resource.customer_id,
                    kind = resource.kind.as_str(),
                    id = %resource.id,
                    "Network resource is not persisted"
                );
                Ok(())
            }
        }
    }
}

pub(crate) fn require_customer(customer_id: &str) -> Result<()> {
    if customer_id.is_empty() {
        return Err(StorageError::MissingCustomerId);
    }
    Ok(())
}

pub(crate) fn validate_instance(instance: &Instance) -> Result<()> {
    require_customer(&instance.customer_id)?;
    if instance.id.is_empty() {
        return Err(StorageError::MissingInstanceId);
    }
    Ok(())
}

pub(crate) fn validate_group(group: &Group) -> Result<()> {
    require_customer(&group.customer_id)?;
    if group.name.is_empty() {
        return Err(StorageError::MissingGroupId);
    }
    Ok(())
}

/// Initialize storage based on configuration.
///
/// Connects, creates the schema and returns the store.
pub async fn init_storage(config: &StorageConfig) -> Result<Arc<dyn InventoryStore>> {
    match config.storage_type {
        #[cfg(feature = "sqlite")]
        StorageType::Sqlite => {
            use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
            use std::str::FromStr;

            info!(path = %config.sqlite.path, "Storage: sqlite");

            let options = if config.sqlite.path == ":memory:" {
                SqliteConnectOptions::from_str("sqlite::memory:")?
                    .busy_timeout(std::time::Duration::from_secs(5))
            } else {
                if let Some(parent) = std::path::Path::new(&config.sqlite.path).parent() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| StorageError::Config(e.to_string()))?;
                }
                SqliteConnectOptions::new()
                    .filename(&config.sqlite.path)
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal)
                    .busy_timeout(std::time::Duration::from_secs(5))
            };

            // An in-memory database exists per connection.
            let max_connections = if config.sqlite.path == ":memory:" {
                1
            } else {
                config.sqlite.max_connections
            };

            let pool = SqlitePoolOptions::new()
                .max_connections(max_connections)
                .connect_with(options)
                .await?;

            let store = sql::sqlite::SqliteInventoryStore::new(pool);
            store.init_schema().await?;
            Ok(Arc::new(store))
        }
        #[cfg(feature = "postgres")]
        StorageType::Postgres => {
            use sqlx::postgres::PgPoolOptions;

            info!(
                max_connections = config.postgres.max_connections,
                "Storage: postgres"
            );

            let pool = PgPoolOptions::new()
                .max_connections(config.postgres.max_connections)
                .min_connections(config.postgres.min_connections)
                .connect(&config.postgres.uri)
                .await?;

            let store = sql::postgres::PostgresInventoryStore::new(pool);
            store.init_schema().await?;
            Ok(Arc::new(store))
        }
        StorageType::Memory => {
            info!("Storage: in-memory");
            Ok(Arc::new(MockInventoryStore::new()))
        }
        #[allow(unreachable_patterns)]
        other => {
            error!(storage_type = ?other, "Storage type requested but its feature is not enabled");
            Err(StorageError::Config(format!(
                "storage type {:?} not enabled in this build",
                other
            )))
        }
    }
}
