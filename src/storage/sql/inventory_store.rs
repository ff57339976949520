//! Unified SQL InventoryStore implementation.
//!
//! Statements are dialect independent and built by the functions below; a
//! macro generates the `InventoryStore` impl for each SQL backend.

use std::marker::PhantomData;

use chrono::{DateTime, Utc};
use sea_query::{
    Alias, DeleteStatement, Expr, Func, InsertStatement, OnConflict, Order, Query, SelectStatement,
};
use serde_json::value::RawValue;

use super::SqlDatabase;
use crate::model::{
    Group, GroupQuery, GroupRecord, GroupType, Instance, InstanceQuery, InstanceRecord,
    InstanceType,
};
use crate::storage::schema::{Groups, GroupsInstances, Instances};
use crate::storage::Result;

/// SQL-based implementation of InventoryStore.
///
/// Works with any SQL database that implements `SqlDatabase`.
pub struct SqlInventoryStore<DB: SqlDatabase> {
    pool: DB::Pool,
    _marker: PhantomData<DB>,
}

impl<DB: SqlDatabase> SqlInventoryStore<DB> {
    /// Create a new SQL inventory store with the given pool.
    pub fn new(pool: DB::Pool) -> Self {
        Self {
            pool,
            _marker: PhantomData,
        }
    }

    /// Get the underlying pool.
    pub fn pool(&self) -> &DB::Pool {
        &self.pool
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn instance_insert(instance: &Instance, at: &str) -> InsertStatement {
    Query::insert()
        .into_table(Instances::Table)
        .columns([
            Instances::Id,
            Instances::CustomerId,
            Instances::Type,
            Instances::RawData,
            Instances::CreatedAt,
            Instances::UpdatedAt,
        ])
        .values_panic([
            instance.id.as_str().into(),
            instance.customer_id.as_str().into(),
            instance.instance_type.as_str().into(),
            instance.raw_data.get().into(),
            at.into(),
            at.into(),
        ])
        .to_owned()
}

fn group_insert(group: &Group, at: &str) -> InsertStatement {
    Query::insert()
        .into_table(Groups::Table)
        .columns([
            Groups::Name,
            Groups::CustomerId,
            Groups::Type,
            Groups::RawData,
            Groups::CreatedAt,
            Groups::UpdatedAt,
        ])
        .values_panic([
            group.name.as_str().into(),
            group.customer_id.as_str().into(),
            group.group_type.as_str().into(),
            group.raw_data.get().into(),
            at.into(),
            at.into(),
        ])
        .to_owned()
}

/// Insert, or update type, payload and `updated_at` of an existing instance.
pub(super) fn upsert_instance_stmt(instance: &Instance, at: &str) -> InsertStatement {
    instance_insert(instance, at)
        .on_conflict(
            OnConflict::columns([Instances::CustomerId, Instances::Id])
                .update_columns([Instances::Type, Instances::RawData, Instances::UpdatedAt])
                .to_owned(),
        )
        .to_owned()
}

/// Insert a referenced instance only if it does not exist yet.
pub(super) fn ensure_instance_stmt(instance: &Instance, at: &str) -> InsertStatement {
    instance_insert(instance, at)
        .on_conflict(
            OnConflict::columns([Instances::CustomerId, Instances::Id])
                .do_nothing()
                .to_owned(),
        )
        .to_owned()
}

pub(super) fn upsert_group_stmt(group: &Group, at: &str) -> InsertStatement {
    group_insert(group, at)
        .on_conflict(
            OnConflict::columns([Groups::CustomerId, Groups::Name])
                .update_columns([Groups::Type, Groups::RawData, Groups::UpdatedAt])
                .to_owned(),
        )
        .to_owned()
}

pub(super) fn ensure_group_stmt(group: &Group, at: &str) -> InsertStatement {
    group_insert(group, at)
        .on_conflict(
            OnConflict::columns([Groups::CustomerId, Groups::Name])
                .do_nothing()
                .to_owned(),
        )
        .to_owned()
}

pub(super) fn link_stmt(customer_id: &str, group_name: &str, instance_id: &str) -> InsertStatement {
    Query::insert()
        .into_table(GroupsInstances::Table)
        .columns([
            GroupsInstances::CustomerId,
            GroupsInstances::GroupName,
            GroupsInstances::InstanceId,
        ])
        .values_panic([customer_id.into(), group_name.into(), instance_id.into()])
        .on_conflict(
            OnConflict::columns([
                GroupsInstances::CustomerId,
                GroupsInstances::GroupName,
                GroupsInstances::InstanceId,
            ])
            .do_nothing()
            .to_owned(),
        )
        .to_owned()
}

fn filter_instances(stmt: &mut SelectStatement, query: &InstanceQuery) {
    stmt.and_where(Expr::col(Instances::CustomerId).eq(query.customer_id.as_str()));

    if let Some(instance_type) = query.instance_type {
        stmt.and_where(Expr::col(Instances::Type).eq(instance_type.as_str()));
    }

    if let Some(group_name) = &query.group_name {
        stmt.and_where(
            Expr::col(Instances::Id).in_subquery(
                Query::select()
                    .column(GroupsInstances::InstanceId)
                    .from(GroupsInstances::Table)
                    .and_where(
                        Expr::col(GroupsInstances::CustomerId).eq(query.customer_id.as_str()),
                    )
                    .and_where(Expr::col(GroupsInstances::GroupName).eq(group_name.as_str()))
                    .to_owned(),
            ),
        );
    }
}

pub(super) fn select_instances_stmt(query: &InstanceQuery) -> SelectStatement {
    let mut stmt = Query::select()
        .columns([
            Instances::Id,
            Instances::CustomerId,
            Instances::Type,
            Instances::RawData,
            Instances::CreatedAt,
            Instances::UpdatedAt,
        ])
        .from(Instances::Table)
        .to_owned();
    filter_instances(&mut stmt, query);
    stmt.order_by(Instances::Id, Order::Asc).to_owned()
}

pub(super) fn select_instance_stmt(customer_id: &str, instance_id: &str) -> SelectStatement {
    let mut stmt = select_instances_stmt(&InstanceQuery::for_customer(customer_id));
    stmt.and_where(Expr::col(Instances::Id).eq(instance_id));
    stmt
}

pub(super) fn count_instances_stmt(query: &InstanceQuery) -> SelectStatement {
    let mut stmt = Query::select()
        .expr_as(Func::count(Expr::col(Instances::Id)), Alias::new("count"))
        .from(Instances::Table)
        .to_owned();
    filter_instances(&mut stmt, query);
    stmt
}

/// Groups joined with their link rows, one result row per group.
pub(super) fn select_groups_stmt(query: &GroupQuery) -> SelectStatement {
    let mut stmt = Query::select()
        .columns([
            (Groups::Table, Groups::Name),
            (Groups::Table, Groups::CustomerId),
            (Groups::Table, Groups::Type),
            (Groups::Table, Groups::RawData),
            (Groups::Table, Groups::CreatedAt),
            (Groups::Table, Groups::UpdatedAt),
        ])
        .expr_as(
            Func::count(Expr::col((
                GroupsInstances::Table,
                GroupsInstances::InstanceId,
            ))),
            Alias::new("instance_count"),
        )
        .from(Groups::Table)
        .left_join(
            GroupsInstances::Table,
            Expr::col((GroupsInstances::Table, GroupsInstances::CustomerId))
                .equals((Groups::Table, Groups::CustomerId))
                .and(
                    Expr::col((GroupsInstances::Table, GroupsInstances::GroupName))
                        .equals((Groups::Table, Groups::Name)),
                ),
        )
        .and_where(Expr::col((Groups::Table, Groups::CustomerId)).eq(query.customer_id.as_str()))
        .to_owned();

    if let Some(group_type) = query.group_type {
        stmt.and_where(Expr::col((Groups::Table, Groups::Type)).eq(group_type.as_str()));
    }

    stmt.group_by_columns([
        (Groups::Table, Groups::CustomerId),
        (Groups::Table, Groups::Name),
    ])
    .order_by((Groups::Table, Groups::Name), Order::Asc)
    .to_owned()
}

pub(super) fn select_group_stmt(customer_id: &str, group_name: &str) -> SelectStatement {
    let mut stmt = select_groups_stmt(&GroupQuery::for_customer(customer_id));
    stmt.and_where(Expr::col((Groups::Table, Groups::Name)).eq(group_name));
    stmt
}

pub(super) fn count_groups_stmt(query: &GroupQuery) -> SelectStatement {
    let mut stmt = Query::select()
        .expr_as(Func::count(Expr::col(Groups::Name)), Alias::new("count"))
        .from(Groups::Table)
        .and_where(Expr::col(Groups::CustomerId).eq(query.customer_id.as_str()))
        .to_owned();

    if let Some(group_type) = query.group_type {
        stmt.and_where(Expr::col(Groups::Type).eq(group_type.as_str()));
    }
    stmt
}

/// Delete statements in dependency order: links first.
pub(super) fn delete_all_stmts() -> [DeleteStatement; 3] {
    [
        Query::delete().from_table(GroupsInstances::Table).to_owned(),
        Query::delete().from_table(Instances::Table).to_owned(),
        Query::delete().from_table(Groups::Table).to_owned(),
    ]
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

pub(super) fn instance_from_row<R>(row: &R) -> Result<InstanceRecord>
where
    R: sqlx::Row,
    for<'r> String: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
    for<'a> &'a str: sqlx::ColumnIndex<R>,
{
    let instance_type: String = row.try_get("type")?;
    let raw_data: String = row.try_get("raw_data")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(InstanceRecord {
        id: row.try_get("id")?,
        customer_id: row.try_get("customer_id")?,
        instance_type: instance_type.parse::<InstanceType>()?,
        raw_data: RawValue::from_string(raw_data)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

pub(super) fn group_from_row<R>(row: &R) -> Result<GroupRecord>
where
    R: sqlx::Row,
    for<'r> String: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
    for<'r> i64: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
    for<'a> &'a str: sqlx::ColumnIndex<R>,
{
    let group_type: String = row.try_get("type")?;
    let raw_data: String = row.try_get("raw_data")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    let instance_count: i64 = row.try_get("instance_count")?;

    Ok(GroupRecord {
        name: row.try_get("name")?,
        customer_id: row.try_get("customer_id")?,
        group_type: group_type.parse::<GroupType>()?,
        raw_data: RawValue::from_string(raw_data)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
        instance_count: instance_count.max(0) as u64,
    })
}

pub(super) fn count_from_row<R>(row: &R) -> Result<u64>
where
    R: sqlx::Row,
    for<'r> i64: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
    for<'a> &'a str: sqlx::ColumnIndex<R>,
{
    let count: i64 = row.try_get("count")?;
    Ok(count.max(0) as u64)
}

/// Macro to implement InventoryStore for a specific SQL backend.
macro_rules! impl_inventory_store {
    ($db_type:ty, $feature:literal) => {
        #[cfg(feature = $feature)]
        #[async_trait::async_trait]
        impl crate::storage::InventoryStore for SqlInventoryStore<$db_type> {
            async fn init_schema(&self) -> crate::storage::Result<()> {
                for statement in crate::storage::schema::CREATE_SCHEMA {
                    sqlx::query(*statement).execute(&self.pool).await?;
                }
                tracing::debug!(backend = $feature, "Inventory schema ready");
                Ok(())
            }

            async fn upsert_instance(&self, instance: &Instance) -> crate::storage::Result<()> {
                crate::storage::validate_instance(instance)?;
                let at = now();

                let (sql, values) = <$db_type>::build_insert(upsert_instance_stmt(instance, &at));
                sqlx::query_with(&sql, values).execute(&self.pool).await?;

                for group in &instance.groups {
                    if crate::storage::validate_group(group).is_err() {
                        continue;
                    }
                    let (sql, values) = <$db_type>::build_insert(ensure_group_stmt(group, &at));
                    sqlx::query_with(&sql, values).execute(&self.pool).await?;

                    let (sql, values) = <$db_type>::build_insert(link_stmt(
                        &instance.customer_id,
                        &group.name,
                        &instance.id,
                    ));
                    sqlx::query_with(&sql, values).execute(&self.pool).await?;
                }

                Ok(())
            }

            async fn upsert_group(&self, group: &Group) -> crate::storage::Result<()> {
                crate::storage::validate_group(group)?;
                let at = now();

                let (sql, values) = <$db_type>::build_insert(upsert_group_stmt(group, &at));
                sqlx::query_with(&sql, values).execute(&self.pool).await?;

                for instance in &group.instances {
                    if crate::storage::validate_instance(instance).is_err() {
                        continue;
                    }
                    let (sql, values) = <$db_type>::build_insert(ensure_instance_stmt(instance, &at));
                    sqlx::query_with(&sql, values).execute(&self.pool).await?;

                    let (sql, values) = <$db_type>::build_insert(link_stmt(
                        &group.customer_id,
                        &group.name,
                        &instance.id,
                    ));
                    sqlx::query_with(&sql, values).execute(&self.pool).await?;
                }

                Ok(())
            }

            async fn get_instance(
                &self,
                customer_id: &str,
                instance_id: &str,
            ) -> crate::storage::Result<Option<InstanceRecord>> {
                crate::storage::require_customer(customer_id)?;
                if instance_id.is_empty() {
                    return Err(crate::storage::StorageError::MissingInstanceId);
                }

                let (sql, values) = <$db_type>::build_select(select_instance_stmt(customer_id, instance_id));
                let row = sqlx::query_with(&sql, values).fetch_optional(&self.pool).await?;
                row.as_ref().map(instance_from_row).transpose()
            }

            async fn list_instances(
                &self,
                query: &InstanceQuery,
            ) -> crate::storage::Result<Vec<InstanceRecord>> {
                crate::storage::require_customer(&query.customer_id)?;

                let (sql, values) = <$db_type>::build_select(select_instances_stmt(query));
                let rows = sqlx::query_with(&sql, values).fetch_all(&self.pool).await?;
                rows.iter().map(instance_from_row).collect()
            }

            async fn count_instances(&self, query: &InstanceQuery) -> crate::storage::Result<u64> {
                crate::storage::require_customer(&query.customer_id)?;

                let (sql, values) = <$db_type>::build_select(count_instances_stmt(query));
                let row = sqlx::query_with(&sql, values).fetch_one(&self.pool).await?;
                count_from_row(&row)
            }

            async fn get_group(
                &self,
                customer_id: &str,
                group_name: &str,
            ) -> crate::storage::Result<Option<crate::model::GroupDetail>> {
                crate::storage::require_customer(customer_id)?;
                if group_name.is_empty() {
                    return Err(crate::storage::StorageError::MissingGroupId);
                }

                let (sql, values) = <$db_type>::build_select(select_group_stmt(customer_id, group_name));
                let Some(row) = sqlx::query_with(&sql, values).fetch_optional(&self.pool).await? else {
                    return Ok(None);
                };
                let group = group_from_row(&row)?;

                let members = InstanceQuery::for_customer(customer_id).in_group(group_name);
                let instances = self.list_instances(&members).await?;

                Ok(Some(crate::model::GroupDetail {
                    instance_count: group.instance_count,
                    group,
                    instances,
                }))
            }

            async fn list_groups(
                &self,
                query: &GroupQuery,
            ) -> crate::storage::Result<Vec<GroupRecord>> {
                crate::storage::require_customer(&query.customer_id)?;

                let (sql, values) = <$db_type>::build_select(select_groups_stmt(query));
                let rows = sqlx::query_with(&sql, values).fetch_all(&self.pool).await?;
                rows.iter().map(group_from_row).collect()
            }

            async fn count_groups(&self, query: &GroupQuery) -> crate::storage::Result<u64> {
                crate::storage::require_customer(&query.customer_id)?;

                let (sql, values) = <$db_type>::build_select(count_groups_stmt(query));
                let row = sqlx::query_with(&sql, values).fetch_one(&self.pool).await?;
                count_from_row(&row)
            }

            async fn delete_all(&self) -> crate::storage::Result<()> {
                for stmt in delete_all_stmts() {
                    let (sql, values) = <$db_type>::build_delete(stmt);
                    sqlx::query_with(&sql, values).execute(&self.pool).await?;
                }
                Ok(())
            }
        }
    };
}

// Generate implementations for each SQL backend
impl_inventory_store!(super::postgres::Postgres, "postgres");
impl_inventory_store!(super::sqlite::Sqlite, "sqlite");
