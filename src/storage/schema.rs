//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.
//! The DDL uses only TEXT and INTEGER columns so both dialects share it.

use sea_query::Iden;

/// Instances table schema.
#[derive(Iden)]
pub enum Instances {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "customer_id"]
    CustomerId,
    #[iden = "type"]
    Type,
    #[iden = "raw_data"]
    RawData,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// Groups table schema.
#[derive(Iden)]
pub enum Groups {
    Table,
    #[iden = "name"]
    Name,
    #[iden = "customer_id"]
    CustomerId,
    #[iden = "type"]
    Type,
    #[iden = "raw_data"]
    RawData,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// Group membership link table schema.
#[derive(Iden)]
pub enum GroupsInstances {
    Table,
    #[iden = "customer_id"]
    CustomerId,
    #[iden = "group_name"]
    GroupName,
    #[iden = "instance_id"]
    InstanceId,
}

/// Statements creating the inventory schema, executed in order.
pub const CREATE_SCHEMA: &[&str] = &[
    r#"
CREATE TABLE IF NOT EXISTS instances (
    id TEXT NOT NULL,
    customer_id TEXT NOT NULL,
    type TEXT NOT NULL,
    raw_data TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (customer_id, id)
)"#,
    r#"
CREATE INDEX IF NOT EXISTS idx_instances_customer_type ON instances(customer_id, type)"#,
    r#"
CREATE TABLE IF NOT EXISTS "groups" (
    name TEXT NOT NULL,
    customer_id TEXT NOT NULL,
    type TEXT NOT NULL,
    raw_data TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (customer_id, name)
)"#,
    r#"
CREATE INDEX IF NOT EXISTS idx_groups_customer_type ON "groups"(customer_id, type)"#,
    r#"
CREATE TABLE IF NOT EXISTS groups_instances (
    customer_id TEXT NOT NULL,
    group_name TEXT NOT NULL,
    instance_id TEXT NOT NULL,
    PRIMARY KEY (customer_id, group_name, instance_id)
)"#,
    r#"
CREATE INDEX IF NOT EXISTS idx_groups_instances_instance ON groups_instances(customer_id, instance_id)"#,
];
