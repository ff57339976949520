//! Mock inventory store for testing.
//!
//! Keeps instances, groups and links in keyed maps with the same upsert and
//! ensure-if-absent semantics as the SQL store.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{
    require_customer, validate_group, validate_instance, InventoryStore, Result, StorageError,
};
use crate::model::{
    Group, GroupDetail, GroupQuery, GroupRecord, GroupType, Instance, InstanceQuery,
    InstanceRecord, InstanceType, Link, RawData,
};

/// Key type for entities: (customer_id, id or name).
type EntityKey = (String, String);

#[derive(Clone)]
struct StoredInstance {
    instance_type: InstanceType,
    raw_data: RawData,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Clone)]
struct StoredGroup {
    group_type: GroupType,
    raw_data: RawData,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct Tables {
    instances: BTreeMap<EntityKey, StoredInstance>,
    groups: BTreeMap<EntityKey, StoredGroup>,
    links: BTreeSet<Link>,
}

impl Tables {
    fn upsert_instance(&mut self, instance: &Instance, at: DateTime<Utc>) {
        let key = (instance.customer_id.clone(), instance.id.clone());
        match self.instances.get_mut(&key) {
            Some(existing) => {
                existing.instance_type = instance.instance_type;
                existing.raw_data = instance.raw_data.clone();
                existing.updated_at = at;
            }
            None => {
                self.instances.insert(key, StoredInstance::new(instance, at));
            }
        }
    }

    fn ensure_instance(&mut self, instance: &Instance, at: DateTime<Utc>) {
        let key = (instance.customer_id.clone(), instance.id.clone());
        self.instances
            .entry(key)
            .or_insert_with(|| StoredInstance::new(instance, at));
    }

    fn upsert_group(&mut self, group: &Group, at: DateTime<Utc>) {
        let key = (group.customer_id.clone(), group.name.clone());
        match self.groups.get_mut(&key) {
            Some(existing) => {
                existing.group_type = group.group_type;
                existing.raw_data = group.raw_data.clone();
                existing.updated_at = at;
            }
            None => {
                self.groups.insert(key, StoredGroup::new(group, at));
            }
        }
    }

    fn ensure_group(&mut self, group: &Group, at: DateTime<Utc>) {
        let key = (group.customer_id.clone(), group.name.clone());
        self.groups
            .entry(key)
            .or_insert_with(|| StoredGroup::new(group, at));
    }

    fn link(&mut self, customer_id: &str, group_name: &str, instance_id: &str) {
        self.links.insert(Link {
            customer_id: customer_id.to_string(),
            group_name: group_name.to_string(),
            instance_id: instance_id.to_string(),
        });
    }

    fn is_member(&self, customer_id: &str, group_name: &str, instance_id: &str) -> bool {
        self.links.contains(&Link {
            customer_id: customer_id.to_string(),
            group_name: group_name.to_string(),
            instance_id: instance_id.to_string(),
        })
    }

    fn member_count(&self, customer_id: &str, group_name: &str) -> u64 {
        self.links
            .iter()
            .filter(|l| l.customer_id == customer_id && l.group_name == group_name)
            .count() as u64
    }

    fn matching_instances(&self, query: &InstanceQuery) -> Vec<InstanceRecord> {
        self.instances
            .iter()
            .filter(|((customer_id, _), _)| *customer_id == query.customer_id)
            .filter(|(_, stored)| {
                query
                    .instance_type
                    .map_or(true, |t| stored.instance_type == t)
            })
            .filter(|((customer_id, id), _)| {
                query
                    .group_name
                    .as_deref()
                    .map_or(true, |group| self.is_member(customer_id, group, id))
            })
            .map(|((customer_id, id), stored)| stored.record(customer_id, id))
            .collect()
    }

    fn matching_groups(&self, query: &GroupQuery) -> Vec<GroupRecord> {
        self.groups
            .iter()
            .filter(|((customer_id, _), _)| *customer_id == query.customer_id)
            .filter(|(_, stored)| query.group_type.map_or(true, |t| stored.group_type == t))
            .map(|((customer_id, name), stored)| {
                stored.record(customer_id, name, self.member_count(customer_id, name))
            })
            .collect()
    }
}

impl StoredInstance {
    fn new(instance: &Instance, at: DateTime<Utc>) -> Self {
        Self {
            instance_type: instance.instance_type,
            raw_data: instance.raw_data.clone(),
            created_at: at,
            updated_at: at,
        }
    }

    fn record(&self, customer_id: &str, id: &str) -> InstanceRecord {
        InstanceRecord {
            id: id.to_string(),
            customer_id: customer_id.to_string(),
            instance_type: self.instance_type,
            raw_data: self.raw_data.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl StoredGroup {
    fn new(group: &Group, at: DateTime<Utc>) -> Self {
        Self {
            group_type: group.group_type,
            raw_data: group.raw_data.clone(),
            created_at: at,
            updated_at: at,
        }
    }

    fn record(&self, customer_id: &str, name: &str, instance_count: u64) -> GroupRecord {
        GroupRecord {
            name: name.to_string(),
            customer_id: customer_id.to_string(),
            group_type: self.group_type,
            raw_data: self.raw_data.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            instance_count,
        }
    }
}

/// Mock inventory store that keeps everything in memory.
#[derive(Default)]
pub struct MockInventoryStore {
    tables: RwLock<Tables>,
    fail_on_write: RwLock<bool>,
    fail_on_read: RwLock<bool>,
    write_delay: RwLock<Option<Duration>>,
}

impl MockInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_write(&self, fail: bool) {
        *self.fail_on_write.write().await = fail;
    }

    pub async fn set_fail_on_read(&self, fail: bool) {
        *self.fail_on_read.write().await = fail;
    }

    /// Delay every write by `delay`, simulating a slow backend.
    pub async fn set_write_delay(&self, delay: Option<Duration>) {
        *self.write_delay.write().await = delay;
    }

    /// Snapshot of every stored link, sorted.
    pub async fn links(&self) -> Vec<Link> {
        self.tables.read().await.links.iter().cloned().collect()
    }

    async fn check_write(&self) -> Result<()> {
        let delay = *self.write_delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if *self.fail_on_write.read().await {
            return Err(StorageError::Unavailable("mock write failure".to_string()));
        }
        Ok(())
    }

    async fn check_read(&self) -> Result<()> {
        if *self.fail_on_read.read().await {
            return Err(StorageError::Unavailable("mock read failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl InventoryStore for MockInventoryStore {
    async fn init_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert_instance(&self, instance: &Instance) -> Result<()> {
        validate_instance(instance)?;
        self.check_write().await?;

        let at = Utc::now();
        let mut tables = self.tables.write().await;
        tables.upsert_instance(instance, at);
        for group in &instance.groups {
            if validate_group(group).is_err() {
                continue;
            }
            tables.ensure_group(group, at);
            tables.link(&instance.customer_id, &group.name, &instance.id);
        }
        Ok(())
    }

    async fn upsert_group(&self, group: &Group) -> Result<()> {
        validate_group(group)?;
        self.check_write().await?;

        let at = Utc::now();
        let mut tables = self.tables.write().await;
        tables.upsert_group(group, at);
        for instance in &group.instances {
            if validate_instance(instance).is_err() {
                continue;
            }
            tables.ensure_instance(instance, at);
            tables.link(&group.customer_id, &group.name, &instance.id);
        }
        Ok(())
    }

    async fn get_instance(
        &self,
        customer_id: &str,
        instance_id: &str,
    ) -> Result<Option<InstanceRecord>> {
        require_customer(customer_id)?;
        if instance_id.is_empty() {
            return Err(StorageError::MissingInstanceId);
        }
        self.check_read().await?;

        let tables = self.tables.read().await;
        let key = (customer_id.to_string(), instance_id.to_string());
        Ok(tables
            .instances
            .get(&key)
            .map(|stored| stored.record(customer_id, instance_id)))
    }

    async fn list_instances(&self, query: &InstanceQuery) -> Result<Vec<InstanceRecord>> {
        require_customer(&query.customer_id)?;
        self.check_read().await?;
        Ok(self.tables.read().await.matching_instances(query))
    }

    async fn count_instances(&self, query: &InstanceQuery) -> Result<u64> {
        require_customer(&query.customer_id)?;
        self.check_read().await?;
        Ok(self.tables.read().await.matching_instances(query).len() as u64)
    }

    async fn get_group(&self, customer_id: &str, group_name: &str) -> Result<Option<GroupDetail>> {
        require_customer(customer_id)?;
        if group_name.is_empty() {
            return Err(StorageError::MissingGroupId);
        }
        self.check_read().await?;

        let tables = self.tables.read().await;
        let key = (customer_id.to_string(), group_name.to_string());
        let Some(stored) = tables.groups.get(&key) else {
            return Ok(None);
        };

        let instance_count = tables.member_count(customer_id, group_name);
        let members = InstanceQuery::for_customer(customer_id).in_group(group_name);
        Ok(Some(GroupDetail {
            group: stored.record(customer_id, group_name, instance_count),
            instances: tables.matching_instances(&members),
            instance_count,
        }))
    }

    async fn list_groups(&self, query: &GroupQuery) -> Result<Vec<GroupRecord>> {
        require_customer(&query.customer_id)?;
        self.check_read().await?;
        Ok(self.tables.read().await.matching_groups(query))
    }

    async fn count_groups(&self, query: &GroupQuery) -> Result<u64> {
        require_customer(&query.customer_id)?;
        self.check_read().await?;
        Ok(self.tables.read().await.matching_groups(query).len() as u64)
    }

    async fn delete_all(&self) -> Result<()> {
        self.check_write().await?;
        let mut tables = self.tables.write().await;
        tables.links.clear();
        tables.instances.clear();
        tables.groups.clear();
        Ok(())
    }
}
