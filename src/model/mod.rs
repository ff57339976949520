//! Canonical inventory entities.
//!
//! Scanner payloads are normalized into two entity kinds: [`Instance`]
//! (compute or managed database) and [`Group`] (security group, load
//! balancer or autoscaling group). Membership between the two is a
//! [`Link`]. Read paths return the stored `*Record` forms, whose JSON
//! presentation is the stored raw payload verbatim.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::value::RawValue;

/// Raw JSON payload as re-serialized by the normalizer.
pub type RawData = Box<RawValue>;

/// Error returned when a stored type discriminator is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {entity} type: {value}")]
pub struct UnknownType {
    pub entity: &'static str,
    pub value: String,
}

/// Instance type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceType {
    /// Compute instance.
    Ec2,
    /// Managed database instance.
    Rds,
}

impl InstanceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceType::Ec2 => "ec2",
            InstanceType::Rds => "rds",
        }
    }
}

impl FromStr for InstanceType {
    type Err = UnknownType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ec2" => Ok(InstanceType::Ec2),
            "rds" => Ok(InstanceType::Rds),
            other => Err(UnknownType {
                entity: "instance",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for InstanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Group type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupType {
    /// Network security group.
    Security,
    /// Managed-database security group.
    RdsSecurity,
    /// Load balancer.
    Elb,
    /// Autoscaling group.
    Autoscaling,
}

impl GroupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupType::Security => "security",
            GroupType::RdsSecurity => "rds-security",
            GroupType::Elb => "elb",
            GroupType::Autoscaling => "autoscaling",
        }
    }
}

impl FromStr for GroupType {
    type Err = UnknownType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "security" => Ok(GroupType::Security),
            "rds-security" => Ok(GroupType::RdsSecurity),
            "elb" => Ok(GroupType::Elb),
            "autoscaling" => Ok(GroupType::Autoscaling),
            other => Err(UnknownType {
                entity: "group",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for GroupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized instance, ready to be written.
///
/// `groups` holds the group references discovered inside the payload. They
/// only drive link creation and are never stored on the instance row.
#[derive(Debug, Clone)]
pub struct Instance {
    pub id: String,
    pub customer_id: String,
    pub instance_type: InstanceType,
    pub raw_data: RawData,
    pub groups: Vec<Group>,
}

/// A normalized group, ready to be written.
///
/// `instances` holds the member references discovered inside the payload.
#[derive(Debug, Clone)]
pub struct Group {
    pub name: String,
    pub customer_id: String,
    pub group_type: GroupType,
    pub raw_data: RawData,
    pub instances: Vec<Instance>,
}

/// Kind of a network resource that is recognized but not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkKind {
    RouteTable,
    Subnet,
}

impl NetworkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkKind::RouteTable => "route-table",
            NetworkKind::Subnet => "subnet",
        }
    }
}

/// A validated route table or subnet.
#[derive(Debug, Clone)]
pub struct NetworkResource {
    pub id: String,
    pub customer_id: String,
    pub kind: NetworkKind,
    pub raw_data: RawData,
}

/// Output of normalization.
#[derive(Debug, Clone)]
pub enum Entity {
    Instance(Instance),
    Group(Group),
    Network(NetworkResource),
}

impl Entity {
    pub fn customer_id(&self) -> &str {
        match self {
            Entity::Instance(i) => &i.customer_id,
            Entity::Group(g) => &g.customer_id,
            Entity::Network(n) => &n.customer_id,
        }
    }

    /// Stored type discriminator, for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Entity::Instance(i) => i.instance_type.as_str(),
            Entity::Group(g) => g.group_type.as_str(),
            Entity::Network(n) => n.kind.as_str(),
        }
    }

    /// Natural identifier: instance id, group name, or resource id.
    pub fn key(&self) -> &str {
        match self {
            Entity::Instance(i) => &i.id,
            Entity::Group(g) => &g.name,
            Entity::Network(n) => &n.id,
        }
    }
}

/// Membership of an instance in a group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Link {
    pub customer_id: String,
    pub group_name: String,
    pub instance_id: String,
}

/// Stored instance row.
#[derive(Debug, Clone)]
pub struct InstanceRecord {
    pub id: String,
    pub customer_id: String,
    pub instance_type: InstanceType,
    pub raw_data: RawData,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Serialize for InstanceRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.raw_data.serialize(serializer)
    }
}

/// Stored group row with its derived member count.
#[derive(Debug, Clone)]
pub struct GroupRecord {
    pub name: String,
    pub customer_id: String,
    pub group_type: GroupType,
    pub raw_data: RawData,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub instance_count: u64,
}

impl Serialize for GroupRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.raw_data.serialize(serializer)
    }
}

/// A group together with its member instances.
#[derive(Debug, Clone, Serialize)]
pub struct GroupDetail {
    pub group: GroupRecord,
    pub instances: Vec<InstanceRecord>,
    pub instance_count: u64,
}

/// Filter for instance reads.
#[derive(Debug, Clone, Default)]
pub struct InstanceQuery {
    pub customer_id: String,
    pub instance_type: Option<InstanceType>,
    /// Restrict to members of this group.
    pub group_name: Option<String>,
}

impl InstanceQuery {
    pub fn for_customer(customer_id: impl Into<String>) -> Self {
        Self {
            customer_id: customer_id.into(),
            ..Default::default()
        }
    }

    pub fn with_type(mut self, instance_type: InstanceType) -> Self {
        self.instance_type = Some(instance_type);
        self
    }

    pub fn in_group(mut self, group_name: impl Into<String>) -> Self {
        self.group_name = Some(group_name.into());
        self
    }
}

/// Filter for group reads.
#[derive(Debug, Clone, Default)]
pub struct GroupQuery {
    pub customer_id: String,
    pub group_type: Option<GroupType>,
}

impl GroupQuery {
    pub fn for_customer(customer_id: impl Into<String>) -> Self {
        Self {
            customer_id: customer_id.into(),
            ..Default::default()
        }
    }

    pub fn with_type(mut self, group_type: GroupType) -> Self {
        self.group_type = Some(group_type);
        self
    }
}
