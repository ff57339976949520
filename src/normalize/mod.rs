//! Entity normalization.
//!
//! Maps each scanner payload kind onto one of the canonical entities in
//! [`crate::model`]. Every [`ResourceKind`] has exactly one normalization
//! function; wire tags resolve through a static table. Normalization is pure.

pub mod aws;

use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::model::{
    Entity, Group, GroupType, Instance, InstanceType, NetworkKind, NetworkResource, RawData,
};

/// Result type for normalization.
pub type Result<T> = std::result::Result<T, NormalizeError>;

/// Errors produced while normalizing a payload.
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("failed to decode {kind} payload: {source}")]
    Decode {
        kind: ResourceKind,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode {kind} payload: {source}")]
    Encode {
        kind: ResourceKind,
        #[source]
        source: serde_json::Error,
    },

    #[error("{kind}: must provide {field}")]
    MissingIdentifier {
        kind: ResourceKind,
        field: &'static str,
    },

    #[error("{kind}: must provide group id ({field})")]
    MissingGroupId {
        kind: ResourceKind,
        field: &'static str,
    },
}

impl NormalizeError {
    pub fn kind(&self) -> ResourceKind {
        match self {
            NormalizeError::Decode { kind, .. }
            | NormalizeError::Encode { kind, .. }
            | NormalizeError::MissingIdentifier { kind, .. }
            | NormalizeError::MissingGroupId { kind, .. } => *kind,
        }
    }
}

/// Source resource kinds understood by the normalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Instance,
    DbInstance,
    SecurityGroup,
    DbSecurityGroup,
    LoadBalancer,
    AutoScalingGroup,
    RouteTable,
    Subnet,
}

/// Wire tag to kind lookup table.
const RESOURCE_TAGS: &[(&str, ResourceKind)] = &[
    ("Instance", ResourceKind::Instance),
    ("DBInstance", ResourceKind::DbInstance),
    ("SecurityGroup", ResourceKind::SecurityGroup),
    ("DBSecurityGroup", ResourceKind::DbSecurityGroup),
    ("LoadBalancerDescription", ResourceKind::LoadBalancer),
    ("AutoScalingGroup", ResourceKind::AutoScalingGroup),
    ("RouteTable", ResourceKind::RouteTable),
    ("Subnet", ResourceKind::Subnet),
];

type NormalizeFn = fn(&str, &[u8]) -> Result<Entity>;

impl ResourceKind {
    /// Resolve a wire tag. Unknown tags yield `None`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        RESOURCE_TAGS
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, kind)| *kind)
    }

    pub fn tag(&self) -> &'static str {
        RESOURCE_TAGS
            .iter()
            .find(|(_, kind)| kind == self)
            .map(|(t, _)| *t)
            .unwrap_or("Unknown")
    }

    /// Whether errors for this kind count against the instance error ratio.
    pub fn is_instance(&self) -> bool {
        matches!(self, ResourceKind::Instance | ResourceKind::DbInstance)
    }

    fn normalizer(&self) -> NormalizeFn {
        match self {
            ResourceKind::Instance => normalize_ec2_instance,
            ResourceKind::DbInstance => normalize_db_instance,
            ResourceKind::SecurityGroup => normalize_security_group,
            ResourceKind::DbSecurityGroup => normalize_db_security_group,
            ResourceKind::LoadBalancer => normalize_load_balancer,
            ResourceKind::AutoScalingGroup => normalize_autoscaling_group,
            ResourceKind::RouteTable => normalize_route_table,
            ResourceKind::Subnet => normalize_subnet,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Normalize a payload of a known kind.
pub fn normalize(kind: ResourceKind, customer_id: &str, payload: &[u8]) -> Result<Entity> {
    (kind.normalizer())(customer_id, payload)
}

/// Normalize a payload by wire tag. Unrecognized tags produce `Ok(None)`.
pub fn normalize_tagged(tag: &str, customer_id: &str, payload: &[u8]) -> Result<Option<Entity>> {
    match ResourceKind::from_tag(tag) {
        Some(kind) => normalize(kind, customer_id, payload).map(Some),
        None => Ok(None),
    }
}

fn decode<'a, T: serde::Deserialize<'a>>(kind: ResourceKind, payload: &'a [u8]) -> Result<T> {
    serde_json::from_slice(payload).map_err(|source| NormalizeError::Decode { kind, source })
}

fn encode<T: Serialize>(kind: ResourceKind, value: &T) -> Result<RawData> {
    serde_json::value::to_raw_value(value).map_err(|source| NormalizeError::Encode { kind, source })
}

/// Treat absent and empty identifiers the same.
fn present(id: &Option<String>) -> Option<&str> {
    id.as_deref().filter(|s| !s.is_empty())
}

fn require(kind: ResourceKind, id: &Option<String>, field: &'static str) -> Result<String> {
    present(id)
        .map(str::to_string)
        .ok_or(NormalizeError::MissingIdentifier { kind, field })
}

fn require_group(kind: ResourceKind, id: &Option<String>, field: &'static str) -> Result<String> {
    present(id)
        .map(str::to_string)
        .ok_or(NormalizeError::MissingGroupId { kind, field })
}

/// Build a group stub for an embedded reference, dropping invalid ones.
fn group_ref<T: Serialize>(
    kind: ResourceKind,
    customer_id: &str,
    name: Option<&str>,
    group_type: GroupType,
    reference: &T,
) -> Result<Option<Group>> {
    let Some(name) = name else {
        debug!(kind = %kind, group_type = %group_type, "Dropping group reference without id");
        return Ok(None);
    };

    Ok(Some(Group {
        name: name.to_string(),
        customer_id: customer_id.to_string(),
        group_type,
        raw_data: encode(kind, reference)?,
        instances: Vec::new(),
    }))
}

/// Build ec2 instance stubs for embedded member references.
fn member_refs(
    kind: ResourceKind,
    customer_id: &str,
    members: &[serde_json::Value],
) -> Result<Vec<Instance>> {
    let mut instances = Vec::with_capacity(members.len());
    for member in members {
        let Some(id) = aws::reference_id(member, "InstanceId") else {
            debug!(kind = %kind, "Dropping instance reference without id");
            continue;
        };
        instances.push(Instance {
            id: id.to_string(),
            customer_id: customer_id.to_string(),
            instance_type: InstanceType::Ec2,
            raw_data: encode(kind, member)?,
            groups: Vec::new(),
        });
    }
    Ok(instances)
}

fn normalize_ec2_instance(customer_id: &str, payload: &[u8]) -> Result<Entity> {
    let kind = ResourceKind::Instance;
    let data: aws::Ec2Instance = decode(kind, payload)?;
    let id = require(kind, &data.instance_id, "instance id")?;

    let mut groups = Vec::with_capacity(data.security_groups.len());
    for sg in &data.security_groups {
        if let Some(group) = group_ref(
            kind,
            customer_id,
            aws::reference_id(sg, "GroupId"),
            GroupType::Security,
            sg,
        )? {
            groups.push(group);
        }
    }

    Ok(Entity::Instance(Instance {
        id,
        customer_id: customer_id.to_string(),
        instance_type: InstanceType::Ec2,
        raw_data: encode(kind, &data)?,
        groups,
    }))
}

fn normalize_db_instance(customer_id: &str, payload: &[u8]) -> Result<Entity> {
    let kind = ResourceKind::DbInstance;
    let data: aws::DbInstance = decode(kind, payload)?;
    let id = require(kind, &data.db_instance_identifier, "db instance identifier")?;

    let mut groups = Vec::new();
    for vpc_sg in &data.vpc_security_groups {
        if let Some(group) = group_ref(
            kind,
            customer_id,
            aws::reference_id(vpc_sg, "VpcSecurityGroupId"),
            GroupType::Security,
            vpc_sg,
        )? {
            groups.push(group);
        }
    }
    for db_sg in &data.db_security_groups {
        if let Some(group) = group_ref(
            kind,
            customer_id,
            aws::reference_id(db_sg, "DBSecurityGroupName"),
            GroupType::RdsSecurity,
            db_sg,
        )? {
            groups.push(group);
        }
    }

    Ok(Entity::Instance(Instance {
        id,
        customer_id: customer_id.to_string(),
        instance_type: InstanceType::Rds,
        raw_data: encode(kind, &data)?,
        groups,
    }))
}

fn normalize_security_group(customer_id: &str, payload: &[u8]) -> Result<Entity> {
    let kind = ResourceKind::SecurityGroup;
    let data: aws::SecurityGroup = decode(kind, payload)?;
    let name = require_group(kind, &data.group_id, "group id")?;

    Ok(Entity::Group(Group {
        name,
        customer_id: customer_id.to_string(),
        group_type: GroupType::Security,
        raw_data: encode(kind, &data)?,
        instances: Vec::new(),
    }))
}

fn normalize_db_security_group(customer_id: &str, payload: &[u8]) -> Result<Entity> {
    let kind = ResourceKind::DbSecurityGroup;
    let data: aws::DbSecurityGroup = decode(kind, payload)?;
    let name = require_group(kind, &data.db_security_group_name, "db security group name")?;

    Ok(Entity::Group(Group {
        name,
        customer_id: customer_id.to_string(),
        group_type: GroupType::RdsSecurity,
        raw_data: encode(kind, &data)?,
        instances: Vec::new(),
    }))
}

fn normalize_load_balancer(customer_id: &str, payload: &[u8]) -> Result<Entity> {
    let kind = ResourceKind::LoadBalancer;
    let data: aws::LoadBalancerDescription = decode(kind, payload)?;
    let name = require_group(kind, &data.load_balancer_name, "load balancer name")?;
    let instances = member_refs(kind, customer_id, &data.instances)?;

    Ok(Entity::Group(Group {
        name,
        customer_id: customer_id.to_string(),
        group_type: GroupType::Elb,
        raw_data: encode(kind, &data)?,
        instances,
    }))
}

fn normalize_autoscaling_group(customer_id: &str, payload: &[u8]) -> Result<Entity> {
    let kind = ResourceKind::AutoScalingGroup;
    let data: aws::AutoScalingGroup = decode(kind, payload)?;
    let name = require_group(kind, &data.auto_scaling_group_name, "autoscaling group name")?;
    let instances = member_refs(kind, customer_id, &data.instances)?;

    Ok(Entity::Group(Group {
        name,
        customer_id: customer_id.to_string(),
        group_type: GroupType::Autoscaling,
        raw_data: encode(kind, &data)?,
        instances,
    }))
}

fn normalize_route_table(customer_id: &str, payload: &[u8]) -> Result<Entity> {
    let kind = ResourceKind::RouteTable;
    let data: aws::RouteTable = decode(kind, payload)?;
    let id = require(kind, &data.route_table_id, "route table id")?;

    Ok(Entity::Network(NetworkResource {
        id,
        customer_id: customer_id.to_string(),
        kind: NetworkKind::RouteTable,
        raw_data: encode(kind, &data)?,
    }))
}

fn normalize_subnet(customer_id: &str, payload: &[u8]) -> Result<Entity> {
    let kind = ResourceKind::Subnet;
    let data: aws::Subnet = decode(kind, payload)?;
    let id = require(kind, &data.subnet_id, "subnet id")?;

    Ok(Entity::Network(NetworkResource {
        id,
        customer_id: customer_id.to_string(),
        kind: NetworkKind::Subnet,
        raw_data: encode(kind, &data)?,
    }))
}
