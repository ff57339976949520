//! Provider payload shapes.
//!
//! Only the fields normalization reads are typed; everything else is kept in
//! `rest` so the re-serialized payload carries the full description.
//!
//! Embedded reference lists stay untyped. A `null` list reads as empty, and
//! individual elements are inspected with [`reference_id`] so one malformed
//! reference never rejects its parent.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Accept `null` wherever a list is expected.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Non-empty string `field` of an embedded reference.
///
/// Non-object references and non-string values yield `None`.
pub fn reference_id<'a>(reference: &'a Value, field: &str) -> Option<&'a str> {
    reference
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Compute instance description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Ec2Instance {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    /// `{GroupId, GroupName}` references.
    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub security_groups: Vec<Value>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// Managed database instance description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DbInstance {
    #[serde(rename = "DBInstanceIdentifier", skip_serializing_if = "Option::is_none")]
    pub db_instance_identifier: Option<String>,
    /// `{VpcSecurityGroupId, Status}` memberships.
    #[serde(
        rename = "VpcSecurityGroups",
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub vpc_security_groups: Vec<Value>,
    /// `{DBSecurityGroupName, Status}` memberships.
    #[serde(
        rename = "DBSecurityGroups",
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub db_security_groups: Vec<Value>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// Network security group description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SecurityGroup {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// Managed-database security group description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DbSecurityGroup {
    #[serde(rename = "DBSecurityGroupName", skip_serializing_if = "Option::is_none")]
    pub db_security_group_name: Option<String>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// Load balancer description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoadBalancerDescription {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_balancer_name: Option<String>,
    /// `{InstanceId}` member references.
    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub instances: Vec<Value>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// Autoscaling group description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AutoScalingGroup {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_scaling_group_name: Option<String>,
    /// `{InstanceId, LifecycleState, ...}` member references.
    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub instances: Vec<Value>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RouteTable {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_table_id: Option<String>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Subnet {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}
