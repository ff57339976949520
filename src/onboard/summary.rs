//! Per-scan counters and the terminal decision rule.

use std::collections::HashSet;

use serde::Serialize;

use crate::model::Entity;
use crate::normalize::ResourceKind;

/// Instance error ratio above which a scan fails.
pub const INSTANCE_ERROR_THRESHOLD: f64 = 0.3;

/// Lifecycle of one scan request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanState {
    Created,
    Running,
    Succeeded,
    Failed,
}

/// Counts accumulated over one scan. Serialized as the notification payload.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanSummary {
    pub request_id: String,
    pub customer_id: String,
    pub user_id: String,
    pub region: String,

    pub instance_count: u64,
    pub db_instance_count: u64,
    pub security_group_count: u64,
    pub db_security_group_count: u64,
    pub load_balancer_count: u64,
    pub autoscaling_group_count: u64,

    pub instance_error_count: u64,
    pub group_error_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    #[serde(skip)]
    seen_instances: HashSet<String>,
}

impl ScanSummary {
    pub fn new(
        request_id: impl Into<String>,
        customer_id: impl Into<String>,
        user_id: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            customer_id: customer_id.into(),
            user_id: user_id.into(),
            region: region.into(),
            ..Default::default()
        }
    }

    /// Count a stored entity. Compute instances are counted once per id;
    /// network resources are not counted.
    pub fn record_entity(&mut self, kind: ResourceKind, entity: &Entity) {
        match kind {
            ResourceKind::Instance => {
                if self.seen_instances.insert(entity.key().to_string()) {
                    self.instance_count += 1;
                }
            }
            ResourceKind::DbInstance => self.db_instance_count += 1,
            ResourceKind::SecurityGroup => self.security_group_count += 1,
            ResourceKind::DbSecurityGroup => self.db_security_group_count += 1,
            ResourceKind::LoadBalancer => self.load_balancer_count += 1,
            ResourceKind::AutoScalingGroup => self.autoscaling_group_count += 1,
            ResourceKind::RouteTable | ResourceKind::Subnet => {}
        }
    }

    /// Count an error against instances or groups. Unrecognized kinds count
    /// as group errors.
    pub fn record_error(&mut self, kind: Option<ResourceKind>, message: impl Into<String>) {
        if kind.is_some_and(|k| k.is_instance()) {
            self.instance_error_count += 1;
        } else {
            self.group_error_count += 1;
        }
        self.last_error = Some(message.into());
    }

    /// Instance errors over discovered instances, or `None` with nothing
    /// discovered.
    pub fn instance_error_ratio(&self) -> Option<f64> {
        let denominator = self.instance_count + self.db_instance_count;
        if denominator == 0 {
            None
        } else {
            Some(self.instance_error_count as f64 / denominator as f64)
        }
    }

    pub fn outcome(&self) -> ScanState {
        if self.group_error_count > 0 {
            return ScanState::Failed;
        }
        match self.instance_error_ratio() {
            Some(ratio) if ratio > INSTANCE_ERROR_THRESHOLD => ScanState::Failed,
            _ => ScanState::Succeeded,
        }
    }
}
