//! InventoryStore interface tests.
//!
//! These tests verify the contract of the InventoryStore trait.
//! Each storage implementation should run these tests.

use serde_json::json;
use uuid::Uuid;

use fieri::model::{Entity, GroupQuery, GroupType, InstanceQuery, InstanceType};
use fieri::normalize::{normalize, ResourceKind};
use fieri::storage::{InventoryStore, StorageError};

/// Unique customer per test so implementations can share one database.
pub fn customer() -> String {
    format!("test_{}", Uuid::new_v4())
}

/// Normalize a scanner payload for the given customer.
pub fn entity(kind: ResourceKind, customer_id: &str, body: serde_json::Value) -> Entity {
    normalize(kind, customer_id, body.to_string().as_bytes()).expect("payload should normalize")
}

pub fn ec2(customer_id: &str, id: &str, groups: &[&str]) -> Entity {
    let groups: Vec<_> = groups.iter().map(|g| json!({"GroupId": g})).collect();
    entity(
        ResourceKind::Instance,
        customer_id,
        json!({"InstanceId": id, "SecurityGroups": groups}),
    )
}

pub fn rds(customer_id: &str, id: &str) -> Entity {
    entity(
        ResourceKind::DbInstance,
        customer_id,
        json!({"DBInstanceIdentifier": id, "Engine": "postgres"}),
    )
}

pub fn load_balancer(customer_id: &str, name: &str, instances: &[&str]) -> Entity {
    let instances: Vec<_> = instances.iter().map(|i| json!({"InstanceId": i})).collect();
    entity(
        ResourceKind::LoadBalancer,
        customer_id,
        json!({"LoadBalancerName": name, "Instances": instances}),
    )
}

// =============================================================================
// Instance writes
// =============================================================================

pub async fn test_upsert_instance_creates<S: InventoryStore>(store: &S) {
    let customer = customer();
    store
        .put_entity(&ec2(&customer, "i-1", &[]))
        .await
        .expect("put should succeed");

    let record = store
        .get_instance(&customer, "i-1")
        .await
        .expect("get should succeed")
        .expect("instance should exist");

    assert_eq!(record.id, "i-1");
    assert_eq!(record.customer_id, customer);
    assert_eq!(record.instance_type, InstanceType::Ec2);
    let raw: serde_json::Value = serde_json::from_str(record.raw_data.get()).unwrap();
    assert_eq!(raw["InstanceId"], "i-1");
}

pub async fn test_upsert_instance_updates_in_place<S: InventoryStore>(store: &S) {
    let customer = customer();
    let first = entity(
        ResourceKind::Instance,
        &customer,
        json!({"InstanceId": "i-1", "InstanceType": "t2.micro"}),
    );
    let second = entity(
        ResourceKind::Instance,
        &customer,
        json!({"InstanceId": "i-1", "InstanceType": "m5.large"}),
    );

    store.put_entity(&first).await.expect("first put should succeed");
    let before = store
        .get_instance(&customer, "i-1")
        .await
        .unwrap()
        .expect("instance should exist");

    store.put_entity(&second).await.expect("second put should succeed");
    let after = store
        .get_instance(&customer, "i-1")
        .await
        .unwrap()
        .expect("instance should exist");

    let count = store
        .count_instances(&InstanceQuery::for_customer(&customer))
        .await
        .unwrap();
    assert_eq!(count, 1, "update must not duplicate the row");

    let raw: serde_json::Value = serde_json::from_str(after.raw_data.get()).unwrap();
    assert_eq!(raw["InstanceType"], "m5.large");
    assert_eq!(after.created_at, before.created_at);
    assert!(after.updated_at >= before.updated_at);
}

pub async fn test_upsert_instance_links_groups<S: InventoryStore>(store: &S) {
    let customer = customer();
    store
        .put_entity(&ec2(&customer, "i-1", &["sg-1", "sg-2"]))
        .await
        .expect("put should succeed");

    let groups = store
        .list_groups(&GroupQuery::for_customer(&customer))
        .await
        .unwrap();
    let names: Vec<_> = groups.iter().map(|g| g.name.as_str()).collect();
    assert_eq!(names, vec!["sg-1", "sg-2"]);
    assert!(groups.iter().all(|g| g.group_type == GroupType::Security));
    assert!(groups.iter().all(|g| g.instance_count == 1));

    let members = store
        .list_instances(&InstanceQuery::for_customer(&customer).in_group("sg-2"))
        .await
        .unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].id, "i-1");
}

pub async fn test_reference_does_not_overwrite<S: InventoryStore>(store: &S) {
    let customer = customer();
    let group = entity(
        ResourceKind::SecurityGroup,
        &customer,
        json!({"GroupId": "sg-1", "GroupName": "web", "Description": "frontend"}),
    );
    store.put_entity(&group).await.unwrap();
    store
        .put_entity(&ec2(&customer, "i-1", &["sg-1"]))
        .await
        .unwrap();

    let detail = store
        .get_group(&customer, "sg-1")
        .await
        .unwrap()
        .expect("group should exist");
    let raw: serde_json::Value = serde_json::from_str(detail.group.raw_data.get()).unwrap();
    assert_eq!(raw["Description"], "frontend");
    assert_eq!(detail.instance_count, 1);
}

// =============================================================================
// Links
// =============================================================================

pub async fn test_discovery_from_both_sides_converges<S: InventoryStore>(store: &S) {
    let customer = customer();
    store
        .put_entity(&load_balancer(&customer, "lb-1", &["i-1"]))
        .await
        .unwrap();
    store
        .put_entity(&ec2(&customer, "i-1", &["sg-1"]))
        .await
        .unwrap();
    store
        .put_entity(&load_balancer(&customer, "lb-1", &["i-1"]))
        .await
        .unwrap();

    let lb = store
        .get_group(&customer, "lb-1")
        .await
        .unwrap()
        .expect("load balancer should exist");
    assert_eq!(lb.group.group_type, GroupType::Elb);
    assert_eq!(lb.instance_count, 1);
    assert_eq!(lb.instances.len(), 1);

    let instance = store
        .get_instance(&customer, "i-1")
        .await
        .unwrap()
        .expect("instance should exist");
    let raw: serde_json::Value = serde_json::from_str(instance.raw_data.get()).unwrap();
    assert_eq!(
        raw["SecurityGroups"][0]["GroupId"], "sg-1",
        "full record replaces the stub"
    );
}

pub async fn test_duplicate_writes_are_idempotent<S: InventoryStore>(store: &S) {
    let customer = customer();
    let instance = ec2(&customer, "i-1", &["sg-1"]);
    for _ in 0..3 {
        store.put_entity(&instance).await.expect("put should succeed");
    }

    assert_eq!(
        store
            .count_instances(&InstanceQuery::for_customer(&customer))
            .await
            .unwrap(),
        1
    );
    assert_eq!(
        store
            .count_groups(&GroupQuery::for_customer(&customer))
            .await
            .unwrap(),
        1
    );
    assert_eq!(
        store
            .count_instances(&InstanceQuery::for_customer(&customer).in_group("sg-1"))
            .await
            .unwrap(),
        1
    );
}

// =============================================================================
// Reads
// =============================================================================

pub async fn test_list_instances_filters<S: InventoryStore>(store: &S) {
    let customer = customer();
    store
        .put_entity(&ec2(&customer, "i-1", &["sg-1"]))
        .await
        .unwrap();
    store
        .put_entity(&ec2(&customer, "i-2", &[]))
        .await
        .unwrap();
    let db = entity(
        ResourceKind::DbInstance,
        &customer,
        json!({"DBInstanceIdentifier": "db-1", "VpcSecurityGroups": [{"VpcSecurityGroupId": "sg-1"}]}),
    );
    store.put_entity(&db).await.unwrap();

    let all = store
        .list_instances(&InstanceQuery::for_customer(&customer))
        .await
        .unwrap();
    let ids: Vec<_> = all.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["db-1", "i-1", "i-2"]);

    let ec2_only = store
        .count_instances(&InstanceQuery::for_customer(&customer).with_type(InstanceType::Ec2))
        .await
        .unwrap();
    assert_eq!(ec2_only, 2);

    let in_group = store
        .list_instances(&InstanceQuery::for_customer(&customer).in_group("sg-1"))
        .await
        .unwrap();
    assert_eq!(in_group.len(), 2);

    let rds_in_group = store
        .list_instances(
            &InstanceQuery::for_customer(&customer)
                .in_group("sg-1")
                .with_type(InstanceType::Rds),
        )
        .await
        .unwrap();
    assert_eq!(rds_in_group.len(), 1);
    assert_eq!(rds_in_group[0].id, "db-1");
}

pub async fn test_list_groups_counts_and_filters<S: InventoryStore>(store: &S) {
    let customer = customer();
    store
        .put_entity(&load_balancer(&customer, "lb-1", &["i-1", "i-2"]))
        .await
        .unwrap();
    store
        .put_entity(&ec2(&customer, "i-1", &["sg-1"]))
        .await
        .unwrap();
    let empty = entity(
        ResourceKind::AutoScalingGroup,
        &customer,
        json!({"AutoScalingGroupName": "asg-1"}),
    );
    store.put_entity(&empty).await.unwrap();

    let groups = store
        .list_groups(&GroupQuery::for_customer(&customer))
        .await
        .unwrap();
    let counts: Vec<_> = groups
        .iter()
        .map(|g| (g.name.as_str(), g.instance_count))
        .collect();
    assert_eq!(counts, vec![("asg-1", 0), ("lb-1", 2), ("sg-1", 1)]);

    let elbs = store
        .list_groups(&GroupQuery::for_customer(&customer).with_type(GroupType::Elb))
        .await
        .unwrap();
    assert_eq!(elbs.len(), 1);
    assert_eq!(
        store
            .count_groups(&GroupQuery::for_customer(&customer).with_type(GroupType::Autoscaling))
            .await
            .unwrap(),
        1
    );
}

pub async fn test_get_missing<S: InventoryStore>(store: &S) {
    let customer = customer();
    assert!(store.get_instance(&customer, "i-none").await.unwrap().is_none());
    assert!(store.get_group(&customer, "sg-none").await.unwrap().is_none());
}

pub async fn test_customer_isolation<S: InventoryStore>(store: &S) {
    let a = customer();
    let b = customer();
    store.put_entity(&ec2(&a, "i-1", &["sg-1"])).await.unwrap();
    store.put_entity(&rds(&b, "i-1")).await.unwrap();

    let a_record = store.get_instance(&a, "i-1").await.unwrap().unwrap();
    let b_record = store.get_instance(&b, "i-1").await.unwrap().unwrap();
    assert_eq!(a_record.instance_type, InstanceType::Ec2);
    assert_eq!(b_record.instance_type, InstanceType::Rds);

    assert_eq!(
        store
            .count_groups(&GroupQuery::for_customer(&b))
            .await
            .unwrap(),
        0
    );
}

// =============================================================================
// Validation
// =============================================================================

pub async fn test_reads_require_customer<S: InventoryStore>(store: &S) {
    assert!(matches!(
        store.list_instances(&InstanceQuery::for_customer("")).await,
        Err(StorageError::MissingCustomerId)
    ));
    assert!(matches!(
        store.count_instances(&InstanceQuery::for_customer("")).await,
        Err(StorageError::MissingCustomerId)
    ));
    assert!(matches!(
        store.list_groups(&GroupQuery::for_customer("")).await,
        Err(StorageError::MissingCustomerId)
    ));
    assert!(matches!(
        store.count_groups(&GroupQuery::for_customer("")).await,
        Err(StorageError::MissingCustomerId)
    ));
    assert!(matches!(
        store.get_instance("", "i-1").await,
        Err(StorageError::MissingCustomerId)
    ));
    assert!(matches!(
        store.get_instance(&customer(), "").await,
        Err(StorageError::MissingInstanceId)
    ));
    assert!(matches!(
        store.get_group(&customer(), "").await,
        Err(StorageError::MissingGroupId)
    ));
}

pub async fn test_write_requires_customer<S: InventoryStore>(store: &S) {
    let orphan = ec2("", "i-1", &[]);
    assert!(matches!(
        store.put_entity(&orphan).await,
        Err(StorageError::MissingCustomerId)
    ));
}

pub async fn test_network_resources_not_persisted<S: InventoryStore>(store: &S) {
    let customer = customer();
    let route_table = entity(
        ResourceKind::RouteTable,
        &customer,
        json!({"RouteTableId": "rtb-1"}),
    );
    let subnet = entity(ResourceKind::Subnet, &customer, json!({"SubnetId": "subnet-1"}));

    store.put_entity(&route_table).await.expect("accepted");
    store.put_entity(&subnet).await.expect("accepted");

    assert_eq!(
        store
            .count_instances(&InstanceQuery::for_customer(&customer))
            .await
            .unwrap(),
        0
    );
    assert_eq!(
        store
            .count_groups(&GroupQuery::for_customer(&customer))
            .await
            .unwrap(),
        0
    );
}

// =============================================================================
// Bulk clear (run last: affects every customer)
// =============================================================================

pub async fn test_delete_all<S: InventoryStore>(store: &S) {
    let customer = customer();
    store
        .put_entity(&ec2(&customer, "i-1", &["sg-1"]))
        .await
        .unwrap();

    store.delete_all().await.expect("delete_all should succeed");

    assert_eq!(
        store
            .count_instances(&InstanceQuery::for_customer(&customer))
            .await
            .unwrap(),
        0
    );
    assert_eq!(
        store
            .count_groups(&GroupQuery::for_customer(&customer))
            .await
            .unwrap(),
        0
    );

    // Re-discovery after a clear starts from scratch.
    store
        .put_entity(&ec2(&customer, "i-1", &["sg-1"]))
        .await
        .unwrap();
    let groups = store
        .list_groups(&GroupQuery::for_customer(&customer))
        .await
        .unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].instance_count, 1);
}

/// Run all InventoryStore contract tests.
#[macro_export]
macro_rules! run_inventory_store_tests {
    ($store:expr) => {
        use $crate::storage::inventory_store_tests::*;

        // instance writes
        test_upsert_instance_creates($store).await;
        println!("  test_upsert_instance_creates: PASSED");

        test_upsert_instance_updates_in_place($store).await;
        println!("  test_upsert_instance_updates_in_place: PASSED");

        test_upsert_instance_links_groups($store).await;
        println!("  test_upsert_instance_links_groups: PASSED");

        test_reference_does_not_overwrite($store).await;
        println!("  test_reference_does_not_overwrite: PASSED");

        // links
        test_discovery_from_both_sides_converges($store).await;
        println!("  test_discovery_from_both_sides_converges: PASSED");

        test_duplicate_writes_are_idempotent($store).await;
        println!("  test_duplicate_writes_are_idempotent: PASSED");

        // reads
        test_list_instances_filters($store).await;
        println!("  test_list_instances_filters: PASSED");

        test_list_groups_counts_and_filters($store).await;
        println!("  test_list_groups_counts_and_filters: PASSED");

        test_get_missing($store).await;
        println!("  test_get_missing: PASSED");

        test_customer_isolation($store).await;
        println!("  test_customer_isolation: PASSED");

        // validation
        test_reads_require_customer($store).await;
        println!("  test_reads_require_customer: PASSED");

        test_write_requires_customer($store).await;
        println!("  test_write_requires_customer: PASSED");

        test_network_resources_not_persisted($store).await;
        println!("  test_network_resources_not_persisted: PASSED");

        // bulk clear
        test_delete_all($store).await;
        println!("  test_delete_all: PASSED");
    };
}
