use super::*;

#[tokio::test]
async fn test_channel_publish_no_receivers() {
    let bus = ChannelMessageBus::new();

    // Should not error even with no receivers
    let result = bus.publish("discovery", b"{}".to_vec()).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_channel_subscribe_and_receive() {
    let bus = ChannelMessageBus::new();
    let mut sub = bus.subscribe("discovery", "fieri").await.unwrap();

    bus.publish("discovery", b"hello".to_vec()).await.unwrap();

    let delivery = sub.next().await.unwrap();
    assert_eq!(delivery.topic(), "discovery");
    assert_eq!(delivery.payload(), b"hello");
    delivery.ack().await.unwrap();
}

#[tokio::test]
async fn test_each_channel_gets_a_copy() {
    let bus = ChannelMessageBus::new();
    let mut a = bus.subscribe("discovery", "fieri").await.unwrap();
    let mut b = bus.subscribe("discovery", "audit").await.unwrap();

    bus.publish("discovery", b"x".to_vec()).await.unwrap();

    assert_eq!(a.next().await.unwrap().payload(), b"x");
    assert_eq!(b.next().await.unwrap().payload(), b"x");
}

#[tokio::test]
async fn test_topic_filter() {
    let bus = ChannelMessageBus::new();
    let mut sub = bus.subscribe("cust-1", "progress").await.unwrap();

    bus.publish("cust-2.discovery", b"other".to_vec()).await.unwrap();
    bus.publish("cust-1.discovery", b"mine".to_vec()).await.unwrap();

    let delivery = sub.next().await.unwrap();
    assert_eq!(delivery.topic(), "cust-1.discovery");
    assert_eq!(delivery.payload(), b"mine");
}

#[tokio::test]
async fn test_duplicate_subscription_rejected() {
    let bus = ChannelMessageBus::new();
    let _sub = bus.subscribe("discovery", "fieri").await.unwrap();

    let result = bus.subscribe("discovery", "fieri").await;
    assert!(matches!(result, Err(BusError::Subscribe(_))));
}

#[tokio::test]
async fn test_resubscribe_after_drop() {
    let bus = ChannelMessageBus::new();
    let sub = bus.subscribe("discovery", "fieri").await.unwrap();
    drop(sub);

    assert_eq!(bus.subscription_count().await, 0);
    let mut sub = bus.subscribe("discovery", "fieri").await.unwrap();

    bus.publish("discovery", b"again".to_vec()).await.unwrap();
    assert_eq!(sub.next().await.unwrap().payload(), b"again");
}

#[tokio::test]
async fn test_closed_subscription_drains_buffer() {
    let bus = ChannelMessageBus::new();
    let mut sub = bus.subscribe("discovery", "fieri").await.unwrap();

    bus.publish("discovery", b"1".to_vec()).await.unwrap();
    sub.close();
    bus.publish("discovery", b"2".to_vec()).await.unwrap();

    assert_eq!(sub.next().await.unwrap().payload(), b"1");
    assert!(sub.next().await.is_none());
}
