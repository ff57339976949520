//! Message bus for scanner envelopes and scan progress events.
//!
//! This module contains:
//! - `MessageBus` trait: topic publish and per-channel subscriptions
//! - `Subscription` / `Delivery`: pull-based consumption with explicit ack
//! - Implementations: in-process channels, AMQP (RabbitMQ)
//!
//! Every channel subscribed to a topic receives its own copy of each message;
//! consumers sharing a `Subscription` compete for deliveries.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info};

use crate::config::{MessagingConfig, MessagingType};

#[cfg(feature = "amqp")]
pub mod amqp;
pub mod channel;

#[cfg(feature = "amqp")]
pub use amqp::AmqpMessageBus;
pub use channel::ChannelMessageBus;

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Ack failed: {0}")]
    Ack(String),

    #[error("Bus type {0:?} not enabled in this build")]
    NotEnabled(MessagingType),
}

/// How a delivery is settled with its broker.
pub(crate) enum Acker {
    /// In-process deliveries need no settlement.
    Local,
    #[cfg(feature = "amqp")]
    Amqp(lapin::acker::Acker),
}

/// A message received from a subscription.
pub struct Delivery {
    topic: String,
    payload: Vec<u8>,
    acker: Acker,
}

impl Delivery {
    pub(crate) fn new(topic: String, payload: Vec<u8>, acker: Acker) -> Self {
        Self {
            topic,
            payload,
            acker,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Acknowledge the message; it will not be redelivered.
    pub async fn ack(self) -> Result<()> {
        match self.acker {
            Acker::Local => Ok(()),
            #[cfg(feature = "amqp")]
            Acker::Amqp(acker) => acker
                .ack(lapin::options::BasicAckOptions::default())
                .await
                .map_err(|e| BusError::Ack(e.to_string())),
        }
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("topic", &self.topic)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Stream of deliveries for one (topic, channel) pair.
pub struct Subscription {
    receiver: mpsc::Receiver<Delivery>,
}

impl Subscription {
    pub(crate) fn new(receiver: mpsc::Receiver<Delivery>) -> Self {
        Self { receiver }
    }

    /// Next delivery, or `None` once the bus side has closed.
    pub async fn next(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }

    /// Stop accepting new deliveries; buffered ones can still be drained.
    pub fn close(&mut self) {
        self.receiver.close();
    }

    pub fn into_stream(self) -> ReceiverStream<Delivery> {
        ReceiverStream::new(self.receiver)
    }
}

/// Interface for message delivery.
///
/// Implementations:
/// - `ChannelMessageBus`: in-process tokio channels
/// - `AmqpMessageBus`: RabbitMQ topic exchange
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a payload to a topic. Publishing with no subscribers succeeds.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    /// Subscribe a named channel to a topic pattern.
    async fn subscribe(&self, topic: &str, channel: &str) -> Result<Subscription>;
}

/// Check if a topic matches a subscription pattern.
///
/// Matching rules:
/// - "#" matches all topics
/// - Exact match: "discovery" matches "discovery"
/// - Hierarchical: "cust-1" matches "cust-1.discovery" (prefix with dot separator)
pub fn topic_matches(topic: &str, pattern: &str) -> bool {
    if pattern == "#" {
        return true;
    }
    if topic == pattern {
        return true;
    }
    topic.starts_with(pattern) && topic[pattern.len()..].starts_with('.')
}

/// Initialize the message bus based on configuration.
pub async fn init_bus(config: &MessagingConfig) -> Result<Arc<dyn MessageBus>> {
    match config.messaging_type {
        MessagingType::Channel => {
            info!("Messaging: in-process channels");
            Ok(Arc::new(ChannelMessageBus::new()))
        }
        #[cfg(feature = "amqp")]
        MessagingType::Amqp => {
            let bus = AmqpMessageBus::new(config.amqp.clone()).await?;
            Ok(Arc::new(bus))
        }
        #[allow(unreachable_patterns)]
        other => {
            error!(messaging_type = ?other, "Messaging type requested but its feature is not enabled");
            Err(BusError::NotEnabled(other))
        }
    }
}
