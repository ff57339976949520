//! In-memory channel-based message bus for standalone mode.
//!
//! Uses one tokio mpsc channel per (topic pattern, channel) subscription.
//! Ideal for local development and testing without external dependencies.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use super::{topic_matches, Acker, BusError, Delivery, MessageBus, Result, Subscription};

/// Channel capacity per subscription.
const CHANNEL_CAPACITY: usize = 1024;

/// Key of a subscription: (topic pattern, channel name).
type SubscriptionKey = (String, String);

/// In-memory message bus.
///
/// Each subscription gets its own copy of every matching message. Publishing
/// waits when a subscription buffer is full.
#[derive(Default)]
pub struct ChannelMessageBus {
    subscriptions: RwLock<HashMap<SubscriptionKey, mpsc::Sender<Delivery>>>,
}

impl ChannelMessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions.
    pub async fn subscription_count(&self) -> usize {
        self.subscriptions
            .read()
            .await
            .values()
            .filter(|sender| !sender.is_closed())
            .count()
    }
}

#[async_trait]
impl MessageBus for ChannelMessageBus {
    #[tracing::instrument(name = "bus.publish", skip_all, fields(topic = %topic))]
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let senders: Vec<_> = {
            let subscriptions = self.subscriptions.read().await;
            subscriptions
                .iter()
                .filter(|((pattern, _), sender)| {
                    !sender.is_closed() && topic_matches(topic, pattern)
                })
                .map(|((_, channel), sender)| (channel.clone(), sender.clone()))
                .collect()
        };

        if senders.is_empty() {
            // No receivers, that's okay for publish-only scenarios
            debug!("Published message (no subscribers)");
            return Ok(());
        }

        for (channel, sender) in &senders {
            let delivery = Delivery::new(topic.to_string(), payload.clone(), Acker::Local);
            if sender.send(delivery).await.is_err() {
                warn!(channel = %channel, "Subscriber went away during publish");
            }
        }

        debug!(receivers = senders.len(), "Published message to channels");
        Ok(())
    }

    async fn subscribe(&self, topic: &str, channel: &str) -> Result<Subscription> {
        let key = (topic.to_string(), channel.to_string());
        let mut subscriptions = self.subscriptions.write().await;

        if let Some(existing) = subscriptions.get(&key) {
            if !existing.is_closed() {
                return Err(BusError::Subscribe(format!(
                    "channel '{}' already subscribed to '{}'",
                    channel, topic
                )));
            }
        }

        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        subscriptions.insert(key, sender);

        info!(topic = %topic, channel = %channel, "Channel subscribed");
        Ok(Subscription::new(receiver))
    }
}

#[cfg(test)]
mod tests;
