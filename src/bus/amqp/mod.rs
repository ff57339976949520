//! AMQP (RabbitMQ) message bus implementation.
//!
//! Every topic is a routing key on one durable topic exchange. A channel is a
//! durable queue bound to the topic, so every channel receives its own copy
//! and consumers of one channel compete for deliveries.

use async_trait::async_trait;
use deadpool_lapin::{Manager, Pool, PoolError};
use futures::StreamExt;
use lapin::{
    options::{
        BasicConsumeOptions, BasicPublishOptions, BasicQosOptions, BasicRejectOptions,
        ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, ExchangeKind,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{Acker, BusError, Delivery, MessageBus, Result, Subscription};
use crate::config::AmqpConfig;

/// Buffered deliveries per subscription on the client side.
const FORWARD_CAPACITY: usize = 256;

/// AMQP message bus using RabbitMQ.
pub struct AmqpMessageBus {
    pool: Pool,
    config: AmqpConfig,
}

impl AmqpMessageBus {
    /// Connect and declare the exchange.
    pub async fn new(config: AmqpConfig) -> Result<Self> {
        let manager = Manager::new(config.url.clone(), Default::default());
        let pool = Pool::builder(manager)
            .max_size(10)
            .build()
            .map_err(|e| BusError::Connection(format!("Failed to create pool: {}", e)))?;

        let bus = Self { pool, config };
        let channel = bus.get_channel().await?;

        channel
            .exchange_declare(
                &bus.config.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Connection(format!("Failed to declare exchange: {}", e)))?;

        info!(
            exchange = %bus.config.exchange,
            url = %bus.config.url,
            "Connected to AMQP"
        );

        Ok(bus)
    }

    /// Get a channel from the pool.
    async fn get_channel(&self) -> Result<Channel> {
        let conn = self.pool.get().await.map_err(|e: PoolError| {
            BusError::Connection(format!("Failed to get connection from pool: {}", e))
        })?;

        conn.create_channel()
            .await
            .map_err(|e| BusError::Connection(format!("Failed to create channel: {}", e)))
    }
}

/// Binding keys for a topic pattern: the topic itself and its subtopics.
fn binding_keys(pattern: &str) -> Vec<String> {
    if pattern == "#" {
        vec!["#".to_string()]
    } else {
        vec![pattern.to_string(), format!("{}.#", pattern)]
    }
}

fn queue_name(topic: &str, channel: &str) -> String {
    format!("{}.{}", channel, topic)
}

#[async_trait]
impl MessageBus for AmqpMessageBus {
    #[tracing::instrument(name = "bus.publish", skip_all, fields(topic = %topic))]
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let channel = self.get_channel().await?;

        channel
            .basic_publish(
                &self.config.exchange,
                topic,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default()
                    .with_content_type("application/json".into())
                    .with_delivery_mode(2), // persistent
            )
            .await
            .map_err(|e| BusError::Publish(format!("Failed to publish: {}", e)))?
            .await
            .map_err(|e| BusError::Publish(format!("Publish confirmation failed: {}", e)))?;

        debug!(exchange = %self.config.exchange, "Published message");
        Ok(())
    }

    async fn subscribe(&self, topic: &str, channel_name: &str) -> Result<Subscription> {
        let queue = queue_name(topic, channel_name);
        let channel = self.get_channel().await?;

        channel
            .basic_qos(self.config.prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| BusError::Subscribe(format!("Failed to set prefetch: {}", e)))?;

        channel
            .queue_declare(
                &queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Subscribe(format!("Failed to declare queue: {}", e)))?;

        for key in binding_keys(topic) {
            channel
                .queue_bind(
                    &queue,
                    &self.config.exchange,
                    &key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| BusError::Subscribe(format!("Failed to bind queue: {}", e)))?;
        }

        let mut consumer = channel
            .basic_consume(
                &queue,
                &format!("fieri-{}", channel_name),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Subscribe(format!("Failed to start consumer: {}", e)))?;

        info!(queue = %queue, topic = %topic, "Bound queue to exchange");

        let (sender, receiver) = mpsc::channel(FORWARD_CAPACITY);

        // Forward broker deliveries until the subscription is dropped.
        tokio::spawn(async move {
            while let Some(delivery) = consumer.next().await {
                match delivery {
                    Ok(delivery) => {
                        let topic = delivery.routing_key.as_str().to_string();
                        let forwarded =
                            Delivery::new(topic, delivery.data, Acker::Amqp(delivery.acker));
                        if let Err(mpsc::error::SendError(unsent)) = sender.send(forwarded).await
                        {
                            warn!("Subscription dropped, requeueing delivery");
                            if let Acker::Amqp(acker) = unsent.acker {
                                if let Err(e) = acker
                                    .reject(BasicRejectOptions { requeue: true })
                                    .await
                                {
                                    warn!(error = %e, "Failed to requeue delivery");
                                }
                            }
                            break;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Consumer error");
                    }
                }
            }
            // Keep the channel open for the lifetime of the consumer.
            drop(channel);
        });

        Ok(Subscription::new(receiver))
    }
}
