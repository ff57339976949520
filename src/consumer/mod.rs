//! Scanner event consumer.
//!
//! Pulls envelopes from one bus subscription with a fixed pool of workers,
//! normalizes each payload and writes it through [`InventoryStore::put_entity`].
//! Every delivery is acknowledged once handled, whatever the outcome: a bad
//! message or a failed write is logged and dropped so the stream keeps moving.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bus::{BusError, Delivery, MessageBus, Subscription};
use crate::config::ConsumerConfig;
use crate::normalize::{self, ResourceKind};
use crate::storage::InventoryStore;

/// Result type for consumer lifecycle operations.
pub type Result<T> = std::result::Result<T, ConsumerError>;

#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("timed out waiting for consumer shutdown after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Inbound message: one scanner resource for one customer.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub customer_id: String,
    /// Wire tag of the resource kind, e.g. `Instance`.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Resource body: a JSON document encoded as a string, or inline.
    pub event: Box<RawValue>,
}

impl Envelope {
    pub fn decode(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }

    /// Resource body bytes, unwrapping a string-encoded document.
    pub fn body(&self) -> serde_json::Result<Cow<'_, [u8]>> {
        let raw = self.event.get();
        if raw.trim_start().starts_with('"') {
            let text: String = serde_json::from_str(raw)?;
            Ok(Cow::Owned(text.into_bytes()))
        } else {
            Ok(Cow::Borrowed(raw.as_bytes()))
        }
    }
}

/// What happened to one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Normalized and written.
    Stored(ResourceKind),
    /// Unrecognized resource type.
    Ignored,
    /// Envelope or body could not be decoded.
    Malformed,
    /// Payload failed normalization.
    Rejected(ResourceKind),
    /// The store returned an error; the message is dropped.
    StoreFailed(ResourceKind),
}

/// Handle one raw message. Never fails: every problem is logged and reported
/// through the outcome.
pub async fn handle_message(store: &dyn InventoryStore, payload: &[u8]) -> HandleOutcome {
    let envelope = match Envelope::decode(payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "Dropping malformed envelope");
            return HandleOutcome::Malformed;
        }
    };

    let Some(kind) = ResourceKind::from_tag(&envelope.resource_type) else {
        debug!(
            customer_id = %envelope.customer_id,
            resource_type = %envelope.resource_type,
            "Ignoring unknown resource type"
        );
        return HandleOutcome::Ignored;
    };

    let body = match envelope.body() {
        Ok(body) => body,
        Err(e) => {
            warn!(
                customer_id = %envelope.customer_id,
                resource_kind = %kind,
                error = %e,
                "Dropping envelope with undecodable event"
            );
            return HandleOutcome::Malformed;
        }
    };

    let entity = match normalize::normalize(kind, &envelope.customer_id, &body) {
        Ok(entity) => entity,
        Err(e) => {
            warn!(
                customer_id = %envelope.customer_id,
                resource_kind = %kind,
                error = %e,
                "Dropping resource that failed normalization"
            );
            return HandleOutcome::Rejected(kind);
        }
    };

    match store.put_entity(&entity).await {
        Ok(()) => {
            debug!(
                customer_id = %envelope.customer_id,
                resource_kind = %kind,
                key = entity.key(),
                "Stored entity"
            );
            HandleOutcome::Stored(kind)
        }
        Err(e) => {
            error!(
                customer_id = %envelope.customer_id,
                resource_kind = %kind,
                key = entity.key(),
                error = %e,
                "Failed to store entity, dropping message"
            );
            HandleOutcome::StoreFailed(kind)
        }
    }
}

/// Running consumer: a fixed pool of workers sharing one subscription.
pub struct Consumer {
    stop: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
    grace: Duration,
}

impl Consumer {
    /// Subscribe to the configured topic and start the workers.
    pub async fn start(
        bus: &dyn MessageBus,
        store: Arc<dyn InventoryStore>,
        config: &ConsumerConfig,
    ) -> Result<Self> {
        let subscription = bus.subscribe(&config.topic, &config.channel).await?;
        info!(
            topic = %config.topic,
            channel = %config.channel,
            concurrency = config.concurrency,
            "Consumer subscribed"
        );
        Ok(Self::spawn(
            subscription,
            store,
            config.concurrency,
            config.shutdown_grace(),
        ))
    }

    /// Start workers over an existing subscription. A concurrency of zero
    /// still starts one worker.
    pub fn spawn(
        subscription: Subscription,
        store: Arc<dyn InventoryStore>,
        concurrency: usize,
        grace: Duration,
    ) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let subscription = Arc::new(Mutex::new(subscription));

        let workers = (0..concurrency.max(1))
            .map(|worker| {
                tokio::spawn(run_worker(
                    worker,
                    subscription.clone(),
                    store.clone(),
                    stop_rx.clone(),
                ))
            })
            .collect();

        Self {
            stop,
            workers,
            grace,
        }
    }

    /// Stop accepting messages and wait for in-flight handlers.
    ///
    /// Workers still running after the grace period are aborted and
    /// `ShutdownTimeout` is returned.
    pub async fn stop(self) -> Result<()> {
        let _ = self.stop.send(true);

        let aborts: Vec<_> = self.workers.iter().map(|w| w.abort_handle()).collect();
        match tokio::time::timeout(self.grace, futures::future::join_all(self.workers)).await {
            Ok(_) => {
                info!("Consumer stopped");
                Ok(())
            }
            Err(_) => {
                for abort in aborts {
                    abort.abort();
                }
                warn!(grace = ?self.grace, "Consumer workers did not finish in time");
                Err(ConsumerError::ShutdownTimeout(self.grace))
            }
        }
    }
}

async fn next_delivery(subscription: &Mutex<Subscription>) -> Option<Delivery> {
    subscription.lock().await.next().await
}

async fn run_worker(
    worker: usize,
    subscription: Arc<Mutex<Subscription>>,
    store: Arc<dyn InventoryStore>,
    mut stop: watch::Receiver<bool>,
) {
    debug!(worker, "Consumer worker started");

    loop {
        if *stop.borrow() {
            break;
        }

        let delivery = tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
                continue;
            }
            delivery = next_delivery(&subscription) => delivery,
        };

        let Some(delivery) = delivery else {
            debug!(worker, "Subscription closed");
            break;
        };

        handle_message(store.as_ref(), delivery.payload()).await;

        if let Err(e) = delivery.ack().await {
            warn!(worker, error = %e, "Failed to acknowledge message");
        }
    }

    debug!(worker, "Consumer worker stopped");
}
