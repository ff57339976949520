//! fieri: scanner event ingestion service
//!
//! Subscribes to the discovery topic, normalizes every scanner envelope and
//! writes the resulting instances, groups and links to the inventory store.
//!
//! ## Architecture
//! ```text
//! [scanner] -> [bus: discovery topic] -> [fieri consumer] -> [inventory store]
//! ```
//!
//! ## Configuration
//! ```yaml
//! storage:
//!   type: postgres
//!   postgres:
//!     uri: postgres://fieri@localhost/fieri
//! messaging:
//!   type: amqp
//!   amqp:
//!     url: amqp://localhost:5672
//! consumer:
//!   topic: discovery
//!   concurrency: 4
//! ```
//!
//! The configuration file may be passed as the first argument. Every key can
//! be overridden with `FIERI__SECTION__KEY` environment variables.

use tracing::{error, info};

use fieri::bus::init_bus;
use fieri::config::{Config, MessagingType, StorageType};
use fieri::consumer::Consumer;
use fieri::storage::init_storage;
use fieri::utils::bootstrap::{connect_with_retry, init_tracing};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!("Starting fieri");

    let store = match config.storage.storage_type {
        StorageType::Postgres => {
            connect_with_retry("storage", || init_storage(&config.storage)).await?
        }
        _ => init_storage(&config.storage).await?,
    };

    let bus = match config.messaging.messaging_type {
        MessagingType::Amqp => {
            connect_with_retry("messaging", || init_bus(&config.messaging)).await?
        }
        MessagingType::Channel => init_bus(&config.messaging).await?,
    };

    let consumer = Consumer::start(bus.as_ref(), store, &config.consumer).await?;

    info!("fieri running, press Ctrl+C to exit");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    if let Err(e) = consumer.stop().await {
        error!(error = %e, "Consumer did not stop cleanly");
    }

    Ok(())
}
