//! fieri - cloud inventory ingestion
//!
//! Normalizes cloud scanner events into two canonical entities, instances
//! and groups, and persists them with their many-to-many links so they can
//! be queried per customer.
//!
//! - [`normalize`]: scanner payload kinds to canonical entities
//! - [`storage`]: idempotent inventory store (SQLite, PostgreSQL, in-memory)
//! - [`consumer`]: bus subscriber feeding the store
//! - [`onboard`]: scan supervision, counting and outcome notification

pub mod bus;
pub mod config;
pub mod consumer;
pub mod model;
pub mod normalize;
pub mod onboard;
pub mod storage;
pub mod utils;
