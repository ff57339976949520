//! Shared storage integration tests.
//!
//! Tests the InventoryStore interface against all implementations.
//! Each implementation module imports these test functions and runs them.

pub mod inventory_store_tests;
