//! Shared helpers for binaries and retrying clients.

pub mod bootstrap;
pub mod retry;
