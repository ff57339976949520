//! Consumer and onboarding configuration types.

use std::time::Duration;

use serde::Deserialize;

/// Event consumer configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Topic carrying scanner envelopes.
    pub topic: String,
    /// Channel (queue) name shared by all consumer instances.
    pub channel: String,
    /// Number of concurrent handlers.
    pub concurrency: usize,
    /// Time allowed for in-flight handlers on stop.
    pub shutdown_grace_secs: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            topic: "discovery".to_string(),
            channel: "fieri".to_string(),
            concurrency: 1,
            shutdown_grace_secs: 5,
        }
    }
}

impl ConsumerConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Onboarding and scan notification configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OnboardConfig {
    /// Progress topic suffix; events go to `{customer_id}.{progress_topic}`.
    pub progress_topic: String,
    /// Email service endpoint. Empty disables email notifications.
    pub email_endpoint: String,
    /// Chat webhook URL. Empty disables chat notifications.
    pub chat_endpoint: String,
    /// Request timeout for notification calls.
    pub notify_timeout_secs: u64,
}

impl Default for OnboardConfig {
    fn default() -> Self {
        Self {
            progress_topic: "discovery".to_string(),
            email_endpoint: String::new(),
            chat_endpoint: String::new(),
            notify_timeout_secs: 30,
        }
    }
}
