//! Cloud account scanner boundary.
//!
//! The scanner itself lives outside this crate; the onboarder only consumes
//! the stream of discovery events it produces.

use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

/// Account credentials handed to a scanner.
///
/// Secrets are wiped in place by [`Credentials::clear`] and on drop.
#[derive(Clone, Default)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
}

impl Credentials {
    pub fn new(
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            region: region.into(),
        }
    }

    /// Zero the key material and leave both keys empty.
    pub fn clear(&mut self) {
        wipe(&mut self.access_key);
        wipe(&mut self.secret_key);
    }

    pub fn is_cleared(&self) -> bool {
        self.access_key.is_empty() && self.secret_key.is_empty()
    }
}

fn wipe(secret: &mut String) {
    let mut bytes = std::mem::take(secret).into_bytes();
    bytes.fill(0);
    std::hint::black_box(&bytes);
}

impl Drop for Credentials {
    fn drop(&mut self) {
        self.clear();
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &"<redacted>")
            .field("secret_key", &"<redacted>")
            .field("region", &self.region)
            .finish()
    }
}

/// A resource found by the scanner.
#[derive(Debug, Clone)]
pub struct DiscoveredResource {
    /// Wire tag of the resource kind, e.g. `LoadBalancerDescription`.
    pub kind: String,
    /// Provider JSON document.
    pub body: Vec<u8>,
}

impl DiscoveredResource {
    pub fn new(kind: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: kind.into(),
            body: body.into(),
        }
    }
}

/// A resource kind the scanner failed to list or describe.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ScanError {
    pub kind: String,
    pub message: String,
}

impl ScanError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

pub type ScanEvent = Result<DiscoveredResource, ScanError>;

/// Source of discovery events for one account.
#[async_trait]
pub trait Scanner: Send + Sync {
    /// Start scanning. The returned stream must not borrow the credentials:
    /// they are cleared as soon as this call returns.
    async fn scan(&self, credentials: &Credentials) -> BoxStream<'static, ScanEvent>;
}

/// Scanner that replays a fixed list of events once.
pub struct ReplayScanner {
    events: Mutex<Option<Vec<ScanEvent>>>,
}

impl ReplayScanner {
    pub fn new(events: Vec<ScanEvent>) -> Self {
        Self {
            events: Mutex::new(Some(events)),
        }
    }
}

#[async_trait]
impl Scanner for ReplayScanner {
    async fn scan(&self, _credentials: &Credentials) -> BoxStream<'static, ScanEvent> {
        let events = match self.events.lock() {
            Ok(mut events) => events.take().unwrap_or_default(),
            Err(poisoned) => poisoned.into_inner().take().unwrap_or_default(),
        };
        stream::iter(events).boxed()
    }
}
