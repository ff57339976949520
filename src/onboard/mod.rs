//! Account onboarding: run a scan, ingest what it finds, report the outcome.
//!
//! `Onboarder::onboard` validates the request and returns a request id at
//! once; the scan runs as its own task through
//! `Created -> Running -> {Succeeded, Failed}`.

pub mod notifier;
pub mod scanner;
pub mod summary;

use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::bus::MessageBus;
use crate::config::OnboardConfig;
use crate::normalize::{self, NormalizeError, ResourceKind};
use crate::storage::{InventoryStore, StorageError};

pub use notifier::{
    ErrorReporter, HttpNotifier, LogErrorReporter, Notifier, NotifierError,
    EMAIL_FAILURE_TEMPLATE, EMAIL_SUCCESS_TEMPLATE,
};
pub use scanner::{Credentials, DiscoveredResource, ReplayScanner, ScanError, ScanEvent, Scanner};
pub use summary::{ScanState, ScanSummary, INSTANCE_ERROR_THRESHOLD};

/// Event type of the progress message that closes a scan.
pub const DONE_EVENT: &str = "Done";

/// Result type for onboarding requests.
pub type Result<T> = std::result::Result<T, OnboardError>;

/// Request validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OnboardError {
    #[error("must provide customer id")]
    MissingCustomerId,

    #[error("must provide access key")]
    MissingAccessKey,

    #[error("must provide secret key")]
    MissingSecretKey,

    #[error("must provide region")]
    MissingRegion,

    #[error("must provide user id")]
    MissingUserId,
}

/// Something that went wrong during a scan, as seen by the error reporter.
#[derive(Debug, thiserror::Error)]
pub enum ScanIssue {
    #[error("scan error: {0}")]
    Scan(#[from] ScanError),

    #[error("normalize error: {0}")]
    Normalize(#[from] NormalizeError),

    #[error("{kind}: storage error: {source}")]
    Storage {
        kind: ResourceKind,
        #[source]
        source: StorageError,
    },

    #[error("too many errors: {instance_errors} instance errors, {group_errors} group errors")]
    TooManyErrors {
        instance_errors: u64,
        group_errors: u64,
    },
}

/// A request to scan one customer account.
#[derive(Clone, Default, Deserialize)]
pub struct OnboardRequest {
    pub customer_id: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    pub user_id: String,
}

impl OnboardRequest {
    pub fn validate(&self) -> Result<()> {
        if self.customer_id.is_empty() {
            return Err(OnboardError::MissingCustomerId);
        }
        if self.access_key.is_empty() {
            return Err(OnboardError::MissingAccessKey);
        }
        if self.secret_key.is_empty() {
            return Err(OnboardError::MissingSecretKey);
        }
        if self.region.is_empty() {
            return Err(OnboardError::MissingRegion);
        }
        if self.user_id.is_empty() {
            return Err(OnboardError::MissingUserId);
        }
        Ok(())
    }

    /// Move the credentials out, leaving the request without secrets.
    fn take_credentials(&mut self) -> Credentials {
        Credentials::new(
            std::mem::take(&mut self.access_key),
            std::mem::take(&mut self.secret_key),
            self.region.clone(),
        )
    }
}

impl std::fmt::Debug for OnboardRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnboardRequest")
            .field("customer_id", &self.customer_id)
            .field("region", &self.region)
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnboardResponse {
    pub request_id: String,
}

/// Progress message published for every processed scan event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub request_id: String,
    pub customer_id: String,
    /// Stored entity type, or `Done` for the closing event. Empty on error.
    pub event_type: String,
    pub error: String,
}

/// Final state and counts of a scan.
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub state: ScanState,
    pub summary: ScanSummary,
}

/// Handle to a running scan.
pub struct ScanHandle {
    pub request_id: String,
    task: JoinHandle<ScanReport>,
}

impl ScanHandle {
    /// Wait for the scan to finish. `None` if the task panicked.
    pub async fn wait(self) -> Option<ScanReport> {
        self.task.await.ok()
    }
}

/// Starts scans and ingests their results.
#[derive(Clone)]
pub struct Onboarder {
    store: Arc<dyn InventoryStore>,
    scanner: Arc<dyn Scanner>,
    notifier: Arc<dyn Notifier>,
    reporter: Arc<dyn ErrorReporter>,
    progress: Option<(Arc<dyn MessageBus>, String)>,
}

impl Onboarder {
    pub fn new(
        store: Arc<dyn InventoryStore>,
        scanner: Arc<dyn Scanner>,
        notifier: Arc<dyn Notifier>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            store,
            scanner,
            notifier,
            reporter,
            progress: None,
        }
    }

    /// Build an onboarder notifying over HTTP and reporting errors to the log.
    ///
    /// With a bus, progress events go to `{customer_id}.{progress_topic}`.
    pub fn from_config(
        config: &OnboardConfig,
        store: Arc<dyn InventoryStore>,
        scanner: Arc<dyn Scanner>,
        bus: Option<Arc<dyn MessageBus>>,
    ) -> std::result::Result<Self, NotifierError> {
        let notifier = HttpNotifier::new(config)?;
        let onboarder = Self::new(store, scanner, Arc::new(notifier), Arc::new(LogErrorReporter));
        Ok(match bus {
            Some(bus) => onboarder.with_progress(bus, config.progress_topic.clone()),
            None => onboarder,
        })
    }

    /// Publish progress events to `{customer_id}.{topic}`.
    pub fn with_progress(mut self, bus: Arc<dyn MessageBus>, topic: impl Into<String>) -> Self {
        self.progress = Some((bus, topic.into()));
        self
    }

    /// Validate the request and start its scan in the background.
    pub fn onboard(&self, request: OnboardRequest) -> Result<OnboardResponse> {
        let handle = self.start(request)?;
        Ok(OnboardResponse {
            request_id: handle.request_id,
        })
    }

    /// Like [`Onboarder::onboard`], keeping a handle on the scan task.
    pub fn start(&self, request: OnboardRequest) -> Result<ScanHandle> {
        request.validate()?;

        let request_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!(
            "onboard.scan",
            request_id = %request_id,
            customer_id = %request.customer_id
        );
        let task = tokio::spawn(self.clone().run_scan(request_id.clone(), request).instrument(span));

        info!(request_id = %request_id, state = ?ScanState::Created, "Scan requested");
        Ok(ScanHandle { request_id, task })
    }

    async fn run_scan(self, request_id: String, mut request: OnboardRequest) -> ScanReport {
        let mut summary = ScanSummary::new(
            &request_id,
            &request.customer_id,
            &request.user_id,
            &request.region,
        );

        let mut credentials = request.take_credentials();
        let mut events = begin_scan(self.scanner.as_ref(), &mut credentials).await;
        drop(credentials);
        debug!(state = ?ScanState::Running, "Scan running");

        while let Some(event) = events.next().await {
            let progress = match self.process_event(event, &mut summary).await {
                Ok(event_type) => self.progress_event(&summary, event_type, String::new()),
                Err(issue) => {
                    self.reporter.report(&summary, &issue);
                    self.progress_event(&summary, String::new(), issue.to_string())
                }
            };
            self.publish_progress(&progress).await;
        }

        let done = self.progress_event(&summary, DONE_EVENT.to_string(), String::new());
        self.publish_progress(&done).await;

        let state = summary.outcome();
        match state {
            ScanState::Failed => {
                let issue = ScanIssue::TooManyErrors {
                    instance_errors: summary.instance_error_count,
                    group_errors: summary.group_error_count,
                };
                self.reporter.report(&summary, &issue);
                if let Err(e) = self.notifier.notify_error(&summary).await {
                    warn!(error = %e, "Failure notification failed");
                }
            }
            _ => {
                if let Err(e) = self.notifier.notify_success(&summary).await {
                    warn!(error = %e, "Success notification failed");
                }
            }
        }

        info!(
            state = ?state,
            instances = summary.instance_count,
            db_instances = summary.db_instance_count,
            instance_errors = summary.instance_error_count,
            group_errors = summary.group_error_count,
            "Scan finished"
        );
        ScanReport { state, summary }
    }

    /// Normalize, store and count one event. Returns the stored entity type.
    async fn process_event(
        &self,
        event: ScanEvent,
        summary: &mut ScanSummary,
    ) -> std::result::Result<String, ScanIssue> {
        let resource = match event {
            Ok(resource) => resource,
            Err(e) => {
                summary.record_error(ResourceKind::from_tag(&e.kind), e.to_string());
                return Err(ScanIssue::Scan(e));
            }
        };

        let Some(kind) = ResourceKind::from_tag(&resource.kind) else {
            debug!(resource_type = %resource.kind, "Skipping unknown resource type");
            return Ok(String::new());
        };

        let entity = match normalize::normalize(kind, &summary.customer_id, &resource.body) {
            Ok(entity) => entity,
            Err(e) => {
                summary.record_error(Some(kind), e.to_string());
                return Err(ScanIssue::Normalize(e));
            }
        };

        if let Err(source) = self.store.put_entity(&entity).await {
            summary.record_error(Some(kind), source.to_string());
            return Err(ScanIssue::Storage { kind, source });
        }

        summary.record_entity(kind, &entity);
        debug!(resource_kind = %kind, key = entity.key(), "Stored scanned resource");
        Ok(entity.type_name().to_string())
    }

    fn progress_event(&self, summary: &ScanSummary, event_type: String, error: String) -> ProgressEvent {
        ProgressEvent {
            request_id: summary.request_id.clone(),
            customer_id: summary.customer_id.clone(),
            event_type,
            error,
        }
    }

    async fn publish_progress(&self, event: &ProgressEvent) {
        let Some((bus, topic)) = &self.progress else {
            return;
        };

        let topic = format!("{}.{}", event.customer_id, topic);
        let payload = match serde_json::to_vec(event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to encode progress event");
                return;
            }
        };

        if let Err(e) = bus.publish(&topic, payload).await {
            warn!(topic = %topic, error = %e, "Failed to publish progress event");
        }
    }
}

/// Start the scanner and wipe the credentials before anything is reported.
pub(crate) async fn begin_scan(
    scanner: &dyn Scanner,
    credentials: &mut Credentials,
) -> futures::stream::BoxStream<'static, ScanEvent> {
    let events = scanner.scan(credentials).await;
    credentials.clear();
    events
}
