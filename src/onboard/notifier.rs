//! Scan outcome notification and error reporting.
//!
//! - `Notifier`: success and failure notifications for a finished scan
//! - `HttpNotifier`: email service plus chat webhook over HTTP, with retry
//! - `ErrorReporter` / `LogErrorReporter`: per-error reporting

use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, error, warn};

use super::summary::ScanSummary;
use super::ScanIssue;
use crate::config::OnboardConfig;
use crate::utils::retry::{is_retryable_status, notify_backoff};

/// Email template for a completed scan.
pub const EMAIL_SUCCESS_TEMPLATE: &str = "discovery-completion";
/// Email template for a failed scan.
pub const EMAIL_FAILURE_TEMPLATE: &str = "discovery-failure";

#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Bad response from {endpoint}: {status}")]
    Status {
        endpoint: String,
        status: reqwest::StatusCode,
    },

    #[error("Notification rejected by {0}")]
    Rejected(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl NotifierError {
    fn is_retryable(&self) -> bool {
        match self {
            NotifierError::Http(e) => e.is_timeout() || e.is_connect(),
            NotifierError::Status { status, .. } => is_retryable_status(*status),
            NotifierError::Rejected(_) | NotifierError::Serialization(_) => false,
        }
    }
}

/// Delivers the final outcome of a scan.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_success(&self, summary: &ScanSummary) -> Result<(), NotifierError>;

    async fn notify_error(&self, summary: &ScanSummary) -> Result<(), NotifierError>;
}

/// Receives every error observed during a scan.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, summary: &ScanSummary, issue: &ScanIssue);
}

/// Reports errors through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogErrorReporter;

impl ErrorReporter for LogErrorReporter {
    fn report(&self, summary: &ScanSummary, issue: &ScanIssue) {
        error!(
            request_id = %summary.request_id,
            customer_id = %summary.customer_id,
            error = %issue,
            "Scan error"
        );
    }
}

#[derive(Serialize)]
struct EmailRequest<'a> {
    user_id: &'a str,
    template: &'a str,
    vars: &'a ScanSummary,
}

/// Notifies the requesting user by email and the team over a chat webhook.
///
/// An empty endpoint disables that channel.
pub struct HttpNotifier {
    client: Client,
    email_endpoint: String,
    chat_endpoint: String,
    backoff: ExponentialBuilder,
}

impl HttpNotifier {
    pub fn new(config: &OnboardConfig) -> Result<Self, NotifierError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.notify_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            email_endpoint: config.email_endpoint.clone(),
            chat_endpoint: config.chat_endpoint.clone(),
            backoff: notify_backoff(),
        })
    }

    /// Replace the retry policy for failed deliveries.
    pub fn with_backoff(mut self, backoff: ExponentialBuilder) -> Self {
        self.backoff = backoff;
        self
    }

    async fn notify(&self, summary: &ScanSummary, template: &str) -> Result<(), NotifierError> {
        if !self.email_endpoint.is_empty() {
            (|| async { self.post_email(summary, template).await })
                .retry(self.backoff)
                .when(NotifierError::is_retryable)
                .await?;
        }

        if !self.chat_endpoint.is_empty() {
            (|| async { self.post_chat(summary).await })
                .retry(self.backoff)
                .when(NotifierError::is_retryable)
                .await?;
        }

        Ok(())
    }

    async fn post_email(&self, summary: &ScanSummary, template: &str) -> Result<(), NotifierError> {
        let request = EmailRequest {
            user_id: &summary.user_id,
            template,
            vars: summary,
        };

        let response = self
            .client
            .post(&self.email_endpoint)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(endpoint = %self.email_endpoint, status = %status, "Email notification failed");
            return Err(NotifierError::Status {
                endpoint: self.email_endpoint.clone(),
                status,
            });
        }

        let body: serde_json::Map<String, serde_json::Value> = response.json().await?;
        if !body.contains_key("user") {
            return Err(NotifierError::Rejected(self.email_endpoint.clone()));
        }

        debug!(
            request_id = %summary.request_id,
            template = template,
            "Email notification sent"
        );
        Ok(())
    }

    async fn post_chat(&self, summary: &ScanSummary) -> Result<(), NotifierError> {
        let body = serde_json::to_vec(summary)?;
        let response = self
            .client
            .post(&self.chat_endpoint)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(endpoint = %self.chat_endpoint, status = %status, "Chat notification failed");
            return Err(NotifierError::Status {
                endpoint: self.chat_endpoint.clone(),
                status,
            });
        }

        debug!(request_id = %summary.request_id, "Chat notification sent");
        Ok(())
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify_success(&self, summary: &ScanSummary) -> Result<(), NotifierError> {
        self.notify(summary, EMAIL_SUCCESS_TEMPLATE).await
    }

    async fn notify_error(&self, summary: &ScanSummary) -> Result<(), NotifierError> {
        self.notify(summary, EMAIL_FAILURE_TEMPLATE).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::Value;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    use super::*;
    use crate::normalize::{NormalizeError, ResourceKind};

    /// Answers each request with the next scripted response; the last one
    /// repeats. Records request paths and bodies.
    struct Responder {
        base: String,
        requests: Arc<Mutex<Vec<(String, Value)>>>,
    }

    impl Responder {
        async fn start(script: Vec<(u16, &'static str)>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let base = format!("http://{}", listener.local_addr().unwrap());
            let requests = Arc::new(Mutex::new(Vec::new()));

            let seen = requests.clone();
            tokio::spawn(async move {
                let mut served = 0;
                loop {
                    let Ok((mut stream, _)) = listener.accept().await else {
                        return;
                    };
                    let (status, body) = script[served.min(script.len() - 1)];
                    served += 1;
                    let request = read_request(&mut stream).await;
                    seen.lock().unwrap().push(request);
                    respond(&mut stream, status, body).await;
                }
            });

            Self { base, requests }
        }

        fn url(&self, path: &str) -> String {
            format!("{}{}", self.base, path)
        }

        fn requests(&self) -> Vec<(String, Value)> {
            self.requests.lock().unwrap().clone()
        }
    }

    async fn read_request(stream: &mut TcpStream) -> (String, Value) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let header_end = loop {
            let n = stream.read(&mut chunk).await.unwrap();
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
            assert!(n > 0, "connection closed before headers");
        };

        let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
        let path = head
            .split_whitespace()
            .nth(1)
            .unwrap_or_default()
            .to_string();
        let length: usize = head
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse().ok())
                    .flatten()
            })
            .unwrap_or(0);
        while buf.len() < header_end + length {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before body");
            buf.extend_from_slice(&chunk[..n]);
        }

        let request_body =
            serde_json::from_slice(&buf[header_end..header_end + length]).unwrap_or(Value::Null);
        (path, request_body)
    }

    async fn respond(stream: &mut TcpStream, status: u16, body: &str) {
        let response = format!(
            "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        stream.shutdown().await.ok();
    }

    fn fast_backoff() -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(5))
            .with_max_times(3)
    }

    fn notifier(email: String, chat: String) -> HttpNotifier {
        let config = OnboardConfig {
            email_endpoint: email,
            chat_endpoint: chat,
            notify_timeout_secs: 5,
            ..Default::default()
        };
        HttpNotifier::new(&config).unwrap().with_backoff(fast_backoff())
    }

    fn summary() -> ScanSummary {
        let mut summary = ScanSummary::new("req-1", "cust-1", "user-1", "us-west-2");
        summary.instance_count = 3;
        summary
    }

    #[tokio::test]
    async fn test_email_success_posts_template_and_summary() {
        let server = Responder::start(vec![(200, r#"{"user": {"id": "user-1"}}"#)]).await;
        let notifier = notifier(server.url("/email"), String::new());

        notifier.notify_success(&summary()).await.unwrap();

        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        let (path, body) = &requests[0];
        assert_eq!(path, "/email");
        assert_eq!(body["user_id"], "user-1");
        assert_eq!(body["template"], EMAIL_SUCCESS_TEMPLATE);
        assert_eq!(body["vars"]["request_id"], "req-1");
        assert_eq!(body["vars"]["instance_count"], 3);
    }

    #[tokio::test]
    async fn test_failure_uses_failure_template_and_posts_chat() {
        let server = Responder::start(vec![(200, r#"{"user": {}}"#)]).await;
        let notifier = notifier(server.url("/email"), server.url("/chat"));

        notifier.notify_error(&summary()).await.unwrap();

        let requests = server.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].0, "/email");
        assert_eq!(requests[0].1["template"], EMAIL_FAILURE_TEMPLATE);
        assert_eq!(requests[1].0, "/chat");
        assert_eq!(requests[1].1["customer_id"], "cust-1");
        assert_eq!(requests[1].1["instance_count"], 3);
    }

    #[tokio::test]
    async fn test_email_response_without_user_is_rejected() {
        let server = Responder::start(vec![(200, r#"{"error": "unknown user"}"#)]).await;
        let notifier = notifier(server.url("/email"), String::new());

        let err = notifier.notify_success(&summary()).await.unwrap_err();

        assert!(matches!(err, NotifierError::Rejected(_)));
        assert_eq!(server.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_client_error_status_is_not_retried() {
        let server = Responder::start(vec![(400, "{}")]).await;
        let notifier = notifier(String::new(), server.url("/chat"));

        let err = notifier.notify_success(&summary()).await.unwrap_err();

        match err {
            NotifierError::Status { endpoint, status } => {
                assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);
                assert!(endpoint.ends_with("/chat"));
            }
            other => panic!("expected status error, got {other:?}"),
        }
        assert_eq!(server.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let server = Responder::start(vec![
            (503, "{}"),
            (429, "{}"),
            (200, r#"{"user": {}}"#),
        ])
        .await;
        let notifier = notifier(server.url("/email"), String::new());

        notifier.notify_success(&summary()).await.unwrap();

        assert_eq!(server.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_persistent_server_error_gives_up() {
        let server = Responder::start(vec![(502, "{}")]).await;
        let notifier = notifier(server.url("/email"), String::new());

        let err = notifier.notify_success(&summary()).await.unwrap_err();

        assert!(matches!(err, NotifierError::Status { .. }));
        // First attempt plus three retries.
        assert_eq!(server.requests().len(), 4);
    }

    #[tokio::test]
    async fn test_empty_endpoints_are_skipped() {
        let notifier = notifier(String::new(), String::new());

        notifier.notify_success(&summary()).await.unwrap();
        notifier.notify_error(&summary()).await.unwrap();
    }

    #[test]
    fn test_is_retryable() {
        let status = |code: u16| NotifierError::Status {
            endpoint: "http://localhost".to_string(),
            status: reqwest::StatusCode::from_u16(code).unwrap(),
        };

        assert!(status(429).is_retryable());
        assert!(status(500).is_retryable());
        assert!(status(503).is_retryable());
        assert!(!status(400).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(!NotifierError::Rejected("http://localhost".to_string()).is_retryable());
    }

    #[test]
    fn test_log_error_reporter_accepts_every_issue() {
        let reporter = LogErrorReporter;
        let summary = summary();

        reporter.report(
            &summary,
            &ScanIssue::Normalize(NormalizeError::MissingIdentifier {
                kind: ResourceKind::Instance,
                field: "instance id",
            }),
        );
        reporter.report(
            &summary,
            &ScanIssue::TooManyErrors {
                instance_errors: 2,
                group_errors: 1,
            },
        );
    }
}
