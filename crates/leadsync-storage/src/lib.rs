//! HTTP fetch utilities and persistence seams for leadsync.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leadsync_core::{
    ExistingContact, NewLead, UnassignedLead, WorkflowSettings, WorkflowSettingsInput,
};
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub const CRATE_NAME: &str = "leadsync-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("invalid stored json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Row-level access to the `leads` relation.
///
/// Every `*_since` operation filters on `created_at >= since`.
#[async_trait]
pub trait LeadStore: Send + Sync {
    /// Existing leads whose email matches any of `emails`, case-insensitively.
    async fn find_contacts_by_email(
        &self,
        emails: &[String],
    ) -> Result<Vec<ExistingContact>, StoreError>;

    /// Existing leads whose phone equals any of `phones`.
    async fn find_contacts_by_phone(
        &self,
        phones: &[String],
    ) -> Result<Vec<ExistingContact>, StoreError>;

    /// All-or-nothing bulk insert. Returns the number of rows written.
    async fn insert_leads(&self, leads: &[NewLead]) -> Result<usize, StoreError>;

    async fn unassigned_leads_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<UnassignedLead>, StoreError>;

    async fn assign_lead(&self, id: Uuid, employee_id: &str) -> Result<(), StoreError>;

    /// Clears `assigned_to` on assigned leads, optionally only those held by `employee_id`.
    async fn revoke_assignments_since(
        &self,
        since: DateTime<Utc>,
        employee_id: Option<&str>,
    ) -> Result<u64, StoreError>;

    async fn count_unassigned_since(&self, since: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn count_assigned_since(
        &self,
        since: DateTime<Utc>,
        employee_id: Option<&str>,
    ) -> Result<u64, StoreError>;

    /// Deletes sheet-imported leads whose `source_url` is null or differs from `current_url`.
    async fn purge_sheet_leads_except(&self, current_url: &str) -> Result<u64, StoreError>;

    /// Every non-null `source` value currently stored.
    async fn lead_sources(&self) -> Result<Vec<String>, StoreError>;
}

/// Access to the `workflow_settings` singleton.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Most recently updated row, if any.
    async fn load_settings(&self) -> Result<Option<WorkflowSettings>, StoreError>;

    /// Replaces the most recent row, or inserts the first one. Last writer wins.
    async fn save_settings(
        &self,
        input: WorkflowSettingsInput,
    ) -> Result<WorkflowSettings, StoreError>;

    async fn set_round_robin_index(&self, id: Uuid, index: i64) -> Result<(), StoreError>;
}

/// Whether a failed request to the sheet host is worth repeating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

impl RetryDisposition {
    /// Throttling, request timeouts and 5xx are transient. A 404 means the tab is gone.
    pub fn for_status(status: StatusCode) -> Self {
        if status.is_server_error()
            || matches!(
                status,
                StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT
            )
        {
            RetryDisposition::Retryable
        } else {
            RetryDisposition::NonRetryable
        }
    }

    pub fn for_error(err: &reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            RetryDisposition::Retryable
        } else {
            RetryDisposition::NonRetryable
        }
    }
}

/// Capped exponential backoff between attempts against the sheet host.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before repeating a request that failed on attempt `attempt` (zero-based),
    /// or `None` when the failure is final.
    pub fn retry_after(&self, disposition: RetryDisposition, attempt: usize) -> Option<Duration> {
        if disposition == RetryDisposition::NonRetryable || attempt >= self.max_retries {
            return None;
        }
        let factor = 2u32.saturating_pow(u32::try_from(attempt).unwrap_or(u32::MAX));
        Some(self.base_delay.saturating_mul(factor).min(self.max_delay))
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub max_concurrency: usize,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            max_concurrency: 4,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    limit: Arc<Semaphore>,
    backoff: BackoffPolicy,
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn is_html(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("text/html"))
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("fetcher is shutting down")]
    Closed,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;

        Ok(Self {
            client,
            limit: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            backoff: config.backoff,
        })
    }

    /// GET `url`, retrying transient failures. Non-success statuses are errors.
    pub async fn fetch(&self, run_id: Uuid, url: &str) -> Result<FetchedResponse, FetchError> {
        let _permit = self.limit.acquire().await.map_err(|_| FetchError::Closed)?;
        self.fetch_with_retries(url)
            .instrument(info_span!("http_fetch", %run_id, url))
            .await
    }

    async fn fetch_with_retries(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let mut attempt = 0usize;
        loop {
            let (disposition, err) = match self.client.get(url).send().await {
                Ok(resp) if resp.status().is_success() => return read_response(resp).await,
                Ok(resp) => (
                    RetryDisposition::for_status(resp.status()),
                    FetchError::HttpStatus {
                        status: resp.status().as_u16(),
                        url: resp.url().to_string(),
                    },
                ),
                Err(err) => (RetryDisposition::for_error(&err), FetchError::Request(err)),
            };

            let Some(delay) = self.backoff.retry_after(disposition, attempt) else {
                return Err(err);
            };
            debug!(
                error = %err,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "retrying sheet request"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

async fn read_response(resp: reqwest::Response) -> Result<FetchedResponse, FetchError> {
    let status = resp.status();
    let final_url = resp.url().to_string();
    let content_type = resp
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = resp.bytes().await?.to_vec();
    Ok(FetchedResponse {
        status,
        final_url,
        content_type,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::extract::State;
    use axum::http::header;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::Router;
    use tokio::net::TcpListener;

    fn quick_retries(max_retries: usize) -> BackoffPolicy {
        BackoffPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        }
    }

    fn fetcher(backoff: BackoffPolicy) -> HttpFetcher {
        HttpFetcher::new(HttpClientConfig {
            backoff,
            ..Default::default()
        })
        .unwrap()
    }

    async fn spawn(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn default_policy_retries_a_busy_sheet_host_twice() {
        let policy = BackoffPolicy::default();
        let busy = RetryDisposition::for_status(StatusCode::SERVICE_UNAVAILABLE);

        assert_eq!(policy.retry_after(busy, 0), Some(Duration::from_millis(250)));
        assert_eq!(policy.retry_after(busy, 1), Some(Duration::from_millis(500)));
        assert_eq!(policy.retry_after(busy, 2), None);
        assert_eq!(BackoffPolicy::none().retry_after(busy, 0), None);
    }

    #[test]
    fn long_retry_chains_stop_growing_at_the_cap() {
        let policy = BackoffPolicy {
            max_retries: usize::MAX,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        };
        let retry = RetryDisposition::Retryable;

        assert_eq!(policy.retry_after(retry, 2), Some(Duration::from_secs(4)));
        assert_eq!(policy.retry_after(retry, 3), Some(Duration::from_secs(5)));
        assert_eq!(policy.retry_after(retry, 200), Some(Duration::from_secs(5)));
    }

    #[test]
    fn missing_or_private_tabs_fail_without_retrying() {
        let policy = BackoffPolicy::default();
        for status in [StatusCode::NOT_FOUND, StatusCode::FORBIDDEN, StatusCode::BAD_REQUEST] {
            let disposition = RetryDisposition::for_status(status);
            assert_eq!(disposition, RetryDisposition::NonRetryable, "{status}");
            assert_eq!(policy.retry_after(disposition, 0), None);
        }
        for status in [
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::REQUEST_TIMEOUT,
            StatusCode::BAD_GATEWAY,
        ] {
            assert_eq!(RetryDisposition::for_status(status), RetryDisposition::Retryable, "{status}");
        }
    }

    #[test]
    fn google_error_pages_are_told_apart_from_csv_exports() {
        let error_page = FetchedResponse {
            status: StatusCode::OK,
            final_url: "https://docs.example/d/e/KEY/pub?gid=7&output=csv".into(),
            content_type: Some("Text/HTML; charset=utf-8".into()),
            body: b"<!DOCTYPE html><title>Page not found</title>".to_vec(),
        };
        assert!(error_page.is_html());

        let export = FetchedResponse {
            content_type: Some("text/csv".into()),
            body: b"full_name,email\nAsha Rao,asha@example.com\n".to_vec(),
            ..error_page.clone()
        };
        assert!(!export.is_html());
        assert!(export.text().starts_with("full_name,email"));

        let untyped = FetchedResponse {
            content_type: None,
            ..error_page
        };
        assert!(!untyped.is_html());
    }

    #[tokio::test]
    async fn throttled_export_succeeds_on_a_later_attempt() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/export",
                get(|State(hits): State<Arc<AtomicUsize>>| async move {
                    if hits.fetch_add(1, Ordering::SeqCst) < 2 {
                        StatusCode::TOO_MANY_REQUESTS.into_response()
                    } else {
                        ([(header::CONTENT_TYPE, "text/csv")], "full_name\nAsha\n").into_response()
                    }
                }),
            )
            .with_state(hits.clone());
        let base = spawn(app).await;

        let resp = fetcher(quick_retries(2))
            .fetch(Uuid::new_v4(), &format!("{base}/export"))
            .await
            .unwrap();
        assert_eq!(resp.text(), "full_name\nAsha\n");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn missing_tab_is_requested_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/export",
                get(|State(hits): State<Arc<AtomicUsize>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    StatusCode::NOT_FOUND
                }),
            )
            .with_state(hits.clone());
        let base = spawn(app).await;

        let err = fetcher(quick_retries(3))
            .fetch(Uuid::new_v4(), &format!("{base}/export"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus { status: 404, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
