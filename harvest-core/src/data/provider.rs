//! Provider traits and structured error types.
//!
//! `FlowPageSource` abstracts over where fund-flow pages come from (the Sina
//! endpoint in production, scripted pages in tests). `KdataClient` is the
//! opaque session-bearing price-history client; it is only ever reached
//! through a [`KdataSession`] guard so login and logout are always paired.

use crate::domain::KdataBar;
use chrono::NaiveDate;
use log::{info, warn};
use thiserror::Error;

/// One element of a fund-flow page, keyed by the provider's field names.
pub type RawFlowRecord = serde_json::Map<String, serde_json::Value>;

/// Structured error types for data operations.
///
/// These are displayable in CLI output and are carried per item by the
/// shard orchestrator.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("hard stop: data provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("page {page} failed for {code}: {source}")]
    PageFailed {
        code: String,
        page: u32,
        #[source]
        source: Box<DataError>,
    },

    #[error("schema mismatch for {code}: missing columns {missing:?}")]
    SchemaMismatch { code: String, missing: Vec<String> },

    #[error("artifact error: {0}")]
    ArtifactError(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("parquet I/O error: {0}")]
    ParquetError(String),

    #[error("data error: {0}")]
    Other(String),
}

/// Source of fund-flow pages.
pub trait FlowPageSource: Send + Sync {
    /// Human-readable name of this source.
    fn name(&self) -> &str;

    /// Fetch one 1-based page of raw records for a provider-form code.
    ///
    /// An empty vector means the provider has no rows on this page.
    fn fetch_page(
        &self,
        api_code: &str,
        page: u32,
        page_size: usize,
    ) -> Result<Vec<RawFlowRecord>, DataError>;

    /// Check if the source is currently available (not blocked).
    fn is_available(&self) -> bool {
        true
    }
}

/// Session-bearing client for daily price history.
pub trait KdataClient {
    /// Human-readable name of this client.
    fn name(&self) -> &str;

    fn login(&mut self) -> Result<(), DataError>;

    fn logout(&mut self);

    /// Daily bars for `code` on or after `start`, in any order.
    fn query_daily(&self, code: &str, start: NaiveDate) -> Result<Vec<KdataBar>, DataError>;
}

/// Logged-in scope over a [`KdataClient`]. Logs out when dropped, on every
/// exit path.
pub struct KdataSession<'a> {
    client: &'a mut dyn KdataClient,
}

impl<'a> KdataSession<'a> {
    /// Log in and return the guard.
    pub fn open(client: &'a mut dyn KdataClient) -> Result<Self, DataError> {
        client.login()?;
        info!("{} session opened", client.name());
        Ok(Self { client })
    }

    pub fn query_daily(&self, code: &str, start: NaiveDate) -> Result<Vec<KdataBar>, DataError> {
        self.client.query_daily(code, start)
    }
}

impl Drop for KdataSession<'_> {
    fn drop(&mut self) {
        self.client.logout();
        if std::thread::panicking() {
            warn!("{} session closed during unwind", self.client.name());
        } else {
            info!("{} session closed", self.client.name());
        }
    }
}
