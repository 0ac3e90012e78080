//! Paginated fund-flow retrieval.
//!
//! The provider decides how many pages a code has. The engine walks pages
//! from 1 until one of:
//! - an empty page (no more data),
//! - a short page (fewer than `page_size` rows; accepted, then stop),
//! - the `max_pages` cap (result kept, flagged as truncated),
//! - a failed page (handled per [`FailurePolicy`]).
//!
//! Accumulated rows are then projected onto the canonical schema, sorted
//! ascending by date and, when non-empty, persisted as one artifact.

use super::artifact::ArtifactStore;
use super::normalize::{normalize_flow, FlowFieldMap, SchemaPolicy};
use super::provider::{DataError, FlowPageSource, RawFlowRecord};
use super::sina::api_code;
use crate::domain::{DataKind, FundFlowTable};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// How a failed page affects the pages fetched before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Discard everything; the call fails and nothing is persisted.
    #[default]
    FailFast,
    /// Keep the pages that succeeded before the failure and flag the
    /// result as partial. A failure on page 1 still fails the call.
    BestEffortPartial,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FundFlowConfig {
    pub enabled: bool,
    pub page_size: usize,
    pub max_pages: u32,
    pub page_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub failure_policy: FailurePolicy,
    pub schema_policy: SchemaPolicy,
    pub fields: FlowFieldMap,
}

impl Default for FundFlowConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            page_size: 50,
            max_pages: 100,
            page_delay_ms: 300,
            request_timeout_secs: 45,
            failure_policy: FailurePolicy::default(),
            schema_policy: SchemaPolicy::default(),
            fields: FlowFieldMap::default(),
        }
    }
}

impl FundFlowConfig {
    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// How pagination ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Completion {
    /// An empty or short page was reached.
    Complete,
    /// `max_pages` full pages were fetched without reaching the end.
    Truncated { max_pages: u32 },
    /// A page failed under the best-effort policy; earlier pages are kept.
    Partial { failed_page: u32, reason: String },
}

/// Result of [`FundFlowEngine::fetch_fund_flow`].
#[derive(Debug, Clone)]
pub struct FundFlowFetch {
    pub table: FundFlowTable,
    pub pages_fetched: u32,
    pub raw_records: usize,
    pub dropped_rows: usize,
    pub completion: Completion,
}

/// Result of [`FundFlowEngine::download`].
#[derive(Debug, Clone)]
pub struct FlowReport {
    pub code: String,
    pub rows: usize,
    /// Rows received before normalization.
    pub raw_records: usize,
    /// Rows dropped for lacking a parseable date.
    pub dropped_rows: usize,
    pub pages_fetched: u32,
    pub completion: Completion,
    /// `None` when there was nothing to persist.
    pub artifact: Option<PathBuf>,
}

/// The fund-flow engine. Holds no per-code state between calls.
pub struct FundFlowEngine<'a> {
    source: &'a dyn FlowPageSource,
    config: FundFlowConfig,
}

impl<'a> FundFlowEngine<'a> {
    pub fn new(source: &'a dyn FlowPageSource, config: FundFlowConfig) -> Self {
        Self { source, config }
    }

    /// Walk all pages for `code` and return the normalized table.
    ///
    /// Zero rows is a success with an empty table.
    pub fn fetch_fund_flow(&self, code: &str) -> Result<FundFlowFetch, DataError> {
        if !self.source.is_available() {
            return Err(DataError::CircuitBreakerTripped);
        }

        let provider_code = api_code(code);
        let page_size = self.config.page_size.max(1);
        let mut raw: Vec<RawFlowRecord> = Vec::new();
        let mut pages_fetched = 0;
        let mut page = 1;
        let mut completion = Completion::Complete;

        loop {
            if page > self.config.max_pages {
                warn!(
                    "{code}: stopped at the {} page cap with {} rows; result truncated",
                    self.config.max_pages,
                    raw.len()
                );
                completion = Completion::Truncated {
                    max_pages: self.config.max_pages,
                };
                break;
            }

            let rows = match self.source.fetch_page(&provider_code, page, page_size) {
                Ok(rows) => rows,
                Err(e) => {
                    if self.config.failure_policy == FailurePolicy::BestEffortPartial
                        && !raw.is_empty()
                    {
                        warn!(
                            "{code}: page {page} failed ({e}); keeping {} rows from {} page(s)",
                            raw.len(),
                            pages_fetched
                        );
                        completion = Completion::Partial {
                            failed_page: page,
                            reason: e.to_string(),
                        };
                        break;
                    }
                    return Err(DataError::PageFailed {
                        code: code.to_string(),
                        page,
                        source: Box::new(e),
                    });
                }
            };

            pages_fetched += 1;
            debug!("{code}: page {page} returned {} rows", rows.len());

            if rows.is_empty() {
                break;
            }
            let short = rows.len() < page_size;
            raw.extend(rows);
            if short {
                break;
            }

            page += 1;
            if page <= self.config.max_pages {
                std::thread::sleep(self.config.page_delay());
            }
        }

        let raw_records = raw.len();
        let normalized = normalize_flow(
            code,
            &raw,
            &self.config.fields,
            self.config.schema_policy,
        )?;

        Ok(FundFlowFetch {
            table: normalized.table,
            pages_fetched,
            raw_records,
            dropped_rows: normalized.dropped_rows,
            completion,
        })
    }

    /// Fetch and persist.
    ///
    /// Each call starts from a clean slate for `code`: a failed attempt or an
    /// empty result removes any artifact left by an earlier run.
    pub fn download(&self, code: &str, store: &ArtifactStore) -> Result<FlowReport, DataError> {
        let fetch = match self.fetch_fund_flow(code) {
            Ok(fetch) => fetch,
            Err(e) => {
                if store.remove(DataKind::MoneyFlow, code)? {
                    warn!("{code}: removed stale fund-flow artifact after failed attempt");
                }
                return Err(e);
            }
        };

        let artifact = if fetch.table.is_empty() {
            store.remove(DataKind::MoneyFlow, code)?;
            info!("{code}: no fund-flow history");
            None
        } else {
            let path = store.write_fund_flow(&fetch.table)?;
            info!(
                "{code}: {} fund-flow rows from {} page(s) ({} raw, {} dropped) -> {}",
                fetch.table.len(),
                fetch.pages_fetched,
                fetch.raw_records,
                fetch.dropped_rows,
                path.display()
            );
            Some(path)
        };

        Ok(FlowReport {
            code: code.to_string(),
            rows: fetch.table.len(),
            raw_records: fetch.raw_records,
            dropped_rows: fetch.dropped_rows,
            pages_fetched: fetch.pages_fetched,
            completion: fetch.completion,
            artifact,
        })
    }
}
