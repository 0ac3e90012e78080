//! Harvest Core: domain types, provider clients, normalization, artifacts, engines.
//!
//! This crate contains the per-security half of the pipeline:
//! - Domain types (work items, fund-flow records, daily bars)
//! - Provider traits and the Sina HTTP clients behind them
//! - Circuit breaker for provider bans and rate limits
//! - Schema projection from raw JSON records to canonical rows
//! - Parquet artifact store (one file per data kind and code)
//! - The paginated fund-flow engine and the session-scoped kdata engine

pub mod data;
pub mod domain;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: types handed across thread boundaries by the
    /// collector (and any future parallel shard runner) are Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<domain::WorkItem>();
        require_sync::<domain::WorkItem>();
        require_send::<domain::FundFlowRecord>();
        require_sync::<domain::FundFlowRecord>();
        require_send::<domain::FundFlowTable>();
        require_sync::<domain::FundFlowTable>();
        require_send::<domain::KdataBar>();
        require_sync::<domain::KdataBar>();
        require_send::<domain::DataKind>();
        require_sync::<domain::DataKind>();

        require_send::<data::DataError>();
        require_sync::<data::DataError>();
        require_send::<data::ArtifactStore>();
        require_sync::<data::ArtifactStore>();
        require_send::<data::CircuitBreaker>();
        require_sync::<data::CircuitBreaker>();
        require_send::<data::FundFlowConfig>();
        require_sync::<data::FundFlowConfig>();
    }
}
