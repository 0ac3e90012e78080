//! Data acquisition and persistence

pub mod artifact;
pub mod circuit_breaker;
pub mod fund_flow;
pub mod kdata;
pub mod normalize;
pub mod provider;
pub mod schema;
pub mod sina;

pub use artifact::{read_fund_flow, read_kdata, ArtifactStore};
pub use circuit_breaker::CircuitBreaker;
pub use fund_flow::{
    Completion, FailurePolicy, FlowReport, FundFlowConfig, FundFlowEngine, FundFlowFetch,
};
pub use kdata::{KdataConfig, KdataEngine};
pub use normalize::{FlowFieldMap, SchemaPolicy};
pub use provider::{DataError, FlowPageSource, KdataClient, KdataSession, RawFlowRecord};
pub use schema::CanonicalSchema;
pub use sina::{api_code, SinaFlowClient, SinaKlineClient};
