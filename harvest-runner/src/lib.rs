//! Harvest Runner: shard orchestration, task planning, collection, quality.
//!
//! This crate builds on `harvest-core` to provide:
//! - TOML configuration for the whole pipeline
//! - Task slice planning and loading (`task_slice_{i}.json`)
//! - The shard orchestrator with its per-item outcome accounting
//! - The collector/merger that consolidates shard outputs
//! - The data quality report over the merged tables

pub mod collect;
pub mod config;
pub mod quality;
pub mod shard;
pub mod tasks;

pub use collect::{collect_kind, CollectError, MergedTable};
pub use config::{CollectConfig, ConfigError, HarvestConfig, PathsConfig, PlanConfig};
pub use quality::{assess, KindQuality, QualityReport};
pub use shard::{
    run_shard, run_slice, EngineOutcome, ItemOutcome, ShardError, ShardProgress, ShardRun,
    ShardSummary, StdoutProgress,
};
pub use tasks::{load_universe, plan_slices, SliceError, TaskSliceStore};
