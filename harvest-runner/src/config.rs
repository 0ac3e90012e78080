//! Pipeline configuration.
//!
//! Loaded from an optional TOML file. Every section falls back to its
//! defaults, so an empty file (or no file) gives the stock layout:
//!
//! ```toml
//! [paths]
//! tasks_dir = "tasks"
//! output_root = "data_slice"
//!
//! [fund_flow]
//! page_size = 50
//! max_pages = 100
//! failure_policy = "fail_fast"
//!
//! [collect]
//! input_base = "all_data"
//! ```

use harvest_core::data::{FundFlowConfig, KdataConfig};
use harvest_core::domain::DataKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub paths: PathsConfig,
    pub fund_flow: FundFlowConfig,
    pub kdata: KdataConfig,
    pub collect: CollectConfig,
    pub plan: PlanConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Where `task_slice_{i}.json` files live.
    pub tasks_dir: PathBuf,
    /// Shard-local artifact root (`{output_root}/{kind}/{code}.parquet`).
    pub output_root: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            tasks_dir: PathBuf::from("tasks"),
            output_root: PathBuf::from("data_slice"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectConfig {
    /// Directory holding the downloaded shard outputs.
    pub input_base: PathBuf,
    /// Shard output directories are `{part_prefix}*`.
    pub part_prefix: String,
    pub kdata_dir: PathBuf,
    pub moneyflow_dir: PathBuf,
    pub report_path: PathBuf,
    /// Also write the concatenated table as `{kind}_merged.parquet` next to
    /// the consolidated directory.
    pub write_merged: bool,
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            input_base: PathBuf::from("all_data"),
            part_prefix: "data_part_".into(),
            kdata_dir: PathBuf::from("final_kdata"),
            moneyflow_dir: PathBuf::from("final_moneyflow"),
            report_path: PathBuf::from("data_quality_report.json"),
            write_merged: false,
        }
    }
}

impl CollectConfig {
    /// Consolidated output directory for one data kind.
    pub fn output_dir(&self, kind: DataKind) -> &Path {
        match kind {
            DataKind::Kdata => &self.kdata_dir,
            DataKind::MoneyFlow => &self.moneyflow_dir,
        }
    }

    pub fn merged_path(&self, kind: DataKind) -> PathBuf {
        let dir = self.output_dir(kind);
        let parent = dir.parent().unwrap_or_else(|| Path::new(""));
        parent.join(format!("{}_merged.parquet", kind.dir_name()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanConfig {
    pub task_count: usize,
    /// Keep only the first N filtered securities (before shuffling).
    pub limit: Option<usize>,
    /// Shuffle seed; `None` draws from the OS.
    pub seed: Option<u64>,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            task_count: 20,
            limit: None,
            seed: None,
        }
    }
}

impl HarvestConfig {
    /// Load and validate a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fund_flow.page_size == 0 {
            return Err(ConfigError::Invalid("fund_flow.page_size must be > 0".into()));
        }
        if self.fund_flow.max_pages == 0 {
            return Err(ConfigError::Invalid("fund_flow.max_pages must be > 0".into()));
        }
        if self.plan.task_count == 0 {
            return Err(ConfigError::Invalid("plan.task_count must be > 0".into()));
        }
        if self.collect.kdata_dir == self.collect.moneyflow_dir {
            return Err(ConfigError::Invalid(
                "collect.kdata_dir and collect.moneyflow_dir must differ".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use harvest_core::data::{FailurePolicy, SchemaPolicy};

    #[test]
    fn empty_toml_gives_defaults() {
        let config = HarvestConfig::from_toml("").unwrap();
        assert_eq!(config, HarvestConfig::default());
        assert_eq!(config.paths.tasks_dir, PathBuf::from("tasks"));
        assert_eq!(config.fund_flow.page_size, 50);
        assert_eq!(config.fund_flow.max_pages, 100);
        assert_eq!(config.kdata.start_date, NaiveDate::from_ymd_opt(2005, 1, 1).unwrap());
        assert_eq!(config.plan.task_count, 20);
    }

    #[test]
    fn sections_override_independently() {
        let config = HarvestConfig::from_toml(
            r#"
            [fund_flow]
            max_pages = 10
            failure_policy = "best_effort_partial"
            schema_policy = "partial_columns"

            [fund_flow.fields]
            close = "price"

            [kdata]
            enabled = false
            start_date = "2015-06-01"

            [collect]
            input_base = "downloads"
            write_merged = true
            "#,
        )
        .unwrap();

        assert_eq!(config.fund_flow.max_pages, 10);
        assert_eq!(config.fund_flow.page_size, 50);
        assert_eq!(config.fund_flow.failure_policy, FailurePolicy::BestEffortPartial);
        assert_eq!(config.fund_flow.schema_policy, SchemaPolicy::PartialColumns);
        assert_eq!(config.fund_flow.fields.close, "price");
        assert_eq!(config.fund_flow.fields.date, "opendate");
        assert!(!config.kdata.enabled);
        assert_eq!(config.kdata.start_date, NaiveDate::from_ymd_opt(2015, 6, 1).unwrap());
        assert_eq!(config.collect.input_base, PathBuf::from("downloads"));
        assert_eq!(config.collect.part_prefix, "data_part_");
        assert!(config.collect.write_merged);
    }

    #[test]
    fn zero_limits_are_rejected() {
        for toml in [
            "[fund_flow]\npage_size = 0",
            "[fund_flow]\nmax_pages = 0",
            "[plan]\ntask_count = 0",
        ] {
            assert!(
                matches!(HarvestConfig::from_toml(toml), Err(ConfigError::Invalid(_))),
                "{toml}"
            );
        }
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        assert!(matches!(
            HarvestConfig::from_toml("[fund_flow\nmax_pages = 1"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn merged_path_sits_beside_output_dir() {
        let collect = CollectConfig {
            moneyflow_dir: PathBuf::from("out/final_moneyflow"),
            ..CollectConfig::default()
        };
        assert_eq!(
            collect.merged_path(DataKind::MoneyFlow),
            PathBuf::from("out/moneyflow_merged.parquet")
        );
        assert_eq!(
            CollectConfig::default().merged_path(DataKind::Kdata),
            PathBuf::from("kdata_merged.parquet")
        );
    }
}
