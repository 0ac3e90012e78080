//! Domain types shared by the engines, the artifact store and the runner.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One security assigned to a shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Exchange-qualified code, e.g. `sh.600000`.
    pub code: String,
    pub name: String,
}

impl WorkItem {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
        }
    }
}

/// The two per-security data kinds the pipeline produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    Kdata,
    MoneyFlow,
}

impl DataKind {
    pub const ALL: [DataKind; 2] = [DataKind::Kdata, DataKind::MoneyFlow];

    /// Directory name used for this kind under a shard output root.
    pub fn dir_name(self) -> &'static str {
        match self {
            DataKind::Kdata => "kdata",
            DataKind::MoneyFlow => "moneyflow",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Numeric columns of the canonical fund-flow schema, in persisted order.
///
/// `date` and `code` are not listed: `date` is required on every row and
/// `code` is stamped by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowColumn {
    Close,
    PctChange,
    TurnoverRate,
    NetFlowAmount,
    MainNetFlow,
    SuperLargeNetFlow,
    LargeNetFlow,
    MediumSmallNetFlow,
}

impl FlowColumn {
    pub const ALL: [FlowColumn; 8] = [
        FlowColumn::Close,
        FlowColumn::PctChange,
        FlowColumn::TurnoverRate,
        FlowColumn::NetFlowAmount,
        FlowColumn::MainNetFlow,
        FlowColumn::SuperLargeNetFlow,
        FlowColumn::LargeNetFlow,
        FlowColumn::MediumSmallNetFlow,
    ];

    /// Canonical column name.
    pub fn name(self) -> &'static str {
        match self {
            FlowColumn::Close => "close",
            FlowColumn::PctChange => "pct_change",
            FlowColumn::TurnoverRate => "turnover_rate",
            FlowColumn::NetFlowAmount => "net_flow_amount",
            FlowColumn::MainNetFlow => "main_net_flow",
            FlowColumn::SuperLargeNetFlow => "super_large_net_flow",
            FlowColumn::LargeNetFlow => "large_net_flow",
            FlowColumn::MediumSmallNetFlow => "medium_small_net_flow",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }
}

/// Canonical fund-flow row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundFlowRecord {
    pub date: NaiveDate,
    pub close: Option<f64>,
    pub pct_change: Option<f64>,
    pub turnover_rate: Option<f64>,
    pub net_flow_amount: Option<f64>,
    pub main_net_flow: Option<f64>,
    pub super_large_net_flow: Option<f64>,
    pub large_net_flow: Option<f64>,
    pub medium_small_net_flow: Option<f64>,
    pub code: String,
}

impl FundFlowRecord {
    /// A row with only the required fields set.
    pub fn empty(date: NaiveDate, code: impl Into<String>) -> Self {
        Self {
            date,
            close: None,
            pct_change: None,
            turnover_rate: None,
            net_flow_amount: None,
            main_net_flow: None,
            super_large_net_flow: None,
            large_net_flow: None,
            medium_small_net_flow: None,
            code: code.into(),
        }
    }

    pub fn value(&self, column: FlowColumn) -> Option<f64> {
        match column {
            FlowColumn::Close => self.close,
            FlowColumn::PctChange => self.pct_change,
            FlowColumn::TurnoverRate => self.turnover_rate,
            FlowColumn::NetFlowAmount => self.net_flow_amount,
            FlowColumn::MainNetFlow => self.main_net_flow,
            FlowColumn::SuperLargeNetFlow => self.super_large_net_flow,
            FlowColumn::LargeNetFlow => self.large_net_flow,
            FlowColumn::MediumSmallNetFlow => self.medium_small_net_flow,
        }
    }

    pub fn set(&mut self, column: FlowColumn, value: Option<f64>) {
        let slot = match column {
            FlowColumn::Close => &mut self.close,
            FlowColumn::PctChange => &mut self.pct_change,
            FlowColumn::TurnoverRate => &mut self.turnover_rate,
            FlowColumn::NetFlowAmount => &mut self.net_flow_amount,
            FlowColumn::MainNetFlow => &mut self.main_net_flow,
            FlowColumn::SuperLargeNetFlow => &mut self.super_large_net_flow,
            FlowColumn::LargeNetFlow => &mut self.large_net_flow,
            FlowColumn::MediumSmallNetFlow => &mut self.medium_small_net_flow,
        };
        *slot = value;
    }
}

/// All canonical fund-flow rows for one code, ascending by date.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FundFlowTable {
    pub code: String,
    pub records: Vec<FundFlowRecord>,
    /// Canonical columns the provider payload did not carry at all.
    /// Only non-empty when partial-column persistence is allowed.
    pub missing_columns: Vec<FlowColumn>,
}

impl FundFlowTable {
    pub fn empty(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            records: Vec::new(),
            missing_columns: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Columns present in this table, in canonical order.
    pub fn present_columns(&self) -> Vec<FlowColumn> {
        FlowColumn::ALL
            .into_iter()
            .filter(|c| !self.missing_columns.contains(c))
            .collect()
    }
}

/// One daily price/volume bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KdataBar {
    pub date: NaiveDate,
    pub code: String,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    /// Previous bar's close.
    pub preclose: Option<f64>,
    pub volume: Option<f64>,
    /// Percent change of `close` over `preclose`.
    pub pct_change: Option<f64>,
}

/// Fill `preclose` and `pct_change` from consecutive closes.
///
/// `bars` must be sorted ascending by date. The first bar, and any bar after
/// a missing close, gets no previous close.
pub fn derive_changes(bars: &mut [KdataBar]) {
    let mut prev_close = None;
    for bar in bars.iter_mut() {
        bar.preclose = prev_close;
        bar.pct_change = match (bar.close, prev_close) {
            (Some(close), Some(prev)) if prev != 0.0 => Some((close / prev - 1.0) * 100.0),
            _ => None,
        };
        prev_close = bar.close;
    }
}
