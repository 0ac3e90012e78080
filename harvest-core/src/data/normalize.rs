//! Schema projection from raw provider records to canonical fund-flow rows.
//!
//! The projection fails closed: a canonical column absent from the whole
//! payload is a schema mismatch (unless partial columns are allowed), and a
//! row whose date cannot be parsed is dropped. Individual numeric cells are
//! coerced, so a malformed value becomes a null rather than an error.

use super::provider::{DataError, RawFlowRecord};
use crate::domain::{FlowColumn, FundFlowRecord, FundFlowTable};
use chrono::NaiveDate;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Provider field name for each canonical column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowFieldMap {
    pub date: String,
    pub close: String,
    pub pct_change: String,
    pub turnover_rate: String,
    pub net_flow_amount: String,
    pub main_net_flow: String,
    pub super_large_net_flow: String,
    pub large_net_flow: String,
    pub medium_small_net_flow: String,
}

impl Default for FlowFieldMap {
    /// Field names of Sina's `MoneyFlow.ssl_qsfx_lscjfb` endpoint.
    fn default() -> Self {
        Self {
            date: "opendate".into(),
            close: "trade".into(),
            pct_change: "changeratio".into(),
            turnover_rate: "turnover".into(),
            net_flow_amount: "netamount".into(),
            main_net_flow: "r0_net".into(),
            super_large_net_flow: "r1_net".into(),
            large_net_flow: "r2_net".into(),
            medium_small_net_flow: "r3_net".into(),
        }
    }
}

impl FlowFieldMap {
    pub fn source_key(&self, column: FlowColumn) -> &str {
        match column {
            FlowColumn::Close => &self.close,
            FlowColumn::PctChange => &self.pct_change,
            FlowColumn::TurnoverRate => &self.turnover_rate,
            FlowColumn::NetFlowAmount => &self.net_flow_amount,
            FlowColumn::MainNetFlow => &self.main_net_flow,
            FlowColumn::SuperLargeNetFlow => &self.super_large_net_flow,
            FlowColumn::LargeNetFlow => &self.large_net_flow,
            FlowColumn::MediumSmallNetFlow => &self.medium_small_net_flow,
        }
    }
}

/// What to do when the payload lacks whole canonical columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaPolicy {
    /// Treat the security as having no usable data.
    #[default]
    Skip,
    /// Persist the columns that are present.
    PartialColumns,
}

/// Output of [`normalize_flow`].
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub table: FundFlowTable,
    /// Rows discarded because their date was absent or unparseable.
    pub dropped_rows: usize,
}

/// Project raw records onto the canonical schema, stamp `code`, and sort
/// ascending by date. The sort is stable and duplicates are kept.
pub fn normalize_flow(
    code: &str,
    raw: &[RawFlowRecord],
    fields: &FlowFieldMap,
    policy: SchemaPolicy,
) -> Result<Normalized, DataError> {
    if raw.is_empty() {
        return Ok(Normalized {
            table: FundFlowTable::empty(code),
            dropped_rows: 0,
        });
    }

    let carries = |key: &str| raw.iter().any(|r| r.contains_key(key));

    let missing: Vec<FlowColumn> = FlowColumn::ALL
        .into_iter()
        .filter(|c| !carries(fields.source_key(*c)))
        .collect();

    if !carries(&fields.date) {
        let mut names = vec!["date".to_string()];
        names.extend(missing.iter().map(|c| c.name().to_string()));
        return Err(DataError::SchemaMismatch {
            code: code.to_string(),
            missing: names,
        });
    }

    if !missing.is_empty() && policy == SchemaPolicy::Skip {
        return Err(DataError::SchemaMismatch {
            code: code.to_string(),
            missing: missing.iter().map(|c| c.name().to_string()).collect(),
        });
    }

    let mut records = Vec::with_capacity(raw.len());
    let mut dropped_rows = 0;

    for row in raw {
        let Some(date) = row.get(&fields.date).and_then(parse_date) else {
            dropped_rows += 1;
            continue;
        };
        let mut record = FundFlowRecord::empty(date, code);
        for column in FlowColumn::ALL {
            record.set(column, row.get(fields.source_key(column)).and_then(coerce_f64));
        }
        records.push(record);
    }

    if dropped_rows > 0 {
        warn!("{code}: dropped {dropped_rows} row(s) without a parseable date");
    }

    records.sort_by_key(|r| r.date);

    Ok(Normalized {
        table: FundFlowTable {
            code: code.to_string(),
            records,
            missing_columns: missing,
        },
        dropped_rows,
    })
}

/// Coerce a JSON cell to a finite `f64`. Sina sends numbers as strings.
pub(crate) fn coerce_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() || s == "-" || s == "--" {
                None
            } else {
                s.parse::<f64>().ok()
            }
        }
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

/// Parse `2024-01-02`, `2024-01-02 15:00:00` or `20240102`.
pub(crate) fn parse_date(value: &Value) -> Option<NaiveDate> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let day = text.split_whitespace().next()?;
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(day, "%Y%m%d"))
        .ok()
}
