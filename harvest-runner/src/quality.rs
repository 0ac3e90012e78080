//! Data quality report over the merged tables.

use crate::collect::{CollectError, MergedTable};
use chrono::{DateTime, NaiveDate, Utc};
use harvest_core::domain::DataKind;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

/// Quality figures for one data kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KindQuality {
    pub kind: DataKind,
    pub files: usize,
    pub skipped_files: usize,
    pub records: usize,
    pub securities: usize,
    pub min_date: Option<NaiveDate>,
    pub max_date: Option<NaiveDate>,
    /// Null cells per column.
    pub null_counts: BTreeMap<String, usize>,
    /// Rows whose `(code, date)` key already appeared earlier.
    pub duplicate_keys: usize,
    /// BLAKE3 over the consolidated files (name, then bytes) in name order.
    pub content_hash: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityReport {
    pub generated_at: DateTime<Utc>,
    pub kdata: Option<KindQuality>,
    pub moneyflow: Option<KindQuality>,
}

impl QualityReport {
    pub fn new(kdata: Option<KindQuality>, moneyflow: Option<KindQuality>) -> Self {
        Self {
            generated_at: Utc::now(),
            kdata,
            moneyflow,
        }
    }

    pub fn write(&self, path: &Path) -> Result<(), CollectError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| CollectError::Io {
                op: "create",
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| CollectError::Io {
            op: "serialize",
            path: path.to_path_buf(),
            source: e.into(),
        })?;
        fs::write(path, json).map_err(|source| CollectError::Io {
            op: "write",
            path: path.to_path_buf(),
            source,
        })
    }
}

fn epoch() -> NaiveDate {
    NaiveDate::default()
}

pub fn assess(merged: &MergedTable) -> Result<KindQuality, CollectError> {
    let df = &merged.frame;
    let n = df.height();

    let codes = df.column("code")?.str()?;
    let dates = df.column("date")?.date()?;

    let mut distinct_codes = HashSet::new();
    let mut keys = HashSet::with_capacity(n);
    let mut duplicate_keys = 0;
    let mut min_days: Option<i32> = None;
    let mut max_days: Option<i32> = None;

    for i in 0..n {
        let code = codes.get(i);
        let day = dates.get(i);
        if let Some(code) = code {
            distinct_codes.insert(code);
        }
        if let Some(d) = day {
            min_days = Some(min_days.map_or(d, |m| m.min(d)));
            max_days = Some(max_days.map_or(d, |m| m.max(d)));
        }
        if !keys.insert((code, day)) {
            duplicate_keys += 1;
        }
    }

    let to_date = |days: i32| epoch() + chrono::Duration::days(days as i64);

    let null_counts = df
        .get_columns()
        .iter()
        .map(|c| (c.name().to_string(), c.null_count()))
        .collect();

    Ok(KindQuality {
        kind: merged.kind,
        files: merged.files.len(),
        skipped_files: merged.skipped.len(),
        records: n,
        securities: distinct_codes.len(),
        min_date: min_days.map(to_date),
        max_date: max_days.map(to_date),
        null_counts,
        duplicate_keys,
        content_hash: hash_files(&merged.files)?,
    })
}

fn hash_files(files: &[std::path::PathBuf]) -> Result<String, CollectError> {
    let mut sorted: Vec<_> = files.iter().collect();
    sorted.sort_by_key(|p| p.file_name().map(|n| n.to_os_string()));

    let mut hasher = blake3::Hasher::new();
    for path in sorted {
        let bytes = fs::read(path).map_err(|source| CollectError::Io {
            op: "read",
            path: path.clone(),
            source,
        })?;
        if let Some(name) = path.file_name() {
            hasher.update(name.to_string_lossy().as_bytes());
        }
        hasher.update(&bytes);
    }
    Ok(hasher.finalize().to_hex().to_string())
}
