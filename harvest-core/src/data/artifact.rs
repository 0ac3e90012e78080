//! Per-security Parquet artifacts.
//!
//! Layout: `{root}/{kind}/{code}.parquet`, e.g. `data_slice/moneyflow/sh.600000.parquet`
//!
//! - Every write replaces the previous artifact for that code (no merge).
//! - Writes are atomic: write to `.tmp`, then rename into place.
//! - Reads validate against the canonical schema before converting rows.

use super::provider::DataError;
use super::schema::CanonicalSchema;
use crate::domain::{DataKind, FlowColumn, FundFlowRecord, FundFlowTable, KdataBar};
use chrono::NaiveDate;
use polars::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

pub const ARTIFACT_EXT: &str = "parquet";

/// Artifact store rooted at one shard-local output directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn kind_dir(&self, kind: DataKind) -> PathBuf {
        self.root.join(kind.dir_name())
    }

    pub fn artifact_path(&self, kind: DataKind, code: &str) -> PathBuf {
        self.kind_dir(kind).join(format!("{code}.{ARTIFACT_EXT}"))
    }

    /// Create the directory for each data kind.
    pub fn ensure_dirs(&self) -> Result<(), DataError> {
        for kind in DataKind::ALL {
            fs::create_dir_all(self.kind_dir(kind))
                .map_err(|e| DataError::ArtifactError(format!("failed to create dir: {e}")))?;
        }
        Ok(())
    }

    pub fn exists(&self, kind: DataKind, code: &str) -> bool {
        self.artifact_path(kind, code).is_file()
    }

    /// Persist a fund-flow table, replacing any previous artifact.
    ///
    /// Columns listed in `missing_columns` are left out of the file.
    pub fn write_fund_flow(&self, table: &FundFlowTable) -> Result<PathBuf, DataError> {
        if table.is_empty() {
            return Err(DataError::ArtifactError(format!(
                "no fund-flow rows to persist for {}",
                table.code
            )));
        }
        let df = flow_to_dataframe(table)?;
        let path = self.artifact_path(DataKind::MoneyFlow, &table.code);
        write_parquet_atomic(df, &path)?;
        Ok(path)
    }

    /// Persist daily bars for one code, replacing any previous artifact.
    pub fn write_kdata(&self, code: &str, bars: &[KdataBar]) -> Result<PathBuf, DataError> {
        if bars.is_empty() {
            return Err(DataError::ArtifactError(format!(
                "no kdata bars to persist for {code}"
            )));
        }
        let df = kdata_to_dataframe(bars)?;
        let path = self.artifact_path(DataKind::Kdata, code);
        write_parquet_atomic(df, &path)?;
        Ok(path)
    }

    /// Delete the artifact for `code`, if any. Returns whether a file was removed.
    pub fn remove(&self, kind: DataKind, code: &str) -> Result<bool, DataError> {
        let path = self.artifact_path(kind, code);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(DataError::ArtifactError(format!(
                "failed to remove {}: {e}",
                path.display()
            ))),
        }
    }

    /// All artifacts of one kind, sorted by path. A missing directory is empty.
    pub fn list(&self, kind: DataKind) -> Result<Vec<PathBuf>, DataError> {
        list_artifacts(&self.kind_dir(kind))
    }
}

/// Parquet files directly inside `dir`, sorted. Temp files are skipped.
pub fn list_artifacts(dir: &Path) -> Result<Vec<PathBuf>, DataError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let entries =
        fs::read_dir(dir).map_err(|e| DataError::ArtifactError(format!("read dir: {e}")))?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| DataError::ArtifactError(format!("dir entry: {e}")))?;
        let path = entry.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(ARTIFACT_EXT) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Code encoded in an artifact file name (`sh.600000.parquet` → `sh.600000`).
pub fn artifact_code(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string())
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn epoch() -> NaiveDate {
    // chrono's default date is 1970-01-01
    NaiveDate::default()
}

fn date_column(dates: impl Iterator<Item = NaiveDate>) -> Result<Column, DataError> {
    let days: Vec<i32> = dates.map(|d| (d - epoch()).num_days() as i32).collect();
    Column::new("date".into(), days)
        .cast(&DataType::Date)
        .map_err(|e| DataError::ParquetError(format!("date cast: {e}")))
}

fn flow_to_dataframe(table: &FundFlowTable) -> Result<DataFrame, DataError> {
    let mut columns = vec![date_column(table.records.iter().map(|r| r.date))?];
    for column in table.present_columns() {
        let values: Vec<Option<f64>> = table.records.iter().map(|r| r.value(column)).collect();
        columns.push(Column::new(column.name().into(), values));
    }
    let codes: Vec<&str> = table.records.iter().map(|r| r.code.as_str()).collect();
    columns.push(Column::new("code".into(), codes));

    DataFrame::new(columns).map_err(|e| DataError::ParquetError(format!("dataframe creation: {e}")))
}

fn kdata_to_dataframe(bars: &[KdataBar]) -> Result<DataFrame, DataError> {
    let codes: Vec<&str> = bars.iter().map(|b| b.code.as_str()).collect();
    let series = |name: &str, f: fn(&KdataBar) -> Option<f64>| {
        Column::new(name.into(), bars.iter().map(f).collect::<Vec<_>>())
    };

    DataFrame::new(vec![
        date_column(bars.iter().map(|b| b.date))?,
        Column::new("code".into(), codes),
        series("open", |b| b.open),
        series("high", |b| b.high),
        series("low", |b| b.low),
        series("close", |b| b.close),
        series("preclose", |b| b.preclose),
        series("volume", |b| b.volume),
        series("pct_change", |b| b.pct_change),
    ])
    .map_err(|e| DataError::ParquetError(format!("dataframe creation: {e}")))
}

/// Write a DataFrame to `path` via a sibling temp file.
pub fn write_parquet_atomic(mut df: DataFrame, path: &Path) -> Result<(), DataError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| DataError::ArtifactError(format!("failed to create dir: {e}")))?;
    }
    let tmp_path = path.with_extension(format!("{ARTIFACT_EXT}.tmp"));

    let file = fs::File::create(&tmp_path)
        .map_err(|e| DataError::ParquetError(format!("create file: {e}")))?;
    if let Err(e) = ParquetWriter::new(file).finish(&mut df) {
        let _ = fs::remove_file(&tmp_path);
        return Err(DataError::ParquetError(format!("write parquet: {e}")));
    }

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        DataError::ArtifactError(format!("atomic rename failed: {e}"))
    })
}

/// Read a Parquet file and check it against the canonical schema of `kind`.
pub fn read_artifact(path: &Path, kind: DataKind) -> Result<DataFrame, DataError> {
    let file = fs::File::open(path).map_err(|e| DataError::ParquetError(format!("open: {e}")))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| DataError::ParquetError(format!("read: {e}")))?;
    CanonicalSchema::validate(&df, kind).map_err(|e| {
        DataError::ValidationError(format!("{}: {e}", path.display()))
    })?;
    Ok(df)
}

fn column_err(name: &str) -> impl Fn(PolarsError) -> DataError + '_ {
    move |e| DataError::ParquetError(format!("{name} column: {e}"))
}

fn read_dates(df: &DataFrame) -> Result<Vec<NaiveDate>, DataError> {
    let dates = df.column("date").map_err(column_err("date"))?;
    let date_ca = dates.date().map_err(column_err("date"))?;
    (0..df.height())
        .map(|i| {
            date_ca
                .get(i)
                .map(|days| epoch() + chrono::Duration::days(days as i64))
                .ok_or_else(|| DataError::ParquetError(format!("null date at row {i}")))
        })
        .collect()
}

fn read_codes(df: &DataFrame) -> Result<Vec<String>, DataError> {
    let codes = df.column("code").map_err(column_err("code"))?;
    let code_ca = codes.str().map_err(column_err("code"))?;
    (0..df.height())
        .map(|i| {
            code_ca
                .get(i)
                .map(str::to_string)
                .ok_or_else(|| DataError::ParquetError(format!("null code at row {i}")))
        })
        .collect()
}

/// Values of an optional Float64 column; `None` when the column is absent.
fn read_optional_f64(df: &DataFrame, name: &str) -> Result<Option<Vec<Option<f64>>>, DataError> {
    let Ok(column) = df.column(name) else {
        return Ok(None);
    };
    let ca = column.f64().map_err(column_err(name))?;
    Ok(Some((0..df.height()).map(|i| ca.get(i)).collect()))
}

/// Load a fund-flow artifact back into a table.
pub fn read_fund_flow(path: &Path) -> Result<FundFlowTable, DataError> {
    let df = read_artifact(path, DataKind::MoneyFlow)?;
    let dates = read_dates(&df)?;
    let codes = read_codes(&df)?;

    let mut records: Vec<FundFlowRecord> = dates
        .into_iter()
        .zip(codes)
        .map(|(date, code)| FundFlowRecord::empty(date, code))
        .collect();

    let mut missing_columns = Vec::new();
    for column in FlowColumn::ALL {
        match read_optional_f64(&df, column.name())? {
            Some(values) => {
                for (record, value) in records.iter_mut().zip(values) {
                    record.set(column, value);
                }
            }
            None => missing_columns.push(column),
        }
    }

    let code = records
        .first()
        .map(|r| r.code.clone())
        .or_else(|| artifact_code(path))
        .unwrap_or_default();

    Ok(FundFlowTable {
        code,
        records,
        missing_columns,
    })
}

/// Load a kdata artifact back into bars.
pub fn read_kdata(path: &Path) -> Result<Vec<KdataBar>, DataError> {
    let df = read_artifact(path, DataKind::Kdata)?;
    let dates = read_dates(&df)?;
    let codes = read_codes(&df)?;
    let n = df.height();
    let values = |name: &str| -> Result<Vec<Option<f64>>, DataError> {
        Ok(read_optional_f64(&df, name)?.unwrap_or_else(|| vec![None; n]))
    };
    let (open, high, low, close) = (
        values("open")?,
        values("high")?,
        values("low")?,
        values("close")?,
    );
    let (preclose, volume, pct_change) = (
        values("preclose")?,
        values("volume")?,
        values("pct_change")?,
    );

    Ok((0..n)
        .map(|i| KdataBar {
            date: dates[i],
            code: codes[i].clone(),
            open: open[i],
            high: high[i],
            low: low[i],
            close: close[i],
            preclose: preclose[i],
            volume: volume[i],
            pct_change: pct_change[i],
        })
        .collect())
}
