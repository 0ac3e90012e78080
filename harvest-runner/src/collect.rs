//! Collector/merger: gathers shard artifacts into one consolidated
//! directory per data kind and concatenates them.
//!
//! Input layout: `{input_base}/{part_prefix}*/{kind}/*.parquet`, one
//! directory per downloaded shard. The consolidated directory is removed
//! and rebuilt on every run.

use crate::config::CollectConfig;
use harvest_core::data::artifact::{list_artifacts, write_parquet_atomic};
use harvest_core::data::{CanonicalSchema, DataError};
use harvest_core::domain::DataKind;
use log::{info, warn};
use polars::prelude::*;
use rayon::prelude::*;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("merge failed: {0}")]
    Polars(#[from] PolarsError),
    #[error(transparent)]
    Data(#[from] DataError),
}

fn io_err<'a>(
    op: &'static str,
    path: &'a Path,
) -> impl FnOnce(std::io::Error) -> CollectError + 'a {
    move |source| CollectError::Io {
        op,
        path: path.to_path_buf(),
        source,
    }
}

/// All artifacts of one kind, concatenated.
#[derive(Debug)]
pub struct MergedTable {
    pub kind: DataKind,
    /// Consolidated copies, sorted by path.
    pub files: Vec<PathBuf>,
    /// Source files that could not be copied or read, with the reason.
    pub skipped: Vec<(PathBuf, String)>,
    pub frame: DataFrame,
    /// Set when the merged table was also written to disk.
    pub merged_path: Option<PathBuf>,
}

/// Shard artifacts of `kind` under `input_base`, sorted by path.
pub fn find_part_artifacts(
    input_base: &Path,
    part_prefix: &str,
    kind: DataKind,
) -> Result<Vec<PathBuf>, CollectError> {
    if !input_base.is_dir() {
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(input_base).map_err(io_err("read dir", input_base))?;

    let mut parts = Vec::new();
    for entry in entries {
        let entry = entry.map_err(io_err("read dir", input_base))?;
        let is_part = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(part_prefix));
        if is_part && entry.path().is_dir() {
            parts.push(entry.path());
        }
    }
    parts.sort();

    let mut files = Vec::new();
    for part in parts {
        files.extend(list_artifacts(&part.join(kind.dir_name()))?);
    }
    Ok(files)
}

/// Project one artifact onto the canonical columns of `kind`, casting
/// present columns and filling absent ones with nulls.
pub fn align_to_schema(df: DataFrame, kind: DataKind) -> LazyFrame {
    let exprs: Vec<Expr> = CanonicalSchema::fields(kind)
        .into_iter()
        .map(|(name, dtype)| {
            if df.get_column_index(name).is_some() {
                col(name).cast(dtype)
            } else {
                lit(NULL).cast(dtype).alias(name)
            }
        })
        .collect();
    df.lazy().select(exprs)
}

fn read_parquet(path: &Path) -> Result<DataFrame, String> {
    let file = fs::File::open(path).map_err(|e| format!("open: {e}"))?;
    ParquetReader::new(file)
        .finish()
        .map_err(|e| format!("read: {e}"))
}

/// Rebuild the consolidated directory for `kind` and merge its artifacts.
///
/// Returns `None` when no shard produced any artifact of this kind.
pub fn collect_kind(
    kind: DataKind,
    config: &CollectConfig,
) -> Result<Option<MergedTable>, CollectError> {
    let output_dir = config.output_dir(kind);
    if output_dir.exists() {
        fs::remove_dir_all(output_dir).map_err(io_err("remove", output_dir))?;
    }
    fs::create_dir_all(output_dir).map_err(io_err("create", output_dir))?;

    let sources = find_part_artifacts(&config.input_base, &config.part_prefix, kind)?;
    if sources.is_empty() {
        warn!(
            "no {kind} artifacts under {}/{}*/{kind}",
            config.input_base.display(),
            config.part_prefix
        );
        return Ok(None);
    }
    info!("collecting {} {kind} artifact(s)", sources.len());

    let mut skipped = Vec::new();
    let mut copied: Vec<PathBuf> = Vec::new();
    let mut seen = HashSet::new();
    for src in &sources {
        let Some(name) = src.file_name() else {
            continue;
        };
        if !seen.insert(name.to_os_string()) {
            warn!(
                "{} appears in more than one shard; the later copy wins",
                name.to_string_lossy()
            );
        }
        let dest = output_dir.join(name);
        match fs::copy(src, &dest) {
            Ok(_) => copied.push(dest),
            Err(e) => {
                warn!("skipping {}: copy failed: {e}", src.display());
                skipped.push((src.clone(), format!("copy: {e}")));
            }
        }
    }
    copied.sort();
    copied.dedup();

    let loaded: Vec<(PathBuf, Result<DataFrame, String>)> = sources
        .par_iter()
        .filter(|src| !skipped.iter().any(|(p, _)| p == *src))
        .map(|src| (src.clone(), read_parquet(src)))
        .collect();

    let mut frames = Vec::with_capacity(loaded.len());
    for (src, result) in loaded {
        match result {
            Ok(df) => frames.push(align_to_schema(df, kind)),
            Err(reason) => {
                warn!("skipping {}: {reason}", src.display());
                skipped.push((src, reason));
            }
        }
    }

    let frame = if frames.is_empty() {
        DataFrame::empty_with_schema(&CanonicalSchema::schema(kind))
    } else {
        concat(frames, UnionArgs::default())?.collect()?
    };
    info!(
        "{kind}: {} rows from {} file(s), {} skipped",
        frame.height(),
        copied.len(),
        skipped.len()
    );

    let merged_path = if config.write_merged {
        let path = config.merged_path(kind);
        write_parquet_atomic(frame.clone(), &path)?;
        info!("{kind}: merged table -> {}", path.display());
        Some(path)
    } else {
        None
    };

    Ok(Some(MergedTable {
        kind,
        files: copied,
        skipped,
        frame,
        merged_path,
    }))
}
