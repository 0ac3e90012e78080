//! Task slices: planning the universe into shards and loading one shard.
//!
//! A slice file is a JSON array of `{code, name}` objects stored as
//! `{tasks_dir}/task_slice_{index}.json`. Shard `i` reads exactly slice `i`.

use harvest_core::domain::WorkItem;
use log::{info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SliceError {
    #[error("task slice file not found: {0}")]
    NotFound(PathBuf),
    #[error("read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed task slice {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("task_count must be > 0")]
    ZeroTaskCount,
}

/// Slice files under one tasks directory.
#[derive(Debug, Clone)]
pub struct TaskSliceStore {
    dir: PathBuf,
}

impl TaskSliceStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn slice_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("task_slice_{index}.json"))
    }

    /// Load the work items of slice `index`. A missing file is
    /// [`SliceError::NotFound`].
    pub fn load(&self, index: usize) -> Result<Vec<WorkItem>, SliceError> {
        let path = self.slice_path(index);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SliceError::NotFound(path))
            }
            Err(source) => return Err(SliceError::Io { path, source }),
        };
        serde_json::from_str(&content).map_err(|source| SliceError::Malformed { path, source })
    }

    /// Write every slice, replacing existing files. Returns the paths written.
    pub fn write_all(&self, slices: &[Vec<WorkItem>]) -> Result<Vec<PathBuf>, SliceError> {
        fs::create_dir_all(&self.dir).map_err(|source| SliceError::Io {
            path: self.dir.clone(),
            source,
        })?;
        slices
            .iter()
            .enumerate()
            .map(|(i, items)| {
                let path = self.slice_path(i);
                let json = serde_json::to_string(items).map_err(|source| SliceError::Malformed {
                    path: path.clone(),
                    source,
                })?;
                fs::write(&path, json).map_err(|source| SliceError::Io {
                    path: path.clone(),
                    source,
                })?;
                Ok(path)
            })
            .collect()
    }
}

/// Read a universe listing (`[{code, name}, ...]`).
pub fn load_universe(path: &Path) -> Result<Vec<WorkItem>, SliceError> {
    let content = fs::read_to_string(path).map_err(|source| SliceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| SliceError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}

/// Shanghai/Shenzhen listings that are not special-treatment or delisting.
pub fn is_eligible(item: &WorkItem) -> bool {
    (item.code.starts_with("sh.") || item.code.starts_with("sz."))
        && !item.name.contains("ST")
        && !item.name.contains('退')
}

/// Filter, cap, shuffle and split `universe` into `task_count` slices of
/// `ceil(n / task_count)` items. Trailing slices may be empty.
pub fn plan_slices(
    universe: Vec<WorkItem>,
    task_count: usize,
    limit: Option<usize>,
    seed: Option<u64>,
) -> Result<Vec<Vec<WorkItem>>, SliceError> {
    if task_count == 0 {
        return Err(SliceError::ZeroTaskCount);
    }

    let total = universe.len();
    let mut items: Vec<WorkItem> = universe.into_iter().filter(is_eligible).collect();
    info!("{} of {total} securities eligible", items.len());

    if let Some(limit) = limit {
        if items.len() > limit {
            warn!("limiting plan to the first {limit} securities");
            items.truncate(limit);
        }
    }

    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    items.shuffle(&mut rng);

    let chunk = items.len().div_ceil(task_count);
    let mut slices = Vec::with_capacity(task_count);
    let mut rest = items.into_iter();
    for _ in 0..task_count {
        slices.push(rest.by_ref().take(chunk).collect());
    }
    Ok(slices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn universe(n: usize) -> Vec<WorkItem> {
        (0..n)
            .map(|i| WorkItem::new(format!("sh.{:06}", 600000 + i), format!("name{i}")))
            .collect()
    }

    #[test]
    fn eligibility_filters_exchange_and_names() {
        assert!(is_eligible(&WorkItem::new("sh.600000", "浦发银行")));
        assert!(is_eligible(&WorkItem::new("sz.000001", "平安银行")));
        assert!(!is_eligible(&WorkItem::new("bj.430047", "诺思兰德")));
        assert!(!is_eligible(&WorkItem::new("sh.000001", "*ST海润")));
        assert!(!is_eligible(&WorkItem::new("sz.000003", "PT金田A退")));
    }

    #[test]
    fn slices_partition_the_universe() {
        let slices = plan_slices(universe(45), 20, None, Some(7)).unwrap();
        assert_eq!(slices.len(), 20);
        assert!(slices[..15].iter().all(|s| s.len() == 3));
        assert!(slices[15..].iter().all(|s| s.is_empty()));

        let codes: BTreeSet<String> = slices.iter().flatten().map(|w| w.code.clone()).collect();
        assert_eq!(codes.len(), 45);
    }

    #[test]
    fn seed_makes_plan_reproducible() {
        let a = plan_slices(universe(30), 4, None, Some(42)).unwrap();
        let b = plan_slices(universe(30), 4, None, Some(42)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn limit_applies_before_shuffle() {
        let slices = plan_slices(universe(50), 3, Some(10), Some(1)).unwrap();
        let codes: BTreeSet<String> = slices.iter().flatten().map(|w| w.code.clone()).collect();
        let expected: BTreeSet<String> = universe(10).into_iter().map(|w| w.code).collect();
        assert_eq!(codes, expected);
    }

    #[test]
    fn zero_task_count_is_rejected() {
        assert!(matches!(
            plan_slices(universe(3), 0, None, None),
            Err(SliceError::ZeroTaskCount)
        ));
    }

    #[test]
    fn write_then_load_each_slice() {
        let dir = TempDir::new().unwrap();
        let store = TaskSliceStore::new(dir.path().join("tasks"));
        let slices = plan_slices(universe(5), 3, None, Some(3)).unwrap();

        let written = store.write_all(&slices).unwrap();
        assert_eq!(written.len(), 3);
        assert_eq!(written[2], dir.path().join("tasks/task_slice_2.json"));

        for (i, slice) in slices.iter().enumerate() {
            assert_eq!(&store.load(i).unwrap(), slice);
        }
    }

    #[test]
    fn missing_slice_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = TaskSliceStore::new(dir.path());
        assert!(matches!(store.load(3), Err(SliceError::NotFound(_))));
    }

    #[test]
    fn malformed_slice_is_reported() {
        let dir = TempDir::new().unwrap();
        let store = TaskSliceStore::new(dir.path());
        fs::write(store.slice_path(0), "{\"code\": 1}").unwrap();
        assert!(matches!(store.load(0), Err(SliceError::Malformed { .. })));
    }

    #[test]
    fn slice_json_uses_code_and_name() {
        let dir = TempDir::new().unwrap();
        let store = TaskSliceStore::new(dir.path());
        fs::write(
            store.slice_path(0),
            r#"[{"code":"sh.600000","name":"浦发银行"},{"code":"sz.000001","name":"平安银行"}]"#,
        )
        .unwrap();
        let items = store.load(0).unwrap();
        assert_eq!(items[1], WorkItem::new("sz.000001", "平安银行"));
    }
}
