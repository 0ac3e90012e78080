//! Shard orchestrator: runs every work item of one slice through the
//! enabled engines.
//!
//! Per item: fund-flow first, then kdata, each recorded on its own. An item
//! succeeds when any enabled engine returned `Ok`. The shard succeeds when
//! at least one item succeeded (or the slice was empty). Item errors are
//! logged and counted, never propagated; only a missing slice and a failed
//! session login abort the shard.

use crate::tasks::{SliceError, TaskSliceStore};
use harvest_core::data::{
    ArtifactStore, Completion, DataError, FundFlowEngine, KdataClient, KdataEngine, KdataSession,
};
use harvest_core::domain::WorkItem;
use log::{info, warn};
use thiserror::Error;

/// Conditions that end a shard before or instead of processing items.
#[derive(Debug, Error)]
pub enum ShardError {
    #[error(transparent)]
    Slice(#[from] SliceError),
    #[error("kdata session login failed: {0}")]
    SessionLogin(#[source] DataError),
    #[error("cannot prepare output directory: {0}")]
    Output(#[source] DataError),
}

/// Result of one engine for one item.
#[derive(Debug)]
pub enum EngineOutcome {
    Ok { rows: usize },
    Failed(DataError),
    /// Engine disabled for this run.
    Skipped,
}

impl EngineOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, EngineOutcome::Ok { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, EngineOutcome::Failed(_))
    }

    fn label(&self) -> String {
        match self {
            EngineOutcome::Ok { rows } => format!("{rows} rows"),
            EngineOutcome::Failed(e) => format!("failed ({e})"),
            EngineOutcome::Skipped => "skipped".into(),
        }
    }
}

#[derive(Debug)]
pub struct ItemOutcome {
    pub item: WorkItem,
    pub fund_flow: EngineOutcome,
    /// How fund-flow pagination ended, when it ran to completion.
    pub fund_flow_completion: Option<Completion>,
    pub kdata: EngineOutcome,
}

impl ItemOutcome {
    pub fn succeeded(&self) -> bool {
        self.fund_flow.is_ok() || self.kdata.is_ok()
    }
}

#[derive(Debug, Default)]
pub struct ShardSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Fund-flow results cut short by the page cap or a best-effort failure.
    pub incomplete: usize,
    pub outcomes: Vec<ItemOutcome>,
}

impl ShardSummary {
    /// An empty slice counts as success; otherwise at least one item must
    /// have succeeded.
    pub fn is_success(&self) -> bool {
        self.total == 0 || self.succeeded > 0
    }

    pub fn failed_codes(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| !o.succeeded())
            .map(|o| o.item.code.as_str())
            .collect()
    }
}

/// Progress callbacks for a shard run.
pub trait ShardProgress {
    fn on_start(&self, item: &WorkItem, index: usize, total: usize);

    fn on_complete(&self, outcome: &ItemOutcome, index: usize, total: usize);

    fn on_batch_complete(&self, summary: &ShardSummary);
}

/// Prints one line per item to stdout.
pub struct StdoutProgress;

impl ShardProgress for StdoutProgress {
    fn on_start(&self, item: &WorkItem, index: usize, total: usize) {
        println!("[{}/{}] {} {}", index + 1, total, item.code, item.name);
    }

    fn on_complete(&self, outcome: &ItemOutcome, _index: usize, _total: usize) {
        let status = if outcome.succeeded() { "OK" } else { "FAIL" };
        println!(
            "  {status}: {} fundflow={} kdata={}",
            outcome.item.code,
            outcome.fund_flow.label(),
            outcome.kdata.label()
        );
    }

    fn on_batch_complete(&self, summary: &ShardSummary) {
        println!(
            "\nShard complete: {}/{} succeeded, {} failed, {} incomplete fund-flow",
            summary.succeeded, summary.total, summary.failed, summary.incomplete
        );
    }
}

/// Engines and output for one shard run.
pub struct ShardRun<'a> {
    pub fund_flow: Option<&'a FundFlowEngine<'a>>,
    pub kdata: Option<(&'a mut dyn KdataClient, &'a KdataEngine)>,
    pub store: &'a ArtifactStore,
}

/// Load slice `index` and run it. A missing slice is [`ShardError::Slice`].
pub fn run_slice(
    slices: &TaskSliceStore,
    index: usize,
    run: ShardRun<'_>,
    progress: &dyn ShardProgress,
) -> Result<ShardSummary, ShardError> {
    let items = slices.load(index)?;
    info!("shard {index}: {} item(s) from {}", items.len(), slices.slice_path(index).display());
    run_shard(&items, run, progress)
}

/// Run `items` sequentially through the enabled engines.
///
/// The kdata session (when enabled) is opened once before the first item
/// and logged out when this function returns, whatever the outcome.
pub fn run_shard(
    items: &[WorkItem],
    run: ShardRun<'_>,
    progress: &dyn ShardProgress,
) -> Result<ShardSummary, ShardError> {
    let total = items.len();
    if total == 0 {
        warn!("task slice is empty; nothing to do");
        let summary = ShardSummary::default();
        progress.on_batch_complete(&summary);
        return Ok(summary);
    }

    let ShardRun {
        fund_flow,
        kdata,
        store,
    } = run;

    store.ensure_dirs().map_err(ShardError::Output)?;

    let kdata = match kdata {
        Some((client, engine)) => {
            let session = KdataSession::open(client).map_err(ShardError::SessionLogin)?;
            Some((session, engine))
        }
        None => None,
    };

    let mut summary = ShardSummary {
        total,
        ..ShardSummary::default()
    };

    for (i, item) in items.iter().enumerate() {
        progress.on_start(item, i, total);

        let (fund_flow_outcome, completion) = match fund_flow {
            Some(engine) => match engine.download(&item.code, store) {
                Ok(report) => (
                    EngineOutcome::Ok { rows: report.rows },
                    Some(report.completion),
                ),
                Err(e) => {
                    warn!("{}: fund-flow failed: {e}", item.code);
                    (EngineOutcome::Failed(e), None)
                }
            },
            None => (EngineOutcome::Skipped, None),
        };

        let kdata_outcome = match &kdata {
            Some((session, engine)) => match engine.download(session, &item.code, store) {
                Ok(rows) => EngineOutcome::Ok { rows },
                Err(e) => {
                    warn!("{}: kdata failed: {e}", item.code);
                    EngineOutcome::Failed(e)
                }
            },
            None => EngineOutcome::Skipped,
        };

        let outcome = ItemOutcome {
            item: item.clone(),
            fund_flow: fund_flow_outcome,
            fund_flow_completion: completion,
            kdata: kdata_outcome,
        };

        if outcome.succeeded() {
            summary.succeeded += 1;
        } else {
            summary.failed += 1;
        }
        if matches!(
            outcome.fund_flow_completion,
            Some(Completion::Truncated { .. } | Completion::Partial { .. })
        ) {
            summary.incomplete += 1;
        }

        progress.on_complete(&outcome, i, total);
        summary.outcomes.push(outcome);
    }

    drop(kdata);

    info!(
        "shard finished: {}/{} items succeeded",
        summary.succeeded, summary.total
    );
    progress.on_batch_complete(&summary);
    Ok(summary)
}
