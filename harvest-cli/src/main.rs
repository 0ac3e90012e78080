//! Harvest CLI: plan, download and collect commands.
//!
//! Commands:
//! - `plan`: split a securities listing into `task_slice_{i}.json` files
//! - `download`: run one shard: fund-flow and kdata for every item of a slice
//! - `collect`: consolidate shard outputs, merge, and write the quality report

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use harvest_core::data::{
    ArtifactStore, CircuitBreaker, FlowPageSource, FundFlowEngine, KdataClient, KdataEngine,
    SinaFlowClient, SinaKlineClient,
};
use harvest_core::domain::DataKind;
use harvest_runner::{
    assess, collect_kind, load_universe, plan_slices, run_slice, HarvestConfig, QualityReport,
    ShardRun, StdoutProgress, TaskSliceStore,
};
use log::info;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "harvest",
    about = "Harvest CLI: sharded A-share kdata and fund-flow acquisition"
)]
struct Cli {
    /// Pipeline config (TOML). Built-in defaults when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split a securities listing into task slices.
    Plan {
        /// JSON array of {"code", "name"} objects.
        universe: PathBuf,

        /// Directory for the slice files. Overrides paths.tasks_dir.
        #[arg(long)]
        tasks_dir: Option<PathBuf>,

        /// Number of slices. Overrides plan.task_count.
        #[arg(long)]
        task_count: Option<usize>,

        /// Keep only the first N eligible securities.
        #[arg(long)]
        limit: Option<usize>,

        /// Shuffle seed for a reproducible plan.
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Download fund-flow and kdata for every item of one task slice.
    Download {
        /// Slice to process.
        #[arg(long, env = "TASK_INDEX", default_value_t = 0)]
        task_index: usize,

        /// Directory holding the slice files. Overrides paths.tasks_dir.
        #[arg(long)]
        tasks_dir: Option<PathBuf>,

        /// Artifact root for this shard. Overrides paths.output_root.
        #[arg(long)]
        output_root: Option<PathBuf>,

        /// Do not fetch daily price history.
        #[arg(long, default_value_t = false)]
        skip_kdata: bool,

        /// Do not fetch fund-flow history.
        #[arg(long, default_value_t = false)]
        skip_fundflow: bool,
    },
    /// Consolidate shard outputs and write the quality report.
    Collect {
        /// Directory holding the shard outputs. Overrides collect.input_base.
        #[arg(long)]
        input_base: Option<PathBuf>,

        /// Also write each merged table as one Parquet file.
        #[arg(long, default_value_t = false)]
        write_merged: bool,

        /// Skip the quality report.
        #[arg(long, default_value_t = false)]
        no_report: bool,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Plan {
            universe,
            tasks_dir,
            task_count,
            limit,
            seed,
        } => run_plan(config, &universe, tasks_dir, task_count, limit, seed),
        Commands::Download {
            task_index,
            tasks_dir,
            output_root,
            skip_kdata,
            skip_fundflow,
        } => run_download(
            config,
            task_index,
            tasks_dir,
            output_root,
            skip_kdata,
            skip_fundflow,
        ),
        Commands::Collect {
            input_base,
            write_merged,
            no_report,
        } => run_collect(config, input_base, write_merged, no_report),
    }
}

fn load_config(path: Option<&Path>) -> Result<HarvestConfig> {
    match path {
        Some(path) => {
            let config = HarvestConfig::from_file(path)?;
            info!("loaded config from {}", path.display());
            Ok(config)
        }
        None => Ok(HarvestConfig::default()),
    }
}

fn run_plan(
    mut config: HarvestConfig,
    universe: &Path,
    tasks_dir: Option<PathBuf>,
    task_count: Option<usize>,
    limit: Option<usize>,
    seed: Option<u64>,
) -> Result<()> {
    if let Some(dir) = tasks_dir {
        config.paths.tasks_dir = dir;
    }
    if let Some(n) = task_count {
        config.plan.task_count = n;
    }
    config.plan.limit = limit.or(config.plan.limit);
    config.plan.seed = seed.or(config.plan.seed);
    config.validate()?;

    let items = load_universe(universe)?;
    let slices = plan_slices(
        items,
        config.plan.task_count,
        config.plan.limit,
        config.plan.seed,
    )?;
    let planned: usize = slices.iter().map(Vec::len).sum();

    let store = TaskSliceStore::new(&config.paths.tasks_dir);
    let written = store.write_all(&slices)?;
    println!(
        "Planned {planned} securities into {} slices of up to {} in {}",
        written.len(),
        slices.first().map_or(0, Vec::len),
        store.dir().display()
    );
    Ok(())
}

fn run_download(
    mut config: HarvestConfig,
    task_index: usize,
    tasks_dir: Option<PathBuf>,
    output_root: Option<PathBuf>,
    skip_kdata: bool,
    skip_fundflow: bool,
) -> Result<()> {
    if let Some(dir) = tasks_dir {
        config.paths.tasks_dir = dir;
    }
    if let Some(dir) = output_root {
        config.paths.output_root = dir;
    }
    if skip_kdata {
        config.kdata.enabled = false;
    }
    if skip_fundflow {
        config.fund_flow.enabled = false;
    }
    if !config.kdata.enabled && !config.fund_flow.enabled {
        bail!("both fund-flow and kdata are disabled; nothing to download");
    }

    // One breaker per endpoint: a block on one does not stop the other.
    let flow_client = SinaFlowClient::new(
        config.fund_flow.request_timeout(),
        Arc::new(CircuitBreaker::default_provider()),
    )?;
    let flow_source: &dyn FlowPageSource = &flow_client;
    let flow_engine = FundFlowEngine::new(flow_source, config.fund_flow.clone());

    let mut kdata_client = SinaKlineClient::new(
        config.kdata.request_timeout(),
        config.kdata.datalen,
        Arc::new(CircuitBreaker::default_provider()),
    );
    let kdata_engine = KdataEngine::new(&config.kdata);

    let store = ArtifactStore::new(&config.paths.output_root);
    let slices = TaskSliceStore::new(&config.paths.tasks_dir);

    let kdata: Option<(&mut dyn KdataClient, &KdataEngine)> = if config.kdata.enabled {
        Some((&mut kdata_client, &kdata_engine))
    } else {
        None
    };
    let run = ShardRun {
        fund_flow: config.fund_flow.enabled.then_some(&flow_engine),
        kdata,
        store: &store,
    };

    info!("shard {task_index} starting");
    let summary = match run_slice(&slices, task_index, run, &StdoutProgress) {
        Ok(summary) => summary,
        Err(e) => {
            eprintln!("Fatal: shard {task_index}: {e}");
            std::process::exit(1);
        }
    };

    if !summary.is_success() {
        for outcome in summary.outcomes.iter().filter(|o| !o.succeeded()) {
            eprintln!("Error for {}: no engine succeeded", outcome.item.code);
        }
        std::process::exit(1);
    }

    println!(
        "Shard {task_index} done: {}/{} items -> {}",
        summary.succeeded,
        summary.total,
        store.root().display()
    );
    Ok(())
}

fn run_collect(
    mut config: HarvestConfig,
    input_base: Option<PathBuf>,
    write_merged: bool,
    no_report: bool,
) -> Result<()> {
    if let Some(dir) = input_base {
        config.collect.input_base = dir;
    }
    config.collect.write_merged |= write_merged;

    let kdata = collect_kind(DataKind::Kdata, &config.collect)?;
    let moneyflow = collect_kind(DataKind::MoneyFlow, &config.collect)?;

    for merged in [&kdata, &moneyflow].into_iter().flatten() {
        println!(
            "{}: {} rows from {} file(s) in {}",
            merged.kind,
            merged.frame.height(),
            merged.files.len(),
            config.collect.output_dir(merged.kind).display()
        );
    }

    if no_report {
        return Ok(());
    }

    let report = QualityReport::new(
        kdata.as_ref().map(assess).transpose()?,
        moneyflow.as_ref().map(assess).transpose()?,
    );
    report.write(&config.collect.report_path)?;
    println!(
        "Quality report written to {}",
        config.collect.report_path.display()
    );
    Ok(())
}
