//! Panelfold CLI: ingestion, lineage, view and classification commands.
//!
//! Commands:
//! - `ingest` — fold wide CSV sources into long-format Parquet partitions
//! - `lineage show` — print the lineage ledger, optionally as CSV
//! - `lineage rebuild` — re-catalog every committed partition
//! - `view history|pit|current` — query the store, optionally pivoted wide
//! - `classify` — print the metric identifier for block titles

mod bootstrap;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

use panelfold_core::domain::{LineageRecord, LineageStatus};
use panelfold_core::store::{LineageLedger, ParquetStore};
use panelfold_core::transform::classify;
use panelfold_runner::{
    export_lineage_csv, export_view_csv, export_wide_csv, rebuild_ledger, wide_file_name,
    wide_tables, write_csv, DatasetViews, IngestConfig, Pipeline, RunSummary,
};

#[derive(Parser)]
#[command(
    name = "panelfold",
    about = "Panelfold — wide-to-long ingestion of financial panel data"
)]
struct Cli {
    /// Path to a TOML config file. Defaults apply to every missing section.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output root for partitions, ledger and run manifests.
    #[arg(long, global = true)]
    out: Option<PathBuf>,

    /// Log filter (trace, debug, info, warn, error). Overrides RUST_LOG.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest wide-format CSV sources. Directories are expanded to their CSV files.
    Ingest {
        /// Source files or directories.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Snapshot date (YYYY-MM-DD) for every file, instead of the filename prefix.
        #[arg(long)]
        snapshot_date: Option<String>,

        /// Additional missing-value sentinel (repeatable), e.g. --sentinel -99.99
        #[arg(long = "sentinel")]
        sentinels: Vec<String>,

        /// Process files one at a time instead of in parallel.
        #[arg(long, default_value_t = false)]
        sequential: bool,
    },
    /// Lineage ledger commands.
    Lineage {
        #[command(subcommand)]
        action: LineageAction,
    },
    /// Query views over the store.
    View {
        #[command(subcommand)]
        which: ViewKind,
    },
    /// Print the metric identifier each block title classifies to.
    Classify {
        #[arg(required = true)]
        titles: Vec<String>,
    },
}

#[derive(Subcommand)]
enum LineageAction {
    /// Print the ledger.
    Show {
        /// Write the ledger as CSV to this path instead of printing it.
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Rebuild the ledger by re-cataloging every committed partition.
    Rebuild,
}

#[derive(Subcommand)]
enum ViewKind {
    /// Every record across all snapshots.
    History(ViewArgs),
    /// Only records of one snapshot date.
    Pit {
        /// Snapshot date (YYYY-MM-DD).
        date: String,

        #[command(flatten)]
        args: ViewArgs,
    },
    /// Per dataset, only the latest snapshot.
    Current(ViewArgs),
}

#[derive(Args)]
struct ViewArgs {
    /// Write CSV here. With --wide this is a directory, one file per table.
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Pivot back to wide tables, one per dataset, snapshot and metric.
    #[arg(long, default_value_t = false)]
    wide: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Classify { titles } = &cli.command {
        for title in titles {
            println!("{}\t{}", classify(title), title);
        }
        return Ok(());
    }

    let config = load_config(cli.config.as_deref(), cli.out)?;
    bootstrap::setup_logging(cli.log_level.as_deref(), &config.run.log_level)?;

    match cli.command {
        Commands::Ingest {
            files,
            snapshot_date,
            sentinels,
            sequential,
        } => run_ingest(config, files, snapshot_date, sentinels, sequential),
        Commands::Lineage { action } => {
            let store = ParquetStore::new(&config.output.root);
            match action {
                LineageAction::Show { csv } => run_lineage_show(&store, csv),
                LineageAction::Rebuild => run_lineage_rebuild(&store),
            }
        }
        Commands::View { which } => {
            let store = ParquetStore::new(&config.output.root);
            run_view(&store, which)
        }
        Commands::Classify { .. } => Ok(()),
    }
}

fn load_config(path: Option<&Path>, out: Option<PathBuf>) -> Result<IngestConfig> {
    let mut config = match path {
        Some(p) => IngestConfig::from_file(p)
            .with_context(|| format!("failed to load config {}", p.display()))?,
        None => IngestConfig::default(),
    };
    if let Some(out) = out {
        config.output.root = out;
    }
    Ok(config)
}

// ── ingest ─────────────────────────────────────────────────────────────────────

fn run_ingest(
    mut config: IngestConfig,
    files: Vec<PathBuf>,
    snapshot_date: Option<String>,
    sentinels: Vec<String>,
    sequential: bool,
) -> Result<()> {
    for s in sentinels {
        if !config.missing_values.sentinels.contains(&s) {
            config.missing_values.sentinels.push(s);
        }
    }
    if sequential {
        config.run.parallel = false;
    }
    config.validate()?;

    let sources = collect_sources(&files)?;
    if sources.is_empty() {
        bail!("no CSV sources found in the given paths");
    }

    let pipeline = Pipeline::new(&config).with_snapshot_text(snapshot_date.as_deref());
    let result = pipeline
        .run_batch(&sources)
        .context("batch aborted: the lineage ledger could not be written")?;

    print_summary(&result.summary);
    println!("Manifest:       {}", result.manifest_path.display());

    if result.any_failed() {
        std::process::exit(1);
    }
    Ok(())
}

/// Expand directories to their `.csv` files (any case), sorted by name.
fn collect_sources(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for path in paths {
        if !path.is_dir() {
            out.push(path.clone());
            continue;
        }
        let mut found: Vec<PathBuf> = std::fs::read_dir(path)
            .with_context(|| format!("failed to read directory {}", path.display()))?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.is_file()
                    && p.extension()
                        .and_then(|x| x.to_str())
                        .is_some_and(|x| x.eq_ignore_ascii_case("csv"))
            })
            .collect();
        found.sort();
        out.extend(found);
    }
    Ok(out)
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("=== Ingestion Run ===");
    println!("Run ID:         {}", summary.run_id);
    println!(
        "Files:          {} ({} failed)",
        summary.files_processed, summary.files_failed
    );
    println!("Blocks:         {}", summary.blocks_emitted);
    println!("Metrics:        {}", summary.metrics_emitted);
    println!("Records:        {}", summary.records_emitted);
    println!(
        "Lineage:        {} success, {} failed",
        summary.lineage_success, summary.lineage_failed
    );
    println!(
        "Elapsed:        {:.2}s",
        (summary.finished_at - summary.started_at).num_milliseconds() as f64 / 1000.0
    );

    if summary.diagnostics.total() > 0 {
        println!();
        println!("--- Diagnostics ---");
        for (reason, n) in &summary.diagnostics.0 {
            println!("{:<24}{}", reason.to_string(), n);
        }
        println!("Rows dropped:   {}", summary.rows_dropped.total());
    }

    let failed: Vec<_> = summary.failed_files().collect();
    if !failed.is_empty() {
        println!();
        println!("--- Failed Files ---");
        for f in failed {
            println!(
                "{}: {}",
                f.src_filename,
                f.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}

// ── lineage ────────────────────────────────────────────────────────────────────

fn run_lineage_show(store: &ParquetStore, csv: Option<PathBuf>) -> Result<()> {
    let ledger = LineageLedger::new(store.ledger_path());
    let records = ledger
        .load()
        .with_context(|| format!("failed to read ledger {}", ledger.path().display()))?;

    if let Some(path) = csv {
        write_csv(&path, &export_lineage_csv(&records)?)?;
        println!("Wrote {} entries to {}", records.len(), path.display());
        return Ok(());
    }
    print_lineage(&records);
    Ok(())
}

fn run_lineage_rebuild(store: &ParquetStore) -> Result<()> {
    let records = rebuild_ledger(store, Utc::now())?;
    print_lineage(&records);
    Ok(())
}

fn print_lineage(records: &[LineageRecord]) {
    if records.is_empty() {
        println!("Ledger is empty.");
        return;
    }
    println!(
        "{:<44} {:<12} {:<40} {:>8} {:<8}",
        "SOURCE", "SNAPSHOT", "METRIC", "RECORDS", "STATUS"
    );
    for r in records {
        println!(
            "{:<44} {:<12} {:<40} {:>8} {:<8}",
            r.src_filename,
            r.ingestion_date.to_string(),
            r.metric_type,
            r.record_count,
            r.status.as_str()
        );
    }
    let failed = records
        .iter()
        .filter(|r| r.status == LineageStatus::Failed)
        .count();
    println!();
    println!("{} entries, {} failed", records.len(), failed);
}

// ── view ───────────────────────────────────────────────────────────────────────

fn run_view(store: &ParquetStore, which: ViewKind) -> Result<()> {
    let views = DatasetViews::new(store);
    let (df, args) = match which {
        ViewKind::History(args) => (views.history()?, args),
        ViewKind::Pit { date, args } => (views.point_in_time(date.parse()?)?, args),
        ViewKind::Current(args) => (views.current()?, args),
    };

    if args.wide {
        let tables = wide_tables(&df)?;
        match args.csv {
            Some(dir) => {
                for view in &tables {
                    write_csv(&dir.join(wide_file_name(view)), &export_wide_csv(view)?)?;
                }
                println!("Wrote {} wide tables to {}", tables.len(), dir.display());
            }
            None => {
                for view in &tables {
                    println!("# {}", wide_file_name(view));
                    print!("{}", export_wide_csv(view)?);
                    println!();
                }
            }
        }
        return Ok(());
    }

    match args.csv {
        Some(path) => {
            write_csv(&path, &export_view_csv(&df)?)?;
            println!("Wrote {} records to {}", df.height(), path.display());
        }
        None => println!("{df}"),
    }
    Ok(())
}
