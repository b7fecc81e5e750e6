//! Ingestion commands
//!
//! - `pulse record <FILE>` - append a review run (JSON array of observations)
//! - `pulse ingest --primary <FILE>` - merge source entries into a snapshot

use crate::{exit_codes, finish, load_config, open_engine, print_json, today};
use anyhow::Context as _;
use chrono::NaiveDate;
use clap::Parser;
use pulse_context::{
    DailySnapshot, JsonFileSource, ObservationDraft, Source, SyncOutcome, gather_with_fallback,
};
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
pub struct RecordArgs {
    /// JSON array of observations (entity_id, entity_name, popularity, commentary, tags)
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Run date stamped on every row (default: today)
    #[arg(long, value_name = "YYYY-MM-DD")]
    pub date: Option<NaiveDate>,

    /// Accept a date before the newest recorded run (importing past runs)
    #[arg(long)]
    pub backfill: bool,

    /// Index the new rows right away
    #[arg(long)]
    pub sync: bool,

    /// Output as JSON for automation
    #[arg(long)]
    pub json: bool,
}

pub async fn run_record(config: Option<&Path>, args: RecordArgs) -> i32 {
    finish(record(config, args).await)
}

async fn record(config: Option<&Path>, args: RecordArgs) -> anyhow::Result<i32> {
    let cfg = load_config(config)?;
    let contents = std::fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let drafts: Vec<ObservationDraft> = serde_json::from_str(&contents)
        .with_context(|| format!("{} is not an array of observations", args.file.display()))?;

    let run_date = args.date.unwrap_or_else(today);
    let engine = open_engine(cfg)?;
    let written = if args.backfill {
        engine.backfill_run(drafts, run_date)
    } else {
        engine.record_run(drafts, run_date)
    }
    .context("failed to record review run")?;

    let sync = if args.sync {
        Some(engine.sync_index().await)
    } else {
        None
    };
    let code = match sync {
        Some(SyncOutcome::Unavailable(_)) => exit_codes::DEGRADED,
        _ => exit_codes::OK,
    };

    if args.json {
        print_json(&serde_json::json!({
            "run_date": run_date,
            "written": written,
            "sync": sync,
        }));
    } else {
        println!("Recorded {written} observations for {run_date}");
        match sync {
            Some(SyncOutcome::Synced(report)) => {
                println!("Indexed {} new documents", report.indexed);
            }
            Some(SyncOutcome::Unavailable(d)) => {
                println!("Index not updated [{}]: {}", d.category.as_str(), d.message);
            }
            None => {}
        }
    }

    Ok(code)
}

#[derive(Debug, Parser)]
pub struct IngestArgs {
    /// Primary source: JSON array of entries
    #[arg(long, value_name = "FILE")]
    pub primary: PathBuf,

    /// Fallback source, read only when the primary comes up short (repeatable)
    #[arg(long = "fallback", value_name = "FILE")]
    pub fallbacks: Vec<PathBuf>,

    /// Snapshot date (default: today)
    #[arg(long, value_name = "YYYY-MM-DD")]
    pub date: Option<NaiveDate>,

    /// Snapshot directory (default: ingest.snapshot_dir from config)
    #[arg(long, value_name = "DIR")]
    pub snapshot_dir: Option<PathBuf>,

    /// Fewest primary entries that skip the fallbacks (default: from config)
    #[arg(long, value_name = "N")]
    pub min_primary: Option<usize>,

    /// Output as JSON for automation
    #[arg(long)]
    pub json: bool,
}

pub async fn run_ingest(config: Option<&Path>, args: IngestArgs) -> i32 {
    finish(ingest(config, args).await)
}

fn file_source(path: &Path) -> JsonFileSource {
    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    JsonFileSource::new(name, path)
}

async fn ingest(config: Option<&Path>, args: IngestArgs) -> anyhow::Result<i32> {
    let cfg = load_config(config)?;
    let date = args.date.unwrap_or_else(today);
    let dir = args
        .snapshot_dir
        .unwrap_or_else(|| cfg.resolved_snapshot_dir());
    let min_primary = args.min_primary.unwrap_or(cfg.ingest.min_primary_entries);

    let primary = file_source(&args.primary);
    let fallbacks: Vec<Box<dyn Source>> = args
        .fallbacks
        .iter()
        .map(|path| Box::new(file_source(path)) as Box<dyn Source>)
        .collect();

    let gathered = gather_with_fallback(&primary, &fallbacks, min_primary).await;
    let snapshot = DailySnapshot::new(dir);
    let report = snapshot
        .merge(date, gathered.entries)
        .context("failed to update snapshot")?;

    let code = if gathered.failed_sources.is_empty() {
        exit_codes::OK
    } else {
        exit_codes::DEGRADED
    };

    if args.json {
        print_json(&serde_json::json!({
            "date": date,
            "path": snapshot.path_for(date),
            "used_fallback": gathered.used_fallback,
            "failed_sources": gathered.failed_sources,
            "merge": report,
        }));
    } else {
        println!(
            "{}: {} existing + {} incoming = {} entries{}",
            snapshot.path_for(date).display(),
            report.existing,
            report.incoming,
            report.total,
            if report.written { "" } else { " (unchanged)" }
        );
        if gathered.used_fallback {
            println!("Primary source was short; fallbacks consulted");
        }
        for name in &gathered.failed_sources {
            println!("Source unavailable: {name}");
        }
    }

    Ok(code)
}
