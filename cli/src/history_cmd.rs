//! History commands
//!
//! - `pulse sync` - index every review not yet in the vector index
//! - `pulse context <NAME>` - aggregate history for one entity
//! - `pulse returning <NAME>...` - entities seen before the recurrence window
//!
//! `context` syncs first unless `--no-sync` is given, so a freshly recorded
//! run is searchable without a separate step.

use crate::{exit_codes, finish, load_config, open_engine, print_json, today};
use chrono::NaiveDate;
use clap::Parser;
use pulse_context::{ContextEngine, ContextLookup, ContextResult, RecurrenceOutcome, SyncOutcome};
use std::path::Path;

/// Sync the index before a read; failures only degrade freshness
pub(crate) async fn sync_before_read(engine: &ContextEngine, skip: bool) {
    if skip {
        return;
    }
    if let SyncOutcome::Synced(report) = engine.sync_index().await {
        tracing::debug!(indexed = report.indexed, "Index synced before read");
    }
}

#[derive(Debug, Parser)]
pub struct SyncArgs {
    /// Output as JSON for automation
    #[arg(long)]
    pub json: bool,
}

pub async fn run_sync(config: Option<&Path>, args: SyncArgs) -> i32 {
    finish(sync(config, args).await)
}

async fn sync(config: Option<&Path>, args: SyncArgs) -> anyhow::Result<i32> {
    let engine = open_engine(load_config(config)?)?;
    let outcome = engine.sync_index().await;

    if args.json {
        print_json(&outcome);
    }

    match outcome {
        SyncOutcome::Synced(report) => {
            if !args.json {
                println!(
                    "Scanned {} reviews: {} indexed, {} already present",
                    report.scanned, report.indexed, report.skipped
                );
            }
            Ok(exit_codes::OK)
        }
        SyncOutcome::Unavailable(d) => {
            if !args.json {
                println!("Index unavailable [{}]: {}", d.category.as_str(), d.message);
            }
            Ok(exit_codes::DEGRADED)
        }
    }
}

#[derive(Debug, Parser)]
pub struct ContextArgs {
    /// Entity name as it appears in today's batch
    #[arg(value_name = "NAME")]
    pub name: String,

    /// Read the index as it is, without syncing first
    #[arg(long)]
    pub no_sync: bool,

    /// Output as JSON for automation
    #[arg(long)]
    pub json: bool,
}

pub async fn run_context(config: Option<&Path>, args: ContextArgs) -> i32 {
    finish(context(config, args).await)
}

fn print_context(result: &ContextResult) {
    println!(
        "{} ({}, {})",
        result.entity_name, result.entity_id, result.entity_kind
    );
    println!(
        "  first seen: {}  last seen: {}",
        result.first_seen, result.last_seen
    );
    println!(
        "  mentions: {}  avg popularity: {:.1}  similarity: {:.3}",
        result.total_mentions, result.avg_popularity, result.similarity_score
    );
    if let Some(commentary) = &result.last_commentary {
        println!("  last commentary: {commentary}");
    }
}

async fn context(config: Option<&Path>, args: ContextArgs) -> anyhow::Result<i32> {
    let engine = open_engine(load_config(config)?)?;
    sync_before_read(&engine, args.no_sync).await;

    let lookup = engine.context_for(&args.name).await;
    if args.json {
        print_json(&lookup);
    } else {
        match &lookup {
            ContextLookup::Found(result) => print_context(result),
            ContextLookup::Absent => println!("No history for {}", args.name),
            ContextLookup::Unavailable(d) => {
                println!("History unavailable [{}]: {}", d.category.as_str(), d.message);
            }
        }
    }

    Ok(match lookup {
        ContextLookup::Unavailable(_) => exit_codes::DEGRADED,
        ContextLookup::Found(_) | ContextLookup::Absent => exit_codes::OK,
    })
}

#[derive(Debug, Parser)]
pub struct ReturningArgs {
    /// Entity names from today's batch
    #[arg(value_name = "NAME", required = true)]
    pub names: Vec<String>,

    /// Reference date (default: today)
    #[arg(long, value_name = "YYYY-MM-DD")]
    pub today: Option<NaiveDate>,

    /// Window length in days (default: recurrence.days_back from config)
    #[arg(long, value_name = "DAYS")]
    pub days_back: Option<u32>,

    /// Output as JSON for automation
    #[arg(long)]
    pub json: bool,
}

pub async fn run_returning(config: Option<&Path>, args: ReturningArgs) -> i32 {
    finish(returning(config, args))
}

fn returning(config: Option<&Path>, args: ReturningArgs) -> anyhow::Result<i32> {
    let mut cfg = load_config(config)?;
    if let Some(days_back) = args.days_back {
        cfg.recurrence.days_back = days_back;
    }
    let engine = open_engine(cfg)?;

    let reference = args.today.unwrap_or_else(today);
    let outcome = engine.returning(args.names.as_slice(), reference);

    if args.json {
        print_json(&outcome);
    }

    match outcome {
        RecurrenceOutcome::Returning(found) => {
            if !args.json {
                if found.is_empty() {
                    println!("No returning entities");
                }
                for result in &found {
                    println!(
                        "{}: {} mentions, last seen {}",
                        result.entity_name, result.total_mentions, result.last_seen
                    );
                }
            }
            Ok(exit_codes::OK)
        }
        RecurrenceOutcome::Unavailable(d) => {
            if !args.json {
                println!("History unavailable [{}]: {}", d.category.as_str(), d.message);
            }
            Ok(exit_codes::DEGRADED)
        }
    }
}
