//! `pulse synthesize` - outlook for a cluster summary
//!
//! Exit 0 for HIGH or MEDIUM confidence, 1 for LOW or UNAVAILABLE.

use crate::history_cmd::sync_before_read;
use crate::{exit_codes, finish, load_config, open_engine, print_json};
use anyhow::Context as _;
use clap::Parser;
use pulse_context::Confidence;
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
pub struct SynthesizeArgs {
    /// Cluster summary text
    #[arg(long, conflicts_with = "summary_file", required_unless_present = "summary_file")]
    pub summary: Option<String>,

    /// Read the cluster summary from a file
    #[arg(long, value_name = "FILE")]
    pub summary_file: Option<PathBuf>,

    /// JSON file with prior yield figures (default: empty object)
    #[arg(long, value_name = "FILE")]
    pub prior_yield: Option<PathBuf>,

    /// Generate without retrieved history
    #[arg(long)]
    pub no_context: bool,

    /// Read the index as it is, without syncing first
    #[arg(long)]
    pub no_sync: bool,

    /// Output as JSON for automation
    #[arg(long)]
    pub json: bool,
}

pub async fn run_synthesize(config: Option<&Path>, args: SynthesizeArgs) -> i32 {
    finish(synthesize(config, args).await)
}

fn read_summary(args: &SynthesizeArgs) -> anyhow::Result<String> {
    match (&args.summary, &args.summary_file) {
        (Some(summary), _) => Ok(summary.clone()),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display())),
        (None, None) => anyhow::bail!("either --summary or --summary-file is required"),
    }
}

fn read_prior_yield(path: Option<&Path>) -> anyhow::Result<serde_json::Value> {
    let Some(path) = path else {
        return Ok(serde_json::json!({}));
    };
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("{} is not valid JSON", path.display()))
}

async fn synthesize(config: Option<&Path>, args: SynthesizeArgs) -> anyhow::Result<i32> {
    let summary = read_summary(&args)?;
    let prior_yield = read_prior_yield(args.prior_yield.as_deref())?;

    let engine = open_engine(load_config(config)?)?;
    let use_context = if args.no_context { Some(false) } else { None };
    if !args.no_context {
        sync_before_read(&engine, args.no_sync).await;
    }

    let result = engine
        .synthesize(summary.trim(), &prior_yield, use_context)
        .await;

    if args.json {
        print_json(&result);
    } else {
        let history = if result.context_used {
            "history used"
        } else {
            "no history"
        };
        println!("Confidence: {} ({history})\n", result.confidence);
        println!("{}", result.text);
        if let Some(error) = &result.error {
            eprintln!("\nGeneration error: {error}");
        }
    }

    Ok(match result.confidence {
        Confidence::High | Confidence::Medium => exit_codes::OK,
        Confidence::Low | Confidence::Unavailable => exit_codes::DEGRADED,
    })
}
