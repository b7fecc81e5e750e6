//! Operator CLI for the ecosystem pulse context engine
//!
//! ## Commands
//!
//! - `pulse record` - append one review run to the history
//! - `pulse ingest` - gather source entries into the day's snapshot
//! - `pulse sync` - bring the vector index up to date
//! - `pulse context` - what the history says about one entity
//! - `pulse returning` - which of today's entities were seen before
//! - `pulse synthesize` - generate an outlook for a cluster summary
//! - `pulse doctor` - verify store, index and Ollama health
//!
//! ## Exit Codes
//!
//! - 0: Success
//! - 1: Degraded (a backend was unavailable, output is partial)
//! - 2: Error (bad config or input, store could not be opened)

pub mod doctor_cmd;
pub mod history_cmd;
pub mod ingest_cmd;
pub mod synthesize_cmd;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use pulse_context::{ContextConfig, ContextEngine};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Exit codes shared by every command
pub mod exit_codes {
    pub const OK: i32 = 0;
    pub const DEGRADED: i32 = 1;
    pub const ERROR: i32 = 2;
}

/// Ecosystem pulse: review history, recurrence and synthesis
#[derive(Debug, Parser)]
#[command(name = "pulse", version, about)]
pub struct PulseCli {
    /// Config file (default: $PULSE_CONTEXT_CONFIG or ~/.config/pulse/context.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: PulseSubcommand,
}

impl PulseCli {
    pub async fn run(self) -> i32 {
        let config = self.config.as_deref();
        match self.command {
            PulseSubcommand::Record(args) => ingest_cmd::run_record(config, args).await,
            PulseSubcommand::Ingest(args) => ingest_cmd::run_ingest(config, args).await,
            PulseSubcommand::Sync(args) => history_cmd::run_sync(config, args).await,
            PulseSubcommand::Context(args) => history_cmd::run_context(config, args).await,
            PulseSubcommand::Returning(args) => history_cmd::run_returning(config, args).await,
            PulseSubcommand::Synthesize(args) => {
                synthesize_cmd::run_synthesize(config, args).await
            }
            PulseSubcommand::Doctor(args) => doctor_cmd::run_doctor(config, args).await,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum PulseSubcommand {
    /// Append one review run to the history
    ///
    /// Reads a JSON array of observations and stamps each with the run date.
    Record(ingest_cmd::RecordArgs),

    /// Gather entries into the day's snapshot
    ///
    /// Consults the primary source; fallbacks are read only when it comes
    /// up short. Entries are reconciled by URL with what is already saved.
    Ingest(ingest_cmd::IngestArgs),

    /// Index every review not yet in the vector index
    Sync(history_cmd::SyncArgs),

    /// Show what the history says about an entity
    Context(history_cmd::ContextArgs),

    /// List entities seen before the recurrence window
    Returning(history_cmd::ReturningArgs),

    /// Generate an outlook for a cluster summary
    Synthesize(synthesize_cmd::SynthesizeArgs),

    /// Verify store, index and Ollama health
    Doctor(doctor_cmd::DoctorArgs),
}

/// Explicit path, else the default resolution
pub fn load_config(path: Option<&Path>) -> anyhow::Result<ContextConfig> {
    match path {
        Some(path) => ContextConfig::load_from_path(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => ContextConfig::load().context("failed to load config"),
    }
}

pub fn open_engine(cfg: ContextConfig) -> anyhow::Result<ContextEngine> {
    ContextEngine::from_config(cfg).context("failed to open context engine")
}

pub fn today() -> chrono::NaiveDate {
    chrono::Local::now().date_naive()
}

pub fn print_json<T: Serialize>(value: &T) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

/// Exit code for a command body; errors are reported on stderr
pub fn finish(result: anyhow::Result<i32>) -> i32 {
    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            exit_codes::ERROR
        }
    }
}
