//! `pulse` entry point.
//!
//! Logs go to stderr (filter with `RUST_LOG`, default `info`); command
//! output goes to stdout so `--json` stays machine-readable.

use clap::Parser;
use pulse_cli::PulseCli;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = PulseCli::parse();
    let code = cli.run().await;
    std::process::exit(code);
}
