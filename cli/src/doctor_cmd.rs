//! `pulse doctor` - verify context engine health
//!
//! Checks that the config parses, the review store and vector index open,
//! and Ollama serves the configured models when anything depends on it.
//!
//! Exit 0 when every check passes, 1 on warnings, 2 on failures.

use crate::{exit_codes, load_config, print_json};
use clap::Parser;
use pulse_context::{
    ContextConfig, ContextEngine, IndexBackendKind, OllamaClient, expected_document_count,
};
use std::path::Path;

#[derive(Debug, Parser)]
pub struct DoctorArgs {
    /// Output as JSON for automation
    #[arg(long)]
    pub json: bool,
}

/// Doctor check result
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: &'static str,
    pub status: CheckStatus,
    pub message: String,
    pub fix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

impl CheckStatus {
    fn as_str(self) -> &'static str {
        match self {
            CheckStatus::Pass => "pass",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "fail",
        }
    }
}

impl CheckResult {
    fn pass(name: &'static str, message: impl Into<String>) -> Self {
        Self {
            name,
            status: CheckStatus::Pass,
            message: message.into(),
            fix: None,
        }
    }

    fn warn(name: &'static str, message: impl Into<String>, fix: impl Into<String>) -> Self {
        Self {
            name,
            status: CheckStatus::Warn,
            message: message.into(),
            fix: Some(fix.into()),
        }
    }

    fn fail(name: &'static str, message: impl Into<String>, fix: impl Into<String>) -> Self {
        Self {
            name,
            status: CheckStatus::Fail,
            message: message.into(),
            fix: Some(fix.into()),
        }
    }
}

/// Run the doctor command
pub async fn run_doctor(config: Option<&Path>, args: DoctorArgs) -> i32 {
    let results = collect_checks(config).await;

    if args.json {
        print_json_results(&results);
    } else {
        print_human_results(&results);
    }

    overall_exit_code(&results)
}

pub fn overall_exit_code(results: &[CheckResult]) -> i32 {
    if results.iter().any(|r| r.status == CheckStatus::Fail) {
        exit_codes::ERROR
    } else if results.iter().any(|r| r.status == CheckStatus::Warn) {
        exit_codes::DEGRADED
    } else {
        exit_codes::OK
    }
}

async fn collect_checks(config: Option<&Path>) -> Vec<CheckResult> {
    let mut results = Vec::new();

    let cfg = match load_config(config) {
        Ok(cfg) => {
            let source = config
                .map(Path::to_path_buf)
                .unwrap_or_else(ContextConfig::resolve_config_path);
            results.push(CheckResult::pass(
                "config",
                format!("Loaded (source: {})", source.display()),
            ));
            cfg
        }
        Err(e) => {
            results.push(CheckResult::fail(
                "config",
                format!("{e:#}"),
                "Fix the TOML or point --config at a valid file",
            ));
            return results;
        }
    };

    let needs_ollama = cfg.index.backend == IndexBackendKind::Ollama || cfg.synthesis.enabled;
    let index_needs_ollama = cfg.index.backend == IndexBackendKind::Ollama;

    match ContextEngine::from_config(cfg.clone()) {
        Ok(engine) => {
            results.push(check_store(&engine));
            results.push(check_index(&engine).await);
        }
        Err(e) => results.push(CheckResult::fail(
            "review-store",
            format!("{e}"),
            format!(
                "Check db_path and permissions for {}",
                cfg.resolved_db_path().display()
            ),
        )),
    }

    if needs_ollama {
        results.extend(check_ollama(&cfg, index_needs_ollama).await);
    }

    results
}

fn check_store(engine: &ContextEngine) -> CheckResult {
    match engine.store().observation_count() {
        Ok(count) => {
            let location = engine
                .store()
                .path()
                .map_or_else(|| "memory".to_string(), |p| p.display().to_string());
            CheckResult::pass("review-store", format!("{count} observations at {location}"))
        }
        Err(e) => CheckResult::fail(
            "review-store",
            format!("{e}"),
            "Check that no other process holds a write lock",
        ),
    }
}

async fn check_index(engine: &ContextEngine) -> CheckResult {
    if engine.config().index.backend == IndexBackendKind::Lexical {
        return CheckResult::pass("vector-index", "Lexical index, rebuilt on each run");
    }

    let indexed = match engine.index().count().await {
        Ok(count) => count,
        Err(e) => {
            return CheckResult::fail(
                "vector-index",
                format!("{e}"),
                "Check index.path or delete the index file to rebuild it",
            );
        }
    };
    let expected = match expected_document_count(engine.store()) {
        Ok(count) => count,
        Err(e) => {
            return CheckResult::warn(
                "vector-index",
                format!("{indexed} documents; store unreadable: {e}"),
                "Run `pulse doctor` again once the store is reachable",
            );
        }
    };

    // Identical rows share one content-hash id, so compare distinct documents.
    if indexed < expected {
        CheckResult::warn(
            "vector-index",
            format!("{indexed} of {expected} documents indexed"),
            "Run `pulse sync`",
        )
    } else {
        CheckResult::pass(
            "vector-index",
            format!("{indexed} documents ({})", engine.index().name()),
        )
    }
}

fn has_model(available: &[String], wanted: &str) -> bool {
    available.iter().any(|name| {
        name == wanted
            || name
                .strip_prefix(wanted)
                .is_some_and(|rest| rest.starts_with(':'))
    })
}

async fn check_ollama(cfg: &ContextConfig, index_needs_ollama: bool) -> Vec<CheckResult> {
    let client = match OllamaClient::new(&cfg.ollama) {
        Ok(client) => client,
        Err(e) => {
            return vec![CheckResult::fail(
                "ollama",
                format!("{e}"),
                "Check your system HTTP configuration",
            )];
        }
    };

    let models = match client.list_models().await {
        Ok(models) => models,
        Err(e) if index_needs_ollama => {
            return vec![CheckResult::fail(
                "ollama",
                format!("{e}"),
                "Start Ollama (`ollama serve`) or set index.backend = \"hashing\"",
            )];
        }
        Err(e) => {
            return vec![CheckResult::warn(
                "ollama",
                format!("{e}"),
                "Start Ollama (`ollama serve`); synthesis will report LOW until then",
            )];
        }
    };

    let mut results = vec![CheckResult::pass(
        "ollama",
        format!("Reachable at {} ({} models)", client.base_url(), models.len()),
    )];

    let mut wanted = Vec::new();
    if cfg.synthesis.enabled {
        wanted.push(cfg.ollama.model.as_str());
    }
    if index_needs_ollama {
        wanted.push(cfg.ollama.embedding_model.as_str());
    }
    for model in wanted {
        if has_model(&models, model) {
            results.push(CheckResult::pass("models", format!("{model} available")));
        } else {
            results.push(CheckResult::warn(
                "models",
                format!("{model} not pulled"),
                format!("ollama pull {model}"),
            ));
        }
    }

    results
}

fn print_human_results(results: &[CheckResult]) {
    println!("\n Pulse Context Doctor\n");

    for result in results {
        let icon = match result.status {
            CheckStatus::Pass => "\x1b[32m[PASS]\x1b[0m",
            CheckStatus::Warn => "\x1b[33m[WARN]\x1b[0m",
            CheckStatus::Fail => "\x1b[31m[FAIL]\x1b[0m",
        };

        println!("{} {}: {}", icon, result.name, result.message);

        if let Some(ref fix) = result.fix {
            println!("       Fix: {fix}");
        }
    }

    println!();

    let pass_count = results.iter().filter(|r| r.status == CheckStatus::Pass).count();
    let warn_count = results.iter().filter(|r| r.status == CheckStatus::Warn).count();
    let fail_count = results.iter().filter(|r| r.status == CheckStatus::Fail).count();

    if fail_count > 0 {
        println!(
            "\x1b[31mResult: {}/{} checks passed, {} warnings, {} failures\x1b[0m",
            pass_count,
            results.len(),
            warn_count,
            fail_count
        );
    } else if warn_count > 0 {
        println!(
            "\x1b[33mResult: {}/{} checks passed with {} warnings\x1b[0m",
            pass_count,
            results.len(),
            warn_count
        );
    } else {
        println!("\x1b[32mResult: All {} checks passed\x1b[0m", results.len());
    }
}

fn print_json_results(results: &[CheckResult]) {
    let checks: Vec<serde_json::Value> = results
        .iter()
        .map(|r| {
            serde_json::json!({
                "name": r.name,
                "status": r.status.as_str(),
                "message": r.message,
                "fix": r.fix,
            })
        })
        .collect();

    let overall = match overall_exit_code(results) {
        exit_codes::OK => CheckStatus::Pass,
        exit_codes::DEGRADED => CheckStatus::Warn,
        _ => CheckStatus::Fail,
    };

    print_json(&serde_json::json!({
        "checks": checks,
        "overall": overall.as_str(),
    }));
}
