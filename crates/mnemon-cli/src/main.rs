//! `mnemon-cli` – one-shot memory reconciliation from the command line.
//!
//! Reads a conversation transcript (a JSON array of `{role, content}`
//! messages), reconciles it against the local SQLite record store, and
//! prints every write that was applied:
//!
//! ```text
//! mnemon transcript.json [user-id]
//! ```
//!
//! Configuration lives in `~/.mnemon/config.toml` (created with defaults on
//! first run); `MNEMON_*` environment variables override individual fields.

mod config;

use colored::Colorize;
use std::collections::HashMap;
use std::sync::Arc;

use mnemon_engine::blocking::reconcile_blocking;
use mnemon_engine::telemetry::{self, LogFormat, TelemetrySettings};
use mnemon_engine::{Reconciler, ReconcilerConfig};
use mnemon_proposer::{ChatMessage, LlmProposer};
use mnemon_store::SqliteStore;
use mnemon_types::{AppliedWrite, NamespaceTemplate};

fn main() {
    let mut args = std::env::args().skip(1);
    let Some(transcript_path) = args.next() else {
        eprintln!("Usage: {} <transcript.json> [user-id]", "mnemon".bold());
        std::process::exit(2);
    };
    let user_id = args.next().unwrap_or_else(|| "default".to_string());

    // ── Configuration vault ───────────────────────────────────────────────
    let mut cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            let cfg = config::Config::default();
            match config::save(&cfg) {
                Ok(()) => println!(
                    "  No configuration found; wrote defaults to {}",
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Config error".red(), e),
            }
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            config::Config::default()
        }
    };
    // Applied here as well so overrides reach the default/error paths, not
    // only configs loaded from disk.
    config::apply_env_overrides(&mut cfg);

    // Hold the guard for the entire lifetime of the process; the Tokio
    // runtime is created later, inside the blocking reconcile call.
    let _guard = telemetry::init_tracing_with(
        "mnemon",
        TelemetrySettings {
            format: LogFormat::parse(&cfg.log_format).unwrap_or_default(),
            fallback_filter: None,
        },
    );

    // ── Transcript ────────────────────────────────────────────────────────
    let raw = std::fs::read_to_string(&transcript_path)
        .unwrap_or_else(|e| fail(&format!("Failed to read {transcript_path}: {e}")));
    let messages: Vec<ChatMessage> = serde_json::from_str(&raw)
        .unwrap_or_else(|e| fail(&format!("Failed to parse {transcript_path}: {e}")));
    println!(
        "  Reconciling {} message(s) for user {}",
        messages.len().to_string().bold(),
        user_id.bold()
    );

    // ── Engine wiring ─────────────────────────────────────────────────────
    let store = SqliteStore::open(&cfg.db_path)
        .unwrap_or_else(|e| fail(&format!("Failed to open record store at {}: {e}", cfg.db_path)));
    let mut proposer = LlmProposer::new(&cfg.llm_url, &cfg.model);
    if !cfg.api_key.is_empty() {
        proposer = proposer.with_api_key(&cfg.api_key);
    }
    let reconciler = Reconciler::new(
        Arc::new(proposer),
        Arc::new(store),
        ReconcilerConfig {
            namespace: NamespaceTemplate::new(cfg.namespace.clone()),
            query_limit: cfg.query_limit.max(1),
            max_steps: cfg.max_steps.max(1),
            ..ReconcilerConfig::default()
        },
    );

    // ── Reconcile ─────────────────────────────────────────────────────────
    let bindings = HashMap::from([("user_id".to_string(), user_id)]);
    match reconcile_blocking(&reconciler, &messages, &bindings) {
        Ok(writes) if writes.is_empty() => {
            println!("\n  {}", "Memory already up to date; no writes.".green());
        }
        Ok(writes) => {
            println!("\n  Applied {} write(s):", writes.len().to_string().bold());
            for write in &writes {
                match write {
                    AppliedWrite::Put {
                        namespace,
                        key,
                        value,
                    } => println!(
                        "    {} {}/{} {}",
                        "+".green().bold(),
                        namespace,
                        key.bold(),
                        preview(&value.content).dimmed()
                    ),
                    AppliedWrite::Delete { namespace, key } => {
                        println!("    {} {}/{}", "-".red().bold(), namespace, key.bold())
                    }
                }
            }
        }
        Err(e) => fail(&format!("Reconciliation failed: {e}")),
    }
}

/// Short single-line preview of a record's content for terminal output.
fn preview(content: &serde_json::Value) -> String {
    let text = content["content"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| content.to_string());
    let mut line: String = text.chars().take(72).collect();
    if text.chars().count() > 72 {
        line.push('…');
    }
    line
}

fn fail(message: &str) -> ! {
    eprintln!("{}: {}", "Error".red().bold(), message);
    std::process::exit(1);
}
