//! `mnemon-engine` – the memory consolidation core.
//!
//! Turns conversation observations into a deduplicated record set and a
//! minimal set of store writes.  Two layers:
//!
//! - [`consolidate`] – the [`Consolidator`]: a bounded propose/merge loop
//!   that drives a [`Proposer`][mnemon_proposer::Proposer] over the current
//!   record view, applying insert/update/delete operations last-write-wins
//!   until the model signals convergence or the round budget runs out.
//! - [`reconcile`] – the [`Reconciler`]: retrieves candidate records from a
//!   [`RecordStore`][mnemon_store::RecordStore], runs consolidation (plus any
//!   configured enrichment phases), diffs the result against the retrieved
//!   snapshot, and applies only the writes that change stored state.
//!
//! Supporting modules:
//!
//! - [`windows`] – time-dilated search windows, the default retrieval
//!   strategy when no query generator is configured.
//! - [`blocking`] – synchronous wrappers that own a current-thread runtime.
//! - [`telemetry`] – `tracing` subscriber setup with optional OTLP export.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mnemon_engine::{Consolidator, ConsolidatorConfig};
//! use mnemon_proposer::{ChatMessage, LlmProposer};
//!
//! # async fn run() -> Result<(), mnemon_types::MnemonError> {
//! let proposer = Arc::new(LlmProposer::new("http://localhost:11434", "llama3"));
//! let consolidator = Consolidator::new(proposer, ConsolidatorConfig::default());
//!
//! let messages = vec![ChatMessage::user("I switched to dark mode everywhere.")];
//! let outcome = consolidator.consolidate(&messages, &[]).await?;
//! for record in &outcome.records {
//!     println!("{}: {}", record.id, record.content);
//! }
//! # Ok(())
//! # }
//! ```

pub mod blocking;
pub mod consolidate;
pub mod reconcile;
pub mod telemetry;
pub mod windows;

pub use consolidate::{Consolidation, Consolidator, ConsolidatorConfig};
pub use reconcile::{Phase, Reconciler, ReconcilerConfig};
pub use windows::dilated_windows;

#[cfg(test)]
mod testkit;
