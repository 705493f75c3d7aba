//! The [`RecordStore`] trait and shared store utilities.
//!
//! The engine never talks to a concrete database directly; it holds an
//! `Arc<dyn RecordStore>` and issues namespace-scoped searches and writes
//! through it.  Each write is individually idempotent (same content ⇒ same
//! stored state), so a crash after partial application leaves the store
//! valid and re-reconcilable.

use async_trait::async_trait;
use mnemon_types::{MnemonError, Namespace, RecordId, StoreItem, StoredValue};
use std::collections::HashSet;
use thiserror::Error;
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from record-store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Corrupt stored value at {namespace}/{key}: {details}")]
    Corrupt {
        namespace: String,
        key: String,
        details: String,
    },
}

impl From<StoreError> for MnemonError {
    fn from(err: StoreError) -> Self {
        MnemonError::Store(err.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RecordStore trait
// ─────────────────────────────────────────────────────────────────────────────

/// Namespace-scoped key/value store with relevance search.
///
/// # Contract
///
/// * `search` – return up to `limit` items under `namespace` ranked by
///   relevance to `query` (highest first).  An empty query returns items
///   without scores.
/// * `put` – upsert the value stored at `(namespace, key)`.
/// * `delete` – remove the slot; deleting a missing key is a no-op.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn search(
        &self,
        namespace: &Namespace,
        query: &str,
        limit: usize,
    ) -> Result<Vec<StoreItem>, StoreError>;

    async fn put(
        &self,
        namespace: &Namespace,
        key: &str,
        value: StoredValue,
    ) -> Result<(), StoreError>;

    async fn delete(&self, namespace: &Namespace, key: &str) -> Result<(), StoreError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Stable logical ids
// ─────────────────────────────────────────────────────────────────────────────

/// Derive the deterministic logical id of a store slot.
///
/// UUID v5 over the namespace segments plus key, so the same `(namespace,
/// key)` always maps to the same [`RecordId`] across calls and processes.
pub fn stable_record_id(namespace: &Namespace, key: &str) -> RecordId {
    let mut name = String::new();
    for segment in namespace.segments() {
        name.push_str(segment);
        name.push('\u{1f}');
    }
    name.push_str(key);
    RecordId::new(Uuid::new_v5(&Uuid::NAMESPACE_DNS, name.as_bytes()).simple().to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// Lexical relevance
// ─────────────────────────────────────────────────────────────────────────────

/// Token-overlap (Jaccard) relevance of a stored value against a query.
///
/// Returns a value in `[0.0, 1.0]`.  This is deliberately simple – embedding
/// and semantic ranking belong to external stores; the bundled
/// implementations just need a stable, monotone ordering for tests and small
/// deployments.
pub fn relevance(query: &str, value: &StoredValue) -> f64 {
    let query_tokens = tokens(query);
    let mut text = value.kind.clone();
    text.push(' ');
    collect_text(&value.content, &mut text);
    let value_tokens = tokens(&text);

    if query_tokens.is_empty() || value_tokens.is_empty() {
        return 0.0;
    }
    let intersection = query_tokens.intersection(&value_tokens).count() as f64;
    let union = query_tokens.union(&value_tokens).count() as f64;
    intersection / union
}

fn tokens(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

/// Append every string leaf of a JSON value to `out`.
fn collect_text(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::String(s) => {
            out.push(' ');
            out.push_str(s);
        }
        serde_json::Value::Array(items) => {
            for item in items {
                collect_text(item, out);
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values() {
                collect_text(item, out);
            }
        }
        _ => {}
    }
}
