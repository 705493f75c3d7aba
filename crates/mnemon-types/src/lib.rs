//! `mnemon-types` – shared data model for the mnemon memory engine.
//!
//! Defines the record/operation vocabulary spoken between the consolidation
//! engine, the proposer, and the record store:
//!
//! - [`Record`] – one unit of extracted knowledge: logical id, kind tag, and
//!   an opaque JSON content payload.
//! - [`Operation`] – the tagged command variants a proposer may emit
//!   (`Insert` / `Update` / `Delete` / `Done`).  Derives a JSON Schema so the
//!   LLM's structured output can be constrained to exactly these shapes.
//! - [`Namespace`] / [`NamespaceTemplate`] – ordered string tuples scoping
//!   store entries, with `{variable}` segments bound at invocation time.
//! - [`StoreItem`] / [`StoredValue`] / [`AppliedWrite`] – the record-store
//!   wire types.
//! - [`MnemonError`] – the global error type spanning proposer failures,
//!   store failures, and malformed operations.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

/// Default kind tag for unstructured free-text memories.
pub const MEMORY_KIND: &str = "Memory";

// ─────────────────────────────────────────────────────────────────────────────
// RecordId
// ─────────────────────────────────────────────────────────────────────────────

/// Stable logical identifier of a [`Record`].
///
/// Whether an id is "external" (present in the snapshot a consolidation run
/// started from) or "internal" (minted mid-run) is tracked by the engine per
/// invocation – never inferred from the id string itself.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, schemars::JsonSchema,
)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Wrap an existing identifier string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a fresh random identifier (UUID v4, simple hex form).
    pub fn mint() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Record
// ─────────────────────────────────────────────────────────────────────────────

/// A persisted or pending unit of extracted knowledge.
///
/// `kind` tags the content's schema; `content` is opaque to the engine beyond
/// equality comparison.  Any result set holds at most one record per id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub kind: String,
    pub content: serde_json::Value,
}

impl Record {
    pub fn new(id: RecordId, kind: impl Into<String>, content: serde_json::Value) -> Self {
        Self {
            id,
            kind: kind.into(),
            content,
        }
    }

    /// Build an unstructured [`MEMORY_KIND`] record with a fresh id from a
    /// plain text snippet.
    pub fn memory(text: impl Into<String>) -> Self {
        Self {
            id: RecordId::mint(),
            kind: MEMORY_KIND.to_string(),
            content: serde_json::json!({ "content": text.into() }),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Operation
// ─────────────────────────────────────────────────────────────────────────────

/// One proposed mutation of the record set, plus the one-time [`Done`] signal.
///
/// The variants are an explicit tagged union – operation kind is never
/// inferred from a type name.  The derived JSON Schema is injected into the
/// LLM request's `response_format` so the model can only produce these
/// shapes.
///
/// [`Done`]: Operation::Done
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Create a new record.  The engine mints the logical id.
    Insert {
        kind: String,
        content: serde_json::Value,
    },
    /// Replace the kind/content of the record with the given id.  If the id
    /// is unknown this behaves as an insert with a caller-chosen id.
    Update {
        id: RecordId,
        kind: String,
        content: serde_json::Value,
    },
    /// Remove the record with the given id.
    Delete { id: RecordId },
    /// Signal that consolidation has converged; no further rounds are needed.
    Done,
}

impl Operation {
    /// Past-tense label used in acknowledgement messages and logs.
    pub fn action_label(&self) -> &'static str {
        match self {
            Operation::Insert { .. } => "inserted",
            Operation::Update { .. } => "updated",
            Operation::Delete { .. } => "deleted",
            Operation::Done => "done",
        }
    }
}

/// Gating flags for which operation kinds a proposer may emit.
///
/// `done` is round-dependent: the engine withholds the sentinel on round 0 so
/// early termination is only possible after at least one full round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationKinds {
    pub inserts: bool,
    pub updates: bool,
    pub deletes: bool,
    pub done: bool,
}

impl Default for OperationKinds {
    fn default() -> Self {
        Self {
            inserts: true,
            updates: true,
            deletes: true,
            done: false,
        }
    }
}

impl OperationKinds {
    /// `true` if `op` is allowed under these flags.
    pub fn allows(&self, op: &Operation) -> bool {
        match op {
            Operation::Insert { .. } => self.inserts,
            Operation::Update { .. } => self.updates,
            Operation::Delete { .. } => self.deletes,
            Operation::Done => self.done,
        }
    }

    /// Human-readable list of the permitted operations, for prompt text.
    pub fn describe(&self) -> String {
        let mut allowed = Vec::new();
        if self.inserts {
            allowed.push("insert");
        }
        if self.updates {
            allowed.push("update");
        }
        if self.deletes {
            allowed.push("delete");
        }
        if self.done {
            allowed.push("done");
        }
        allowed.join(", ")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Namespace
// ─────────────────────────────────────────────────────────────────────────────

/// An ordered tuple of strings scoping entries in the record store,
/// e.g. `("memories", "user-123")`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(Vec<String>);

impl Namespace {
    pub fn new(segments: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

/// A namespace whose segments may contain `{variable}` placeholders, bound
/// once per invocation from caller-supplied runtime values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NamespaceTemplate(Vec<String>);

impl NamespaceTemplate {
    pub fn new(segments: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Resolve every `{variable}` segment against `bindings`.
    ///
    /// # Errors
    ///
    /// Returns [`MnemonError::UnboundVariable`] if a placeholder has no
    /// binding.
    pub fn bind(&self, bindings: &HashMap<String, String>) -> Result<Namespace, MnemonError> {
        let mut segments = Vec::with_capacity(self.0.len());
        for segment in &self.0 {
            if let Some(name) = segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                match bindings.get(name) {
                    Some(value) => segments.push(value.clone()),
                    None => return Err(MnemonError::UnboundVariable(name.to_string())),
                }
            } else {
                segments.push(segment.clone());
            }
        }
        Ok(Namespace(segments))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store wire types
// ─────────────────────────────────────────────────────────────────────────────

/// The value stored under one `(namespace, key)` slot: a kind tag plus the
/// opaque content payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredValue {
    pub kind: String,
    pub content: serde_json::Value,
}

/// One search result returned by the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreItem {
    pub namespace: Namespace,
    pub key: String,
    pub value: StoredValue,
    /// Relevance score assigned by the store; items without a score sort
    /// last when results are merged.
    pub score: Option<f64>,
}

/// A write that reconciliation issued against the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AppliedWrite {
    Put {
        namespace: Namespace,
        key: String,
        value: StoredValue,
    },
    Delete {
        namespace: Namespace,
        key: String,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Global error type spanning proposer failures, store failures, and data
/// errors.  No internal retries anywhere: idempotence of the reconciliation
/// diff makes external retries of the whole invocation safe.
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum MnemonError {
    /// The proposer (network/model) failed.  Propagated immediately; no
    /// partial writes are committed for the current phase.
    #[error("Proposer failure: {0}")]
    Proposer(String),

    /// A store search/put/delete failed.  Writes already issued are not
    /// rolled back – each write is individually idempotent.
    #[error("Store failure: {0}")]
    Store(String),

    /// An operation referenced fields inconsistent with its declared kind,
    /// or a kind the caller disabled.
    #[error("Malformed operation: {0}")]
    MalformedOperation(String),

    /// A namespace template placeholder had no runtime binding.
    #[error("Unbound namespace variable: {{{0}}}")]
    UnboundVariable(String),

    /// The blocking call path could not construct its executor.
    #[error("Runtime failure: {0}")]
    Runtime(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_id_mint_is_unique() {
        assert_ne!(RecordId::mint(), RecordId::mint());
    }

    #[test]
    fn record_id_serializes_transparently() {
        let id = RecordId::new("abc123");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"abc123\"");
        let back: RecordId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn memory_record_wraps_text() {
        let rec = Record::memory("likes dark mode");
        assert_eq!(rec.kind, MEMORY_KIND);
        assert_eq!(rec.content["content"], "likes dark mode");
    }

    #[test]
    fn operation_insert_roundtrip() {
        let op = Operation::Insert {
            kind: MEMORY_KIND.to_string(),
            content: json!({ "content": "likes dark mode" }),
        };
        let raw = serde_json::to_string(&op).unwrap();
        assert!(raw.contains("\"op\":\"insert\""));
        let back: Operation = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, op);
    }

    #[test]
    fn operation_done_roundtrip() {
        let raw = serde_json::to_string(&Operation::Done).unwrap();
        assert!(raw.contains("\"op\":\"done\""));
        let back: Operation = serde_json::from_str(&raw).unwrap();
        assert!(matches!(back, Operation::Done));
    }

    #[test]
    fn operation_action_labels() {
        let update = Operation::Update {
            id: RecordId::new("x"),
            kind: MEMORY_KIND.to_string(),
            content: json!({}),
        };
        assert_eq!(update.action_label(), "updated");
        assert_eq!(
            Operation::Delete { id: RecordId::new("x") }.action_label(),
            "deleted"
        );
    }

    #[test]
    fn operation_kinds_gate_variants() {
        let kinds = OperationKinds {
            inserts: true,
            updates: false,
            deletes: true,
            done: false,
        };
        assert!(kinds.allows(&Operation::Insert {
            kind: MEMORY_KIND.to_string(),
            content: json!({}),
        }));
        assert!(!kinds.allows(&Operation::Update {
            id: RecordId::new("x"),
            kind: MEMORY_KIND.to_string(),
            content: json!({}),
        }));
        assert!(kinds.allows(&Operation::Delete { id: RecordId::new("x") }));
        assert!(!kinds.allows(&Operation::Done));
    }

    #[test]
    fn operation_kinds_describe_lists_allowed() {
        let kinds = OperationKinds {
            inserts: true,
            updates: true,
            deletes: false,
            done: true,
        };
        assert_eq!(kinds.describe(), "insert, update, done");
    }

    #[test]
    fn operation_schema_names_all_variants() {
        let schema = serde_json::to_value(schemars::schema_for!(Operation)).unwrap();
        let raw = schema.to_string();
        assert!(raw.contains("insert"));
        assert!(raw.contains("update"));
        assert!(raw.contains("delete"));
        assert!(raw.contains("done"));
    }

    #[test]
    fn namespace_displays_joined() {
        let ns = Namespace::new(["memories", "user-123"]);
        assert_eq!(ns.to_string(), "memories/user-123");
    }

    #[test]
    fn namespace_template_binds_variables() {
        let template = NamespaceTemplate::new(["memories", "{user_id}"]);
        let bindings = HashMap::from([("user_id".to_string(), "user-123".to_string())]);
        let ns = template.bind(&bindings).unwrap();
        assert_eq!(ns, Namespace::new(["memories", "user-123"]));
    }

    #[test]
    fn namespace_template_literal_segments_need_no_bindings() {
        let template = NamespaceTemplate::new(["memories", "shared"]);
        let ns = template.bind(&HashMap::new()).unwrap();
        assert_eq!(ns, Namespace::new(["memories", "shared"]));
    }

    #[test]
    fn namespace_template_missing_binding_is_error() {
        let template = NamespaceTemplate::new(["memories", "{user_id}"]);
        let err = template.bind(&HashMap::new()).unwrap_err();
        assert!(matches!(err, MnemonError::UnboundVariable(name) if name == "user_id"));
    }

    #[test]
    fn stored_value_equality_is_structural() {
        let a = StoredValue {
            kind: MEMORY_KIND.to_string(),
            content: json!({ "content": "x" }),
        };
        let b = a.clone();
        assert_eq!(a, b);
    }

    #[test]
    fn mnemon_error_display() {
        let err = MnemonError::Proposer("connection refused".to_string());
        assert!(err.to_string().contains("Proposer failure"));

        let err2 = MnemonError::MalformedOperation("update without id".to_string());
        assert!(err2.to_string().contains("Malformed operation"));
    }
}
