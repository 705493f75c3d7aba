//! Synchronous entry points.
//!
//! Callers without an async runtime get the same semantics as the async
//! surface: each call owns a current-thread Tokio runtime and blocks on the
//! async core, so merge and diff results are identical between the two call
//! paths.

use std::collections::HashMap;

use mnemon_proposer::ChatMessage;
use mnemon_types::{AppliedWrite, MnemonError, Record};

use crate::consolidate::{Consolidation, Consolidator};
use crate::reconcile::Reconciler;

fn runtime() -> Result<tokio::runtime::Runtime, MnemonError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| MnemonError::Runtime(e.to_string()))
}

/// Blocking form of [`Consolidator::consolidate`].
pub fn consolidate_blocking(
    consolidator: &Consolidator,
    observations: &[ChatMessage],
    existing: &[Record],
) -> Result<Consolidation, MnemonError> {
    runtime()?.block_on(consolidator.consolidate(observations, existing))
}

/// Blocking form of [`Reconciler::reconcile`].
pub fn reconcile_blocking(
    reconciler: &Reconciler,
    observations: &[ChatMessage],
    bindings: &HashMap<String, String>,
) -> Result<Vec<AppliedWrite>, MnemonError> {
    runtime()?.block_on(reconciler.reconcile(observations, bindings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consolidate::ConsolidatorConfig;
    use crate::reconcile::ReconcilerConfig;
    use crate::testkit::ScriptedProposer;
    use mnemon_store::MemoryStore;
    use mnemon_types::Operation;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn consolidate_blocking_matches_async_semantics() {
        let proposer = Arc::new(ScriptedProposer::new(vec![vec![Operation::Insert {
            kind: "Memory".to_string(),
            content: json!({ "content": "likes tea" }),
        }]]));
        let consolidator = Consolidator::new(proposer, ConsolidatorConfig::default());
        let messages = vec![ChatMessage::user("I like tea.")];

        let out = consolidate_blocking(&consolidator, &messages, &[]).unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].content["content"], "likes tea");
    }

    #[test]
    fn reconcile_blocking_applies_writes() {
        let proposer = Arc::new(ScriptedProposer::new(vec![vec![Operation::Insert {
            kind: "Memory".to_string(),
            content: json!({ "content": "likes tea" }),
        }]]));
        let store = Arc::new(MemoryStore::new());
        let reconciler = Reconciler::new(proposer, store.clone(), ReconcilerConfig::default());
        let messages = vec![ChatMessage::user("I like tea.")];

        let writes = reconcile_blocking(&reconciler, &messages, &HashMap::new()).unwrap();
        assert_eq!(writes.len(), 1);
        assert_eq!(store.len(), 1);
    }
}
