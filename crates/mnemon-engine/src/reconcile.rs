//! [`Reconciler`] – store-backed reconciliation.
//!
//! One reconciliation run:
//!
//! 1. **Retrieve** up to `query_limit` candidate records from the bound
//!    namespace, either via a configured [`QueryGenerator`] or the default
//!    [`dilated_windows`] strategy, searching concurrently and merging by
//!    `(namespace, key)` with the highest-scored instance winning.
//! 2. **Consolidate** the retrieved snapshot against the observations, then
//!    run any configured enrichment [`Phase`]s in order, each seeing the
//!    accumulated output of the ones before it.
//! 3. **Diff** the surviving records against the snapshot and apply only the
//!    writes that change stored state: changed store-backed records go back
//!    to their original slot, new records get a slot keyed by their id, and
//!    deletions of store-backed records become store deletes.  Unchanged
//!    records emit nothing, so re-running a reconciliation is a no-op.
//!
//! Final writes are dispatched concurrently; they touch disjoint keys by
//! construction of the diff.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures_util::future::try_join_all;
use mnemon_proposer::{ChatMessage, Proposer, QueryGenerator};
use mnemon_store::{stable_record_id, RecordStore};
use mnemon_types::{
    AppliedWrite, MnemonError, Namespace, NamespaceTemplate, Record, RecordId, StoreItem,
    StoredValue,
};
use tracing::{debug, info};

use crate::consolidate::{Consolidator, ConsolidatorConfig};
use crate::windows::dilated_windows;

/// Standing instructions for enrichment phases that configure none.
pub const DEFAULT_PHASE_INSTRUCTIONS: &str =
    "You are a memory manager. Deduplicate, consolidate, and enrich these memories.";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// One enrichment pass run after the main consolidation.
#[derive(Debug, Clone)]
pub struct Phase {
    /// Instructions for this pass; falls back to
    /// [`DEFAULT_PHASE_INSTRUCTIONS`].
    pub instructions: Option<String>,
    /// Whether this pass sees the original observations or only the records.
    pub include_observations: bool,
    pub enable_inserts: bool,
    pub enable_deletes: bool,
}

impl Default for Phase {
    fn default() -> Self {
        Self {
            instructions: None,
            include_observations: false,
            enable_inserts: true,
            enable_deletes: true,
        }
    }
}

/// Configuration bundle for [`Reconciler`].
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Namespace template bound against caller-supplied variables once per
    /// invocation.
    pub namespace: NamespaceTemplate,
    /// Standing instructions for the main consolidation pass.
    pub instructions: String,
    /// Maximum number of candidate records retrieved from the store (≥ 1).
    pub query_limit: usize,
    /// Round budget handed to each consolidation pass.
    pub max_steps: usize,
    pub enable_inserts: bool,
    pub enable_deletes: bool,
    /// Enrichment passes run in order after the main consolidation.
    pub phases: Vec<Phase>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            namespace: NamespaceTemplate::new(["memories"]),
            instructions: mnemon_proposer::prompt::DEFAULT_INSTRUCTIONS.to_string(),
            query_limit: 5,
            max_steps: 1,
            enable_inserts: true,
            enable_deletes: true,
            phases: Vec::new(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reconciler
// ─────────────────────────────────────────────────────────────────────────────

/// Reconciles conversation observations against a record store namespace.
/// Construct once and reuse across invocations.
pub struct Reconciler {
    proposer: Arc<dyn Proposer>,
    store: Arc<dyn RecordStore>,
    query_generator: Option<Arc<dyn QueryGenerator>>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        proposer: Arc<dyn Proposer>,
        store: Arc<dyn RecordStore>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            proposer,
            store,
            query_generator: None,
            config,
        }
    }

    /// Use a query generator for retrieval instead of dilated windows.
    pub fn with_query_generator(mut self, generator: Arc<dyn QueryGenerator>) -> Self {
        self.query_generator = Some(generator);
        self
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Run one full reconciliation and return every write applied to the
    /// store (puts and deletes).
    pub async fn reconcile(
        &self,
        observations: &[ChatMessage],
        bindings: &HashMap<String, String>,
    ) -> Result<Vec<AppliedWrite>, MnemonError> {
        let namespace = self.config.namespace.bind(bindings)?;

        // ── Retrieval ─────────────────────────────────────────────────────────
        let query_count = (self.config.query_limit / 4).max(1);
        let queries = match &self.query_generator {
            Some(generator) => {
                let mut queries = generator.queries(observations, query_count).await?;
                if queries.is_empty() {
                    queries.push(String::new());
                }
                queries
            }
            None => dilated_windows(observations, query_count),
        };
        debug!(namespace = %namespace, searches = queries.len(), "retrieving candidates");

        let searches = queries
            .iter()
            .map(|query| self.store.search(&namespace, query, self.config.query_limit));
        let result_lists = try_join_all(searches).await?;
        let items = merge_results(result_lists, self.config.query_limit);

        let mut store_map: HashMap<RecordId, StoreItem> = HashMap::new();
        let mut records: Vec<Record> = Vec::with_capacity(items.len());
        for item in items {
            let id = stable_record_id(&item.namespace, &item.key);
            records.push(Record::new(
                id.clone(),
                item.value.kind.clone(),
                item.value.content.clone(),
            ));
            store_map.insert(id, item);
        }
        info!(
            namespace = %namespace,
            retrieved = records.len(),
            "reconciliation snapshot assembled"
        );

        // ── Consolidation + enrichment phases ─────────────────────────────────
        let mut removed: HashSet<RecordId> = HashSet::new();

        let main = Consolidator::new(
            self.proposer.clone(),
            ConsolidatorConfig {
                instructions: self.config.instructions.clone(),
                max_steps: self.config.max_steps,
                enable_inserts: self.config.enable_inserts,
                enable_updates: true,
                enable_deletes: self.config.enable_deletes,
            },
        );
        let outcome = main.consolidate(observations, &records).await?;
        records = outcome.records;
        removed.extend(outcome.deleted_external);

        for phase in &self.config.phases {
            let consolidator = Consolidator::new(
                self.proposer.clone(),
                ConsolidatorConfig {
                    instructions: phase
                        .instructions
                        .clone()
                        .unwrap_or_else(|| DEFAULT_PHASE_INSTRUCTIONS.to_string()),
                    max_steps: self.config.max_steps,
                    enable_inserts: phase.enable_inserts,
                    enable_updates: true,
                    enable_deletes: phase.enable_deletes,
                },
            );
            let phase_observations: &[ChatMessage] = if phase.include_observations {
                observations
            } else {
                &[]
            };
            let outcome = consolidator.consolidate(phase_observations, &records).await?;
            records = outcome.records;
            removed.extend(outcome.deleted_external);
        }

        // ── Diff ──────────────────────────────────────────────────────────────
        let mut writes: Vec<AppliedWrite> = Vec::new();
        for record in &records {
            if removed.contains(&record.id) {
                continue;
            }
            let value = StoredValue {
                kind: record.kind.clone(),
                content: record.content.clone(),
            };
            match store_map.get(&record.id) {
                Some(item) => {
                    // Unchanged store-backed records emit nothing.
                    if item.value == value {
                        continue;
                    }
                    writes.push(AppliedWrite::Put {
                        namespace: item.namespace.clone(),
                        key: item.key.clone(),
                        value,
                    });
                }
                None => writes.push(AppliedWrite::Put {
                    namespace: namespace.clone(),
                    key: record.id.to_string(),
                    value,
                }),
            }
        }
        for id in &removed {
            // Removed ids with no retrieved counterpart were never persisted.
            if let Some(item) = store_map.get(id) {
                writes.push(AppliedWrite::Delete {
                    namespace: item.namespace.clone(),
                    key: item.key.clone(),
                });
            }
        }

        // ── Apply ─────────────────────────────────────────────────────────────
        // Writes touch disjoint keys, so they can run concurrently.
        try_join_all(writes.iter().map(|write| async move {
            match write {
                AppliedWrite::Put {
                    namespace,
                    key,
                    value,
                } => self.store.put(namespace, key, value.clone()).await,
                AppliedWrite::Delete { namespace, key } => {
                    self.store.delete(namespace, key).await
                }
            }
        }))
        .await?;

        info!(namespace = %namespace, writes = writes.len(), "reconciliation applied");
        Ok(writes)
    }
}

/// Merge concurrent search result lists, deduplicating by `(namespace, key)`
/// with the highest-scored instance winning, then keep the top `limit`
/// overall.  Unscored items sort last; ties break by key for determinism.
fn merge_results(result_lists: Vec<Vec<StoreItem>>, limit: usize) -> Vec<StoreItem> {
    let mut merged: HashMap<(Namespace, String), StoreItem> = HashMap::new();
    for item in result_lists.into_iter().flatten() {
        let slot = (item.namespace.clone(), item.key.clone());
        match merged.get(&slot) {
            Some(kept) if score(kept) >= score(&item) => {}
            _ => {
                merged.insert(slot, item);
            }
        }
    }
    let mut items: Vec<StoreItem> = merged.into_values().collect();
    items.sort_by(|a, b| {
        score(b)
            .total_cmp(&score(a))
            .then_with(|| a.key.cmp(&b.key))
    });
    items.truncate(limit);
    items
}

fn score(item: &StoreItem) -> f64 {
    item.score.unwrap_or(f64::NEG_INFINITY)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{FixedQueries, ScriptedProposer};
    use mnemon_store::MemoryStore;
    use mnemon_types::Operation;
    use serde_json::json;

    fn ns() -> Namespace {
        Namespace::new(["memories", "user-1"])
    }

    fn value(text: &str) -> StoredValue {
        StoredValue {
            kind: "Memory".to_string(),
            content: json!({ "content": text }),
        }
    }

    fn item(key: &str, text: &str, score: Option<f64>) -> StoreItem {
        StoreItem {
            namespace: ns(),
            key: key.to_string(),
            value: value(text),
            score,
        }
    }

    fn update(id: &RecordId, text: &str) -> Operation {
        Operation::Update {
            id: id.clone(),
            kind: "Memory".to_string(),
            content: json!({ "content": text }),
        }
    }

    async fn seeded_store(entries: &[(&str, &str)]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for (key, text) in entries {
            store.put(&ns(), key, value(text)).await.unwrap();
        }
        store
    }

    fn reconciler(
        rounds: Vec<Vec<Operation>>,
        store: Arc<MemoryStore>,
        config: ReconcilerConfig,
    ) -> (Arc<ScriptedProposer>, Reconciler) {
        let proposer = Arc::new(ScriptedProposer::new(rounds));
        let reconciler = Reconciler::new(proposer.clone(), store, config);
        (proposer, reconciler)
    }

    fn config() -> ReconcilerConfig {
        ReconcilerConfig {
            namespace: NamespaceTemplate::new(["memories", "{user_id}"]),
            ..ReconcilerConfig::default()
        }
    }

    fn bindings() -> HashMap<String, String> {
        HashMap::from([("user_id".to_string(), "user-1".to_string())])
    }

    fn observations() -> Vec<ChatMessage> {
        vec![ChatMessage::user("I use dark mode in every app now.")]
    }

    // ── merge_results ────────────────────────────────────────────────────────

    #[test]
    fn merge_keeps_highest_score_per_slot() {
        let merged = merge_results(
            vec![
                vec![item("k1", "dark mode", Some(0.2))],
                vec![item("k1", "dark mode", Some(0.9))],
            ],
            10,
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].score, Some(0.9));
    }

    #[test]
    fn merge_sorts_unscored_items_last() {
        let merged = merge_results(
            vec![vec![
                item("a", "x", None),
                item("b", "y", Some(0.1)),
                item("c", "z", Some(0.8)),
            ]],
            10,
        );
        let keys: Vec<&str> = merged.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, ["c", "b", "a"]);
    }

    #[test]
    fn merge_truncates_to_limit() {
        let merged = merge_results(
            vec![vec![
                item("a", "x", Some(0.9)),
                item("b", "y", Some(0.5)),
                item("c", "z", Some(0.1)),
            ]],
            2,
        );
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[1].key, "b");
    }

    // ── reconcile ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn unchanged_records_produce_no_writes() {
        let store = seeded_store(&[("k1", "dark mode everywhere")]).await;
        let (_, reconciler) = reconciler(vec![vec![]], store, config());
        let writes = reconciler.reconcile(&observations(), &bindings()).await.unwrap();
        assert!(writes.is_empty());
    }

    #[tokio::test]
    async fn rewriting_identical_content_is_a_noop() {
        let store = seeded_store(&[("k1", "dark mode everywhere")]).await;
        let id = stable_record_id(&ns(), "k1");
        let (_, reconciler) = reconciler(
            vec![vec![update(&id, "dark mode everywhere")]],
            store,
            config(),
        );
        let writes = reconciler.reconcile(&observations(), &bindings()).await.unwrap();
        assert!(writes.is_empty());
    }

    #[tokio::test]
    async fn changed_record_writes_back_to_original_slot() {
        let store = seeded_store(&[("k1", "uses light mode")]).await;
        let id = stable_record_id(&ns(), "k1");
        let (_, reconciler) = reconciler(
            vec![vec![update(&id, "uses dark mode")]],
            store.clone(),
            config(),
        );
        let writes = reconciler.reconcile(&observations(), &bindings()).await.unwrap();
        assert_eq!(writes.len(), 1);
        assert!(matches!(
            &writes[0],
            AppliedWrite::Put { namespace, key, .. }
                if *namespace == ns() && key == "k1"
        ));
        assert_eq!(
            store.get(&ns(), "k1").unwrap().content["content"],
            "uses dark mode"
        );
    }

    #[tokio::test]
    async fn new_record_is_stored_under_its_id() {
        let store = seeded_store(&[]).await;
        let (_, reconciler) = reconciler(
            vec![vec![Operation::Insert {
                kind: "Memory".to_string(),
                content: json!({ "content": "uses dark mode" }),
            }]],
            store.clone(),
            config(),
        );
        let writes = reconciler.reconcile(&observations(), &bindings()).await.unwrap();
        assert_eq!(writes.len(), 1);
        let AppliedWrite::Put { key, .. } = &writes[0] else {
            panic!("expected a put");
        };
        assert_eq!(
            store.get(&ns(), key).unwrap().content["content"],
            "uses dark mode"
        );
    }

    #[tokio::test]
    async fn delete_of_store_backed_record_removes_the_slot() {
        let store = seeded_store(&[("k1", "stale fact")]).await;
        let id = stable_record_id(&ns(), "k1");
        let (_, reconciler) = reconciler(
            vec![vec![Operation::Delete { id }]],
            store.clone(),
            config(),
        );
        let writes = reconciler.reconcile(&observations(), &bindings()).await.unwrap();
        assert_eq!(writes.len(), 1);
        assert!(matches!(
            &writes[0],
            AppliedWrite::Delete { key, .. } if key == "k1"
        ));
        assert!(store.get(&ns(), "k1").is_none());
    }

    #[tokio::test]
    async fn delete_of_ephemeral_record_never_touches_the_store() {
        let store = seeded_store(&[]).await;
        let (_, reconciler) = reconciler(
            vec![vec![
                update(&RecordId::new("tmp"), "short-lived"),
                Operation::Delete {
                    id: RecordId::new("tmp"),
                },
            ]],
            store.clone(),
            config(),
        );
        let writes = reconciler.reconcile(&observations(), &bindings()).await.unwrap();
        assert!(writes.is_empty());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn retrieved_snapshot_is_visible_to_the_proposer() {
        let store = seeded_store(&[("k1", "uses dark mode in every app")]).await;
        let (proposer, reconciler) = reconciler(vec![vec![]], store, config());
        reconciler.reconcile(&observations(), &bindings()).await.unwrap();
        let captures = proposer.captures();
        assert_eq!(captures[0].records.len(), 1);
        assert_eq!(
            captures[0].records[0].id,
            stable_record_id(&ns(), "k1")
        );
    }

    #[tokio::test]
    async fn query_generator_replaces_windowing() {
        let store = seeded_store(&[("k1", "prefers oat milk")]).await;
        let (proposer, reconciler) = reconciler(vec![vec![]], store, config());
        let reconciler =
            reconciler.with_query_generator(Arc::new(FixedQueries(vec!["oat milk".to_string()])));
        reconciler.reconcile(&observations(), &bindings()).await.unwrap();
        assert_eq!(proposer.captures()[0].records.len(), 1);
    }

    #[tokio::test]
    async fn phases_see_prior_phase_output() {
        let store = seeded_store(&[]).await;
        let mut config = config();
        config.phases = vec![Phase::default()];
        let (proposer, reconciler) = reconciler(
            vec![
                vec![Operation::Insert {
                    kind: "Memory".to_string(),
                    content: json!({ "content": "uses dark mode" }),
                }],
                vec![],
            ],
            store,
            config,
        );
        reconciler.reconcile(&observations(), &bindings()).await.unwrap();
        let captures = proposer.captures();
        assert_eq!(captures.len(), 2);
        assert_eq!(captures[1].records.len(), 1);
        assert_eq!(captures[1].records[0].content["content"], "uses dark mode");
        // The phase opted out of observations, so its session block is empty.
        assert!(!captures[1].messages[0].content.contains("dark mode in every app"));
    }

    #[tokio::test]
    async fn phase_delete_accumulates_into_the_diff() {
        let store = seeded_store(&[("k1", "stale fact")]).await;
        let id = stable_record_id(&ns(), "k1");
        let mut config = config();
        config.phases = vec![Phase::default()];
        let (_, reconciler) = reconciler(
            vec![vec![], vec![Operation::Delete { id }]],
            store.clone(),
            config,
        );
        let writes = reconciler.reconcile(&observations(), &bindings()).await.unwrap();
        assert_eq!(writes.len(), 1);
        assert!(matches!(&writes[0], AppliedWrite::Delete { .. }));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn unbound_namespace_variable_aborts_with_no_writes() {
        let store = seeded_store(&[("k1", "fact")]).await;
        let (proposer, reconciler) = reconciler(vec![vec![]], store, config());
        let err = reconciler
            .reconcile(&observations(), &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MnemonError::UnboundVariable(_)));
        assert_eq!(proposer.rounds_served(), 0);
    }
}
