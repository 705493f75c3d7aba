//! In-memory [`RecordStore`] implementation.
//!
//! Backs the engine's tests and lightweight embeddings where persistence is
//! not needed.  All data is lost on drop.

use async_trait::async_trait;
use mnemon_types::{Namespace, StoreItem, StoredValue};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::store::{RecordStore, StoreError, relevance};

/// A process-local record store backed by a `HashMap`.
///
/// Search ranks entries in the namespace by lexical relevance to the query;
/// an empty query returns entries unscored, ordered by key for determinism.
#[derive(Default)]
pub struct MemoryStore {
    slots: RwLock<HashMap<(Namespace, String), StoredValue>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored slots across all namespaces.
    pub fn len(&self) -> usize {
        self.slots.read().expect("store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetch a single value (test/inspection helper).
    pub fn get(&self, namespace: &Namespace, key: &str) -> Option<StoredValue> {
        self.slots
            .read()
            .expect("store lock poisoned")
            .get(&(namespace.clone(), key.to_string()))
            .cloned()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn search(
        &self,
        namespace: &Namespace,
        query: &str,
        limit: usize,
    ) -> Result<Vec<StoreItem>, StoreError> {
        let slots = self.slots.read().expect("store lock poisoned");
        let mut items: Vec<StoreItem> = slots
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|((ns, key), value)| StoreItem {
                namespace: ns.clone(),
                key: key.clone(),
                value: value.clone(),
                score: if query.is_empty() {
                    None
                } else {
                    Some(relevance(query, value))
                },
            })
            .collect();

        items.sort_by(|a, b| match (b.score, a.score) {
            (Some(x), Some(y)) => x.total_cmp(&y).then_with(|| a.key.cmp(&b.key)),
            (Some(_), None) => std::cmp::Ordering::Greater,
            (None, Some(_)) => std::cmp::Ordering::Less,
            (None, None) => a.key.cmp(&b.key),
        });
        items.truncate(limit);
        Ok(items)
    }

    async fn put(
        &self,
        namespace: &Namespace,
        key: &str,
        value: StoredValue,
    ) -> Result<(), StoreError> {
        self.slots
            .write()
            .expect("store lock poisoned")
            .insert((namespace.clone(), key.to_string()), value);
        Ok(())
    }

    async fn delete(&self, namespace: &Namespace, key: &str) -> Result<(), StoreError> {
        self.slots
            .write()
            .expect("store lock poisoned")
            .remove(&(namespace.clone(), key.to_string()));
        Ok(())
    }
}
