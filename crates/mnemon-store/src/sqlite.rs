//! SQLite-backed [`RecordStore`] implementation.
//!
//! Persists records to a local SQLite database so consolidated memories
//! survive process restarts.  One table holds every slot:
//!
//! | column     | type | description                               |
//! |------------|------|-------------------------------------------|
//! | namespace  | TEXT | namespace segments joined by U+001F       |
//! | key        | TEXT | slot key within the namespace             |
//! | kind       | TEXT | record kind tag                           |
//! | content    | TEXT | JSON content payload                      |
//! | updated_at | TEXT | RFC-3339 time of the last put (UTC)       |
//!
//! Search loads the namespace's rows and ranks them in process with the same
//! lexical [`relevance`] measure as the in-memory store; embedding-based
//! ranking belongs to external stores behind the same trait.

use async_trait::async_trait;
use chrono::Utc;
use mnemon_types::{Namespace, StoreItem, StoredValue};
use rusqlite::{Connection, params};
use std::sync::Mutex;
use tracing::debug;

use crate::store::{RecordStore, StoreError, relevance};

/// Separator used to flatten namespace segments into one TEXT column.
const SEGMENT_SEPARATOR: char = '\u{1f}';

fn namespace_to_db(namespace: &Namespace) -> String {
    namespace
        .segments()
        .join(&SEGMENT_SEPARATOR.to_string())
}

fn namespace_from_db(raw: &str) -> Namespace {
    Namespace::new(raw.split(SEGMENT_SEPARATOR))
}

/// SQLite-backed record store.
///
/// The connection is guarded by a mutex; statements are short-lived and the
/// store is expected to see one reconciliation at a time per process.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a persistent database at `path`.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Open a temporary in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn
            .lock()
            .expect("sqlite lock poisoned")
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS records (
                    namespace  TEXT NOT NULL,
                    key        TEXT NOT NULL,
                    kind       TEXT NOT NULL,
                    content    TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (namespace, key)
                );",
            )?;
        Ok(())
    }

    /// Load every row of `namespace` as `(key, value)` pairs.
    fn load_namespace(&self, namespace: &Namespace) -> Result<Vec<(String, StoredValue)>, StoreError> {
        let conn = self.conn.lock().expect("sqlite lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT key, kind, content FROM records WHERE namespace = ?1 ORDER BY key ASC",
        )?;
        let rows = stmt.query_map(params![namespace_to_db(namespace)], |row| {
            let key: String = row.get(0)?;
            let kind: String = row.get(1)?;
            let content: String = row.get(2)?;
            Ok((key, kind, content))
        })?;

        let mut slots = Vec::new();
        for row in rows {
            let (key, kind, raw_content) = row?;
            let content =
                serde_json::from_str(&raw_content).map_err(|e| StoreError::Corrupt {
                    namespace: namespace.to_string(),
                    key: key.clone(),
                    details: e.to_string(),
                })?;
            slots.push((key, StoredValue { kind, content }));
        }
        Ok(slots)
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn search(
        &self,
        namespace: &Namespace,
        query: &str,
        limit: usize,
    ) -> Result<Vec<StoreItem>, StoreError> {
        let slots = self.load_namespace(namespace)?;
        let mut items: Vec<StoreItem> = slots
            .into_iter()
            .map(|(key, value)| {
                let score = if query.is_empty() {
                    None
                } else {
                    Some(relevance(query, &value))
                };
                StoreItem {
                    namespace: namespace.clone(),
                    key,
                    value,
                    score,
                }
            })
            .collect();

        items.sort_by(|a, b| match (b.score, a.score) {
            (Some(x), Some(y)) => x.total_cmp(&y).then_with(|| a.key.cmp(&b.key)),
            (Some(_), None) => std::cmp::Ordering::Greater,
            (None, Some(_)) => std::cmp::Ordering::Less,
            (None, None) => a.key.cmp(&b.key),
        });
        items.truncate(limit);
        debug!(namespace = %namespace, query, hits = items.len(), "sqlite search");
        Ok(items)
    }

    async fn put(
        &self,
        namespace: &Namespace,
        key: &str,
        value: StoredValue,
    ) -> Result<(), StoreError> {
        let content = value.content.to_string();
        self.conn.lock().expect("sqlite lock poisoned").execute(
            "INSERT OR REPLACE INTO records (namespace, key, kind, content, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                namespace_to_db(namespace),
                key,
                value.kind,
                content,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn delete(&self, namespace: &Namespace, key: &str) -> Result<(), StoreError> {
        self.conn.lock().expect("sqlite lock poisoned").execute(
            "DELETE FROM records WHERE namespace = ?1 AND key = ?2",
            params![namespace_to_db(namespace), key],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn value(text: &str) -> StoredValue {
        StoredValue {
            kind: "Memory".to_string(),
            content: json!({ "content": text }),
        }
    }

    fn ns() -> Namespace {
        Namespace::new(["memories", "user-1"])
    }

    #[test]
    fn namespace_db_roundtrip() {
        let original = Namespace::new(["memories", "team", "user-1"]);
        let encoded = namespace_to_db(&original);
        assert_eq!(namespace_from_db(&encoded), original);
    }

    #[tokio::test]
    async fn put_then_search_finds_item() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put(&ns(), "k1", value("prefers dark mode")).await.unwrap();

        let hits = store.search(&ns(), "dark mode", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "k1");
        assert_eq!(hits[0].value.kind, "Memory");
    }

    #[tokio::test]
    async fn put_overwrites_existing_row() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put(&ns(), "k1", value("old")).await.unwrap();
        store.put(&ns(), "k1", value("new")).await.unwrap();

        let hits = store.search(&ns(), "", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].value.content["content"], "new");
    }

    #[tokio::test]
    async fn delete_removes_row() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put(&ns(), "k1", value("x")).await.unwrap();
        store.delete(&ns(), "k1").await.unwrap();
        let hits = store.search(&ns(), "", 10).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn search_is_namespace_scoped() {
        let store = SqliteStore::open_in_memory().unwrap();
        let other = Namespace::new(["memories", "user-2"]);
        store.put(&ns(), "k1", value("dark mode")).await.unwrap();
        store.put(&other, "k2", value("dark mode")).await.unwrap();

        let hits = store.search(&ns(), "dark", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "k1");
    }

    #[tokio::test]
    async fn search_ranks_by_relevance_and_limits() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put(&ns(), "a", value("works at a bakery")).await.unwrap();
        store.put(&ns(), "b", value("prefers dark mode in apps")).await.unwrap();
        store.put(&ns(), "c", value("owns a black cat")).await.unwrap();

        let hits = store.search(&ns(), "dark mode", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].key, "b");
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.db");
        let path = path.to_string_lossy().to_string();

        {
            let store = SqliteStore::open(&path).unwrap();
            store.put(&ns(), "k1", value("durable fact")).await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let hits = store.search(&ns(), "durable", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].value.content["content"], "durable fact");
    }
}
