//! `mnemon-store` – the Record Store seam.
//!
//! The consolidation engine treats durable storage as an external
//! collaborator reached through the [`RecordStore`] trait: namespace-scoped
//! `search`, `put`, and `delete`.  Two implementations are provided:
//!
//! - [`memory`] – [`MemoryStore`][memory::MemoryStore]: an in-process map,
//!   useful for tests and for embedding the engine without a database.
//! - [`sqlite`] – [`SqliteStore`][sqlite::SqliteStore]: a local SQLite
//!   substrate that persists records across process restarts.
//!
//! Both score search results with the same lexical token-overlap measure
//! ([`relevance`][store::relevance]).  Scoring here is an interface stand-in:
//! a production deployment would swap in a store with embedding-based
//! retrieval behind the same trait.
//!
//! [`stable_record_id`][store::stable_record_id] maps a store slot to a
//! deterministic logical id (UUID v5 of the namespace tuple plus key) so the
//! same stored item resolves to the same [`RecordId`][mnemon_types::RecordId]
//! on every reconciliation run – which is what lets update/delete operations
//! target it correctly round after round.

pub mod memory;
pub mod sqlite;
pub mod store;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::{RecordStore, StoreError, relevance, stable_record_id};
