//! [`Consolidator`] – the bounded propose/merge loop.
//!
//! Each round shows the proposer the live record view and the conversation
//! (plus acknowledgements of earlier rounds), then merges the returned
//! operations into an internal ledger:
//!
//! 1. **Round 0** advertises insert/update/delete (as configured) but not
//!    the `done` sentinel, so at least one full round always runs.
//! 2. **Rounds ≥ 1** also advertise `done`; the loop stops at the round
//!    where the proposer emits it, or returns zero operations.
//! 3. Running out of `max_steps` is normal termination, not an error.
//!
//! Merging is last-write-wins per record id: within a round operations apply
//! in proposer order, and later rounds overwrite earlier ones.  Records from
//! the entry snapshot that no operation touches are carried through
//! unchanged.  Deleted entries drop out of the view shown in later rounds.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use mnemon_proposer::{prompt, ChatMessage, ProposalRequest, Proposer};
use mnemon_types::{MnemonError, Operation, OperationKinds, Record, RecordId};
use tracing::{debug, info};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration bundle for [`Consolidator`].
#[derive(Debug, Clone)]
pub struct ConsolidatorConfig {
    /// Standing instructions for what is worth remembering.
    pub instructions: String,
    /// Maximum number of proposal rounds per invocation (≥ 1).
    pub max_steps: usize,
    pub enable_inserts: bool,
    pub enable_updates: bool,
    pub enable_deletes: bool,
}

impl Default for ConsolidatorConfig {
    fn default() -> Self {
        Self {
            instructions: prompt::DEFAULT_INSTRUCTIONS.to_string(),
            max_steps: 1,
            enable_inserts: true,
            enable_updates: true,
            enable_deletes: true,
        }
    }
}

/// The outcome of one consolidation run.
#[derive(Debug, Clone)]
pub struct Consolidation {
    /// The surviving record set, in first-seen order.
    pub records: Vec<Record>,
    /// Ids from the entry snapshot that were deleted during the run.
    /// Deletes of ids minted mid-run are internal bookkeeping and never
    /// appear here.
    pub deleted_external: HashSet<RecordId>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Record ledger
// ─────────────────────────────────────────────────────────────────────────────

enum Slot {
    Live(Record),
    Removed,
}

/// Insertion-ordered record set with delete tombstones.
struct Ledger {
    order: Vec<RecordId>,
    slots: HashMap<RecordId, Slot>,
}

impl Ledger {
    fn seeded(existing: &[Record]) -> Self {
        let mut ledger = Self {
            order: Vec::new(),
            slots: HashMap::new(),
        };
        for record in existing {
            ledger.upsert(record.clone());
        }
        ledger
    }

    /// Insert or overwrite the slot for `record.id`, reviving a tombstone if
    /// one is present.
    fn upsert(&mut self, record: Record) {
        let id = record.id.clone();
        if self.slots.insert(id.clone(), Slot::Live(record)).is_none() {
            self.order.push(id);
        }
    }

    /// Tombstone `id`.  Unknown ids get a tombstone too, so a later insert
    /// under the same id stays suppressed from `deleted` bookkeeping.
    fn remove(&mut self, id: RecordId) {
        if self.slots.insert(id.clone(), Slot::Removed).is_none() {
            self.order.push(id);
        }
    }

    /// The live records, in first-seen order.
    fn view(&self) -> Vec<Record> {
        self.order
            .iter()
            .filter_map(|id| match self.slots.get(id) {
                Some(Slot::Live(record)) => Some(record.clone()),
                _ => None,
            })
            .collect()
    }

    /// Every id currently tombstoned.
    fn removed_ids(&self) -> impl Iterator<Item = &RecordId> {
        self.order
            .iter()
            .filter(|id| matches!(self.slots.get(*id), Some(Slot::Removed)))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Consolidator
// ─────────────────────────────────────────────────────────────────────────────

/// Drives a [`Proposer`] over a record set until convergence or budget
/// exhaustion.  Construct once and reuse across invocations.
pub struct Consolidator {
    proposer: Arc<dyn Proposer>,
    config: ConsolidatorConfig,
}

impl Consolidator {
    pub fn new(proposer: Arc<dyn Proposer>, config: ConsolidatorConfig) -> Self {
        Self { proposer, config }
    }

    pub fn config(&self) -> &ConsolidatorConfig {
        &self.config
    }

    /// Run the propose/merge loop with the configured round budget.
    pub async fn consolidate(
        &self,
        observations: &[ChatMessage],
        existing: &[Record],
    ) -> Result<Consolidation, MnemonError> {
        self.consolidate_with_budget(observations, existing, self.config.max_steps)
            .await
    }

    /// Convenience: consolidate against a snapshot of plain text memories.
    /// Each string becomes a [`MEMORY_KIND`][mnemon_types::MEMORY_KIND]
    /// record with a fresh id.
    pub async fn consolidate_texts(
        &self,
        observations: &[ChatMessage],
        existing: &[String],
    ) -> Result<Consolidation, MnemonError> {
        let records: Vec<Record> = existing
            .iter()
            .map(|text| Record::memory(text.clone()))
            .collect();
        self.consolidate(observations, &records).await
    }

    /// Run the propose/merge loop with an explicit round budget, overriding
    /// the configured `max_steps` for this invocation only.
    pub async fn consolidate_with_budget(
        &self,
        observations: &[ChatMessage],
        existing: &[Record],
        max_steps: usize,
    ) -> Result<Consolidation, MnemonError> {
        let max_steps = max_steps.max(1);
        let external_ids: HashSet<RecordId> =
            existing.iter().map(|r| r.id.clone()).collect();
        let mut ledger = Ledger::seeded(existing);

        info!(
            existing = existing.len(),
            max_steps, "starting consolidation"
        );

        let mut convo = vec![ChatMessage::user(prompt::session_block(observations))];

        for round in 0..max_steps {
            let kinds = OperationKinds {
                inserts: self.config.enable_inserts,
                updates: self.config.enable_updates,
                deletes: self.config.enable_deletes,
                // The sentinel is withheld on round 0 so at least one full
                // round always runs.
                done: round > 0,
            };
            let view = ledger.view();
            let proposal = self
                .proposer
                .propose(ProposalRequest {
                    messages: &convo,
                    records: &view,
                    kinds,
                    instructions: &self.config.instructions,
                    attempts_remaining: max_steps - round,
                })
                .await?;

            if proposal.operations.is_empty() {
                debug!(round, "proposer returned no operations; converged");
                break;
            }

            let mut saw_done = false;
            let mut acks = Vec::new();
            for op in proposal.operations {
                // `done` is honored whenever it appears, even on round 0.
                if matches!(op, Operation::Done) {
                    saw_done = true;
                    continue;
                }
                if !kinds.allows(&op) {
                    return Err(MnemonError::MalformedOperation(format!(
                        "`{}` operation is not permitted (allowed: {})",
                        operation_name(&op),
                        kinds.describe()
                    )));
                }
                validate(&op)?;
                match op {
                    Operation::Insert { kind, content } => {
                        let id = RecordId::mint();
                        acks.push(prompt::acknowledgement(&id, "inserted"));
                        ledger.upsert(Record::new(id, kind, content));
                    }
                    Operation::Update { id, kind, content } => {
                        // An unknown id behaves as an insert with a
                        // caller-chosen id.
                        acks.push(prompt::acknowledgement(&id, "updated"));
                        ledger.upsert(Record::new(id, kind, content));
                    }
                    Operation::Delete { id } => {
                        acks.push(prompt::acknowledgement(&id, "deleted"));
                        ledger.remove(id);
                    }
                    Operation::Done => unreachable!("handled above"),
                }
            }

            debug!(round, applied = acks.len(), done = saw_done, "round merged");
            convo.push(ChatMessage::assistant(proposal.raw));
            convo.push(ChatMessage::user(acks.join("\n")));

            if saw_done {
                break;
            }
        }

        let records = ledger.view();
        let deleted_external: HashSet<RecordId> = ledger
            .removed_ids()
            .filter(|id| external_ids.contains(*id))
            .cloned()
            .collect();
        info!(
            records = records.len(),
            deleted_external = deleted_external.len(),
            "consolidation complete"
        );
        Ok(Consolidation {
            records,
            deleted_external,
        })
    }
}

/// Reject operations whose fields are inconsistent with their declared kind.
fn validate(op: &Operation) -> Result<(), MnemonError> {
    match op {
        Operation::Insert { kind, .. } if kind.is_empty() => Err(
            MnemonError::MalformedOperation("insert with an empty kind".to_string()),
        ),
        Operation::Update { id, .. } | Operation::Delete { id } if id.as_str().is_empty() => {
            Err(MnemonError::MalformedOperation(format!(
                "{} with an empty id",
                operation_name(op)
            )))
        }
        _ => Ok(()),
    }
}

fn operation_name(op: &Operation) -> &'static str {
    match op {
        Operation::Insert { .. } => "insert",
        Operation::Update { .. } => "update",
        Operation::Delete { .. } => "delete",
        Operation::Done => "done",
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
