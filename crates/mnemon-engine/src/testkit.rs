//! Shared fakes for the engine's unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use mnemon_proposer::{
    ChatMessage, Proposal, ProposalRequest, Proposer, ProposerError, QueryGenerator,
};
use mnemon_types::{Operation, OperationKinds, Record};

/// Everything a [`ScriptedProposer`] saw on one round, for assertions.
#[derive(Debug, Clone)]
pub struct RoundCapture {
    pub kinds: OperationKinds,
    pub records: Vec<Record>,
    pub messages: Vec<ChatMessage>,
    pub attempts_remaining: usize,
}

/// A [`Proposer`] that replays a fixed script of operation batches, one per
/// round, recording each request it receives.
pub struct ScriptedProposer {
    rounds: Mutex<VecDeque<Vec<Operation>>>,
    captures: Mutex<Vec<RoundCapture>>,
}

impl ScriptedProposer {
    pub fn new(rounds: Vec<Vec<Operation>>) -> Self {
        Self {
            rounds: Mutex::new(rounds.into()),
            captures: Mutex::new(Vec::new()),
        }
    }

    pub fn captures(&self) -> Vec<RoundCapture> {
        self.captures.lock().unwrap().clone()
    }

    /// Number of rounds the consolidator actually ran.
    pub fn rounds_served(&self) -> usize {
        self.captures.lock().unwrap().len()
    }
}

#[async_trait]
impl Proposer for ScriptedProposer {
    async fn propose(&self, request: ProposalRequest<'_>) -> Result<Proposal, ProposerError> {
        self.captures.lock().unwrap().push(RoundCapture {
            kinds: request.kinds,
            records: request.records.to_vec(),
            messages: request.messages.to_vec(),
            attempts_remaining: request.attempts_remaining,
        });
        let operations = self.rounds.lock().unwrap().pop_front().unwrap_or_default();
        let raw = serde_json::json!({ "operations": operations }).to_string();
        Ok(Proposal { operations, raw })
    }
}

/// A [`QueryGenerator`] that returns a fixed query list.
pub struct FixedQueries(pub Vec<String>);

#[async_trait]
impl QueryGenerator for FixedQueries {
    async fn queries(
        &self,
        _messages: &[ChatMessage],
        max_queries: usize,
    ) -> Result<Vec<String>, ProposerError> {
        let mut queries = self.0.clone();
        queries.truncate(max_queries);
        Ok(queries)
    }
}
