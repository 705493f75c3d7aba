//! `mnemon-proposer` – the model-facing seam of the consolidation engine.
//!
//! The engine never calls a model directly; it drives the [`Proposer`] trait,
//! which turns a conversation plus the current record view into a batch of
//! [`Operation`][mnemon_types::Operation]s.  Modules:
//!
//! - [`chat`] – OpenAI-compatible message types ([`ChatMessage`], [`Role`]).
//! - [`prompt`] – prompt assembly: consolidation instructions, the tagged
//!   session block, and the rendered record view.
//! - [`llm`] – [`LlmProposer`], an async client for an OpenAI-compatible
//!   `/v1/chat/completions` endpoint with JSON-Schema-constrained output,
//!   plus the [`QueryGenerator`] seam used by store retrieval.

pub mod chat;
pub mod llm;
pub mod prompt;

pub use chat::{ChatMessage, Role};
pub use llm::{
    LlmProposer, LlmQueryGenerator, OperationBatch, Proposal, ProposalRequest, Proposer,
    ProposerError, QueryGenerator,
};
