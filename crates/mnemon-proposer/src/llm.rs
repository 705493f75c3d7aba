//! The [`Proposer`] seam and its OpenAI-compatible implementation.
//!
//! [`LlmProposer`] talks to a model server exposing `/v1/chat/completions`
//! (Ollama, vLLM, or any OpenAI-compatible gateway), constraining the reply
//! to the [`OperationBatch`] JSON Schema so the model can only produce valid
//! operation shapes.

use async_trait::async_trait;
use mnemon_types::{Operation, OperationKinds, Record};
use schemars::schema_for;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::chat::ChatMessage;
use crate::prompt;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from proposer operations.
#[derive(Error, Debug)]
pub enum ProposerError {
    /// The HTTP request to the model server failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The response from the model server could not be parsed.
    #[error("Unexpected response format: {0}")]
    BadResponse(String),
}

impl From<ProposerError> for mnemon_types::MnemonError {
    fn from(err: ProposerError) -> Self {
        mnemon_types::MnemonError::Proposer(err.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Proposer seam
// ─────────────────────────────────────────────────────────────────────────────

/// One proposal round's input: the conversation so far plus the view of the
/// record set the model should consolidate against.
pub struct ProposalRequest<'a> {
    /// Conversation shown to the model: the tagged session block plus any
    /// acknowledgement turns from earlier rounds.
    pub messages: &'a [ChatMessage],
    /// The live records visible this round (delete-tagged entries excluded).
    pub records: &'a [Record],
    /// Which operation kinds may be emitted this round.
    pub kinds: OperationKinds,
    /// Standing instructions for what is worth remembering.
    pub instructions: &'a str,
    /// Proposal rounds left, counting this one.
    pub attempts_remaining: usize,
}

/// A proposer's output for one round.
#[derive(Debug, Clone)]
pub struct Proposal {
    pub operations: Vec<Operation>,
    /// The unparsed model reply, kept for tracing.
    pub raw: String,
}

/// Produces operation batches from conversations.  Implemented by
/// [`LlmProposer`] in production and by scripted fakes in tests.
#[async_trait]
pub trait Proposer: Send + Sync {
    async fn propose(&self, request: ProposalRequest<'_>) -> Result<Proposal, ProposerError>;
}

/// Generates store search queries from a conversation.
///
/// Reconciliation uses this to decide what to retrieve before consolidating;
/// when no generator is configured it falls back to time-dilated windows over
/// the raw conversation text.
#[async_trait]
pub trait QueryGenerator: Send + Sync {
    async fn queries(
        &self,
        messages: &[ChatMessage],
        max_queries: usize,
    ) -> Result<Vec<String>, ProposerError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire shapes (OpenAI-compatible)
// ─────────────────────────────────────────────────────────────────────────────

/// The structured reply shape requested from the model.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct OperationBatch {
    pub operations: Vec<Operation>,
}

/// `response_format` field that enforces structured JSON Schema output.
#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
    json_schema: serde_json::Value,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    response_format: ResponseFormat,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

// ─────────────────────────────────────────────────────────────────────────────
// LlmProposer
// ─────────────────────────────────────────────────────────────────────────────

/// An async [`Proposer`] backed by an OpenAI-compatible chat-completions
/// endpoint.  Construct once and reuse across consolidation rounds.
pub struct LlmProposer {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl LlmProposer {
    /// Create a new proposer pointing at `base_url`
    /// (e.g. `"http://localhost:11434"`) and using `model`
    /// (e.g. `"llama3"`).
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            api_key: None,
            client: reqwest::Client::new(),
        }
    }

    /// Attach a bearer token for gateways that require one.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        schema: serde_json::Value,
    ) -> Result<String, ProposerError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages,
            stream: false,
            response_format: ResponseFormat {
                kind: "json_schema",
                json_schema: schema,
            },
        };

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response: ChatResponse = request
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ProposerError::BadResponse("empty choices array".into()))
    }
}

#[async_trait]
impl Proposer for LlmProposer {
    async fn propose(&self, request: ProposalRequest<'_>) -> Result<Proposal, ProposerError> {
        let system = prompt::system_prompt(
            request.instructions,
            request.records,
            request.kinds,
            request.attempts_remaining,
        );
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        messages.push(ChatMessage::system(system));
        messages.extend_from_slice(request.messages);

        let schema =
            serde_json::to_value(schema_for!(OperationBatch)).unwrap_or(serde_json::Value::Null);
        let raw = self.complete(&messages, schema).await?;
        let batch: OperationBatch = serde_json::from_str(&raw)
            .map_err(|e| ProposerError::BadResponse(format!("invalid operation batch: {e}")))?;
        debug!(operations = batch.operations.len(), "proposal round complete");
        Ok(Proposal {
            operations: batch.operations,
            raw,
        })
    }
}

/// A [`QueryGenerator`] backed by the same chat-completions endpoint,
/// asking the model to produce search strings for relevant prior memories.
pub struct LlmQueryGenerator {
    inner: LlmProposer,
}

/// Reply shape for query generation.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
struct QueryBatch {
    queries: Vec<String>,
}

impl LlmQueryGenerator {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            inner: LlmProposer::new(base_url, model),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.inner = self.inner.with_api_key(api_key);
        self
    }
}

#[async_trait]
impl QueryGenerator for LlmQueryGenerator {
    async fn queries(
        &self,
        messages: &[ChatMessage],
        max_queries: usize,
    ) -> Result<Vec<String>, ProposerError> {
        let system = format!(
            "Produce up to {max_queries} short search queries that would \
retrieve stored memories relevant to this conversation. Respond with a JSON \
object containing a `queries` array of strings."
        );
        let mut prompt_messages = vec![ChatMessage::system(system)];
        prompt_messages.push(ChatMessage::user(prompt::session_block(messages)));

        let schema =
            serde_json::to_value(schema_for!(QueryBatch)).unwrap_or(serde_json::Value::Null);
        let raw = self.inner.complete(&prompt_messages, schema).await?;
        let mut batch: QueryBatch = serde_json::from_str(&raw)
            .map_err(|e| ProposerError::BadResponse(format!("invalid query batch: {e}")))?;
        batch.queries.truncate(max_queries);
        Ok(batch.queries)
    }
}
