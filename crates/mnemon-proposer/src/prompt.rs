//! Prompt assembly for the consolidation proposer.
//!
//! The engine shows the model three things each round: standing instructions,
//! the current record view, and the observed conversation wrapped in a tagged
//! session block so the model can tell observations apart from the engine's
//! own framing.

use crate::chat::{ChatMessage, Role};
use mnemon_types::{OperationKinds, Record};
use uuid::Uuid;

/// Default standing instructions for memory consolidation.
pub const DEFAULT_INSTRUCTIONS: &str = "\
You are a long-term memory manager. Extract and consolidate what is worth \
remembering from the observed session into durable records.

- Prefer updating an existing record over inserting a near-duplicate.
- Merge records that describe the same fact; delete the redundant one when \
deletes are permitted.
- Keep each record self-contained: it will be read later without this \
conversation.
- Do not record transient chatter, pleasantries, or information that is \
already captured verbatim.";

/// Render the full system prompt for one proposal round.
///
/// `attempts_remaining` counts this round inclusive; when more than one
/// attempt is left the model is told it can refine its output in later
/// rounds, which discourages over-eager single-shot batches.
pub fn system_prompt(
    instructions: &str,
    records: &[Record],
    kinds: OperationKinds,
    attempts_remaining: usize,
) -> String {
    let mut out = String::from(instructions);
    out.push_str("\n\n## Existing records\n");
    if records.is_empty() {
        out.push_str("(none)\n");
    } else {
        for record in records {
            out.push_str(&format!(
                "- id={} kind={} content={}\n",
                record.id, record.kind, record.content
            ));
        }
    }
    out.push_str(&format!(
        "\nRespond with a JSON object containing an `operations` array. \
Permitted operations: {}.",
        kinds.describe()
    ));
    if kinds.done {
        out.push_str(
            "\nEmit a single `done` operation instead of further edits once \
the records fully reflect the session.",
        );
    }
    if attempts_remaining > 1 {
        out.push_str(&format!(
            "\nYou have {attempts_remaining} attempts remaining; you may \
refine your output in later rounds."
        ));
    }
    out
}

/// Wrap a conversation in a uniquely tagged session block.
///
/// The random tag keeps observed content from masquerading as engine framing
/// even if the conversation itself contains similar-looking delimiters.
pub fn session_block(messages: &[ChatMessage]) -> String {
    let tag = format!("session_{}", Uuid::new_v4().simple());
    format!(
        "<{tag}>\n{}\n</{tag}>",
        render_conversation(messages)
    )
}

/// Render a conversation as `role: content` lines.
pub fn render_conversation(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            format!("{role}: {}", m.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Acknowledgement line confirming one resolved operation back to the model.
pub fn acknowledgement(id: &mnemon_types::RecordId, action: &str) -> String {
    format!("Record {id} {action}.")
}
