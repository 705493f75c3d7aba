//! Time-dilated search windows.
//!
//! The default retrieval strategy when no query generator is configured:
//! search once per window over the tail of the conversation, with spans that
//! double from a recent sliver up to the whole session.  Recent turns appear
//! in every window, so they dominate the merged ranking.

use mnemon_proposer::{prompt, ChatMessage};

/// Render `count` conversation windows as search queries, smallest (most
/// recent) span first.  Window `i` covers the last `len / 2^(count-1-i)`
/// messages, rounded up; the final window is always the full conversation.
/// Identical adjacent windows collapse, so short conversations may yield
/// fewer queries than requested.  An empty conversation yields one empty
/// query, which stores treat as "return everything, unscored".
pub fn dilated_windows(messages: &[ChatMessage], count: usize) -> Vec<String> {
    let count = count.max(1);
    if messages.is_empty() {
        return vec![String::new()];
    }

    let mut queries: Vec<String> = Vec::with_capacity(count);
    for i in 0..count {
        let shrink = 1usize << (count - 1 - i).min(usize::BITS as usize - 1);
        let span = messages.len().div_ceil(shrink).max(1);
        let query = prompt::render_conversation(&messages[messages.len() - span..]);
        if queries.last() != Some(&query) {
            queries.push(query);
        }
    }
    queries
}
