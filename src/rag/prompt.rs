//! Prompt composition under a token budget.
//!
//! Guarantees: the system prompt is always first and verbatim, retrieved
//! context always precedes history, and the current query is always the
//! final message. Context may use at most half the budget; history is
//! dropped oldest-first to make the rest fit.

use crate::core::errors::ApiError;
use crate::llm::ChatMessage;
use crate::store::models::ChunkHit;
use crate::store::queries::HistoryPair;
use crate::tokenizer;

/// Turns kept from the conversation, oldest first.
pub const MAX_HISTORY_TURNS: usize = 5;

pub struct PromptInputs<'a> {
    pub system_prompt: &'a str,
    /// Retrieval hits ordered by score, best first.
    pub chunks: &'a [ChunkHit],
    /// Prior query/response pairs, oldest first.
    pub history: &'a [HistoryPair],
    pub query: &'a str,
    pub model: &'a str,
    /// B = model context window - max response tokens - safety margin.
    pub budget: usize,
}

#[derive(Debug)]
pub struct ComposedPrompt {
    pub system: String,
    pub messages: Vec<ChatMessage>,
    /// Chunks that survived the budget, in input (score) order.
    pub included_chunks: usize,
    /// The raw context block, for previews.
    pub context_text: String,
}

/// Stable marker carrying the chunk id, referenced by citations.
fn chunk_marker(index: usize, hit: &ChunkHit) -> String {
    format!("[C{}:{}] {}", index, hit.chunk_id, hit.excerpt)
}

pub fn compose(inputs: &PromptInputs) -> Result<ComposedPrompt, ApiError> {
    let count = |text: &str| tokenizer::count_tokens(text, inputs.model);

    let fixed = count(inputs.system_prompt) + count(inputs.query);
    if fixed > inputs.budget {
        return Err(ApiError::ContextOverflow);
    }

    // Context gets at most half the budget; drop from the low-score end.
    let context_budget = inputs.budget / 2;
    let mut kept = inputs.chunks.len();
    let mut context_text;
    let mut context_tokens;
    loop {
        context_text = inputs.chunks[..kept]
            .iter()
            .enumerate()
            .map(|(i, hit)| chunk_marker(i, hit))
            .collect::<Vec<_>>()
            .join("\n\n");
        context_tokens = if kept == 0 { 0 } else { count(&context_text) };
        let fits = context_tokens <= context_budget && fixed + context_tokens <= inputs.budget;
        if fits || kept == 0 {
            break;
        }
        kept -= 1;
    }

    if !inputs.chunks.is_empty() && kept == 0 {
        // Retrieval produced context but not even the best chunk fits.
        return Err(ApiError::ContextOverflow);
    }

    // History is bounded, then dropped oldest-first until the total fits.
    let recent = if inputs.history.len() > MAX_HISTORY_TURNS {
        &inputs.history[inputs.history.len() - MAX_HISTORY_TURNS..]
    } else {
        inputs.history
    };
    let turn_tokens: Vec<usize> = recent
        .iter()
        .map(|pair| count(&pair.query) + count(&pair.response))
        .collect();
    let mut drop_from = 0usize;
    let mut history_tokens: usize = turn_tokens.iter().sum();
    while drop_from < recent.len() && fixed + context_tokens + history_tokens > inputs.budget {
        history_tokens -= turn_tokens[drop_from];
        drop_from += 1;
    }

    let mut messages = Vec::new();
    if kept > 0 {
        messages.push(ChatMessage::user(format!(
            "Context from the knowledge base:\n{}",
            context_text
        )));
    }
    for pair in &recent[drop_from..] {
        messages.push(ChatMessage::user(pair.query.clone()));
        messages.push(ChatMessage::assistant(pair.response.clone()));
    }
    messages.push(ChatMessage::user(inputs.query.to_string()));

    Ok(ComposedPrompt {
        system: inputs.system_prompt.to_string(),
        messages,
        included_chunks: kept,
        context_text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn hit(excerpt: &str, score: f32) -> ChunkHit {
        ChunkHit {
            chunk_id: Uuid::new_v4(),
            source_id: Uuid::new_v4(),
            excerpt: excerpt.to_string(),
            heading: None,
            score,
        }
    }

    fn pair(q: &str, r: &str) -> HistoryPair {
        HistoryPair {
            query: q.to_string(),
            response: r.to_string(),
        }
    }

    #[test]
    fn message_order_is_context_history_query() {
        let chunks = vec![hit("Alpha facts.", 0.9)];
        let history = vec![pair("earlier question", "earlier answer")];
        let composed = compose(&PromptInputs {
            system_prompt: "You are helpful.",
            chunks: &chunks,
            history: &history,
            query: "What is alpha?",
            model: "gpt-4o-mini",
            budget: 4096,
        })
        .unwrap();

        assert_eq!(composed.system, "You are helpful.");
        assert!(composed.messages[0].content.starts_with("Context"));
        assert_eq!(composed.messages[1].content, "earlier question");
        assert_eq!(composed.messages[2].content, "earlier answer");
        assert_eq!(
            composed.messages.last().unwrap().content,
            "What is alpha?"
        );
        assert!(composed.messages[0]
            .content
            .contains(&chunks[0].chunk_id.to_string()));
    }

    #[test]
    fn low_score_chunks_are_dropped_to_fit_half_budget() {
        let chunks = vec![
            hit(&"best chunk ".repeat(30), 0.9),
            hit(&"worse chunk ".repeat(30), 0.5),
            hit(&"worst chunk ".repeat(30), 0.3),
        ];
        let composed = compose(&PromptInputs {
            system_prompt: "sys",
            chunks: &chunks,
            history: &[],
            query: "q",
            model: "gpt-4o-mini",
            budget: 260, // half-budget holds one marked chunk, not two
        })
        .unwrap();

        assert!(composed.included_chunks < 3);
        assert!(composed.included_chunks >= 1);
        assert!(composed.context_text.contains("best chunk"));
        assert!(!composed.context_text.contains("worst chunk"));
    }

    #[test]
    fn history_drops_oldest_first() {
        let history = vec![
            pair(&"oldest ".repeat(30), &"reply ".repeat(30)),
            pair("newest question", "newest reply"),
        ];
        let composed = compose(&PromptInputs {
            system_prompt: "sys",
            chunks: &[],
            history: &history,
            query: "current question",
            model: "gpt-4o-mini",
            budget: 40,
        })
        .unwrap();

        let all: Vec<&str> = composed
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        assert!(all.contains(&"newest question"));
        assert!(!all.iter().any(|c| c.contains("oldest")));
    }

    #[test]
    fn history_is_capped_at_five_turns() {
        let history: Vec<HistoryPair> =
            (0..8).map(|i| pair(&format!("q{}", i), &format!("a{}", i))).collect();
        let composed = compose(&PromptInputs {
            system_prompt: "sys",
            chunks: &[],
            history: &history,
            query: "q",
            model: "gpt-4o-mini",
            budget: 4096,
        })
        .unwrap();

        // 5 turns * 2 messages + final query
        assert_eq!(composed.messages.len(), 11);
        assert_eq!(composed.messages[0].content, "q3");
    }

    #[test]
    fn overflow_when_one_chunk_plus_query_cannot_fit() {
        let chunks = vec![hit(&"giant ".repeat(500), 0.9)];
        let err = compose(&PromptInputs {
            system_prompt: "sys",
            chunks: &chunks,
            history: &[],
            query: "q",
            model: "gpt-4o-mini",
            budget: 50,
        })
        .unwrap_err();
        assert!(matches!(err, ApiError::ContextOverflow));
    }

    #[test]
    fn overflow_when_fixed_parts_exceed_budget() {
        let err = compose(&PromptInputs {
            system_prompt: &"long system prompt ".repeat(50),
            chunks: &[],
            history: &[],
            query: "q",
            model: "gpt-4o-mini",
            budget: 20,
        })
        .unwrap_err();
        assert!(matches!(err, ApiError::ContextOverflow));
    }

    #[test]
    fn empty_retrieval_composes_without_context_block() {
        let composed = compose(&PromptInputs {
            system_prompt: "sys",
            chunks: &[],
            history: &[],
            query: "anything",
            model: "gpt-4o-mini",
            budget: 1000,
        })
        .unwrap();
        assert_eq!(composed.messages.len(), 1);
        assert_eq!(composed.included_chunks, 0);
        assert!(composed.context_text.is_empty());
    }
}
