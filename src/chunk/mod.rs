//! Sentence-aware chunking with token overlap.
//!
//! Sentences are packed greedily toward a target token size; a chunk closes
//! early rather than exceed the hard maximum, and keeps accepting sentences
//! past the target while it is still under the minimum. Consecutive chunks
//! overlap by prepending the tail of the previous chunk, sentence-aligned,
//! up to the overlap token budget. `char_start..char_end` always covers the
//! prepended tail.

use crate::tokenizer;

#[derive(Debug, Clone)]
pub struct ChunkConfig {
    pub target_tokens: usize,
    pub min_tokens: usize,
    pub max_tokens: usize,
    pub overlap_tokens: usize,
    /// Model name routed to the token counter.
    pub model: String,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            target_tokens: 800,
            min_tokens: 100,
            max_tokens: 1200,
            overlap_tokens: 100,
            model: "gpt-4o-mini".to_string(),
        }
    }
}

/// A chunk before persistence: offsets are byte positions into the source
/// text.
#[derive(Debug, Clone)]
pub struct DraftChunk {
    pub chunk_index: usize,
    pub excerpt: String,
    pub heading: Option<String>,
    pub char_start: usize,
    pub char_end: usize,
    pub tokens_estimate: usize,
}

/// Split `text` into overlapping chunks. Empty or whitespace-only input
/// yields no chunks (the coordinator treats that as a parse failure).
pub fn chunk_text(
    text: &str,
    source_title: Option<&str>,
    url_fallback_heading: Option<&str>,
    config: &ChunkConfig,
) -> Vec<DraftChunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let sentences = split_sentences(text);
    if sentences.is_empty() {
        return Vec::new();
    }

    let token_counts: Vec<usize> = sentences
        .iter()
        .map(|s| tokenizer::count_tokens(&text[s.start..s.end], &config.model))
        .collect();

    // Greedy packing into runs of sentence indices.
    let mut packs: Vec<(usize, usize)> = Vec::new(); // inclusive sentence ranges
    let mut pack_start = 0usize;
    let mut pack_tokens = 0usize;
    for (i, &tokens) in token_counts.iter().enumerate() {
        if i == pack_start && pack_tokens == 0 {
            pack_tokens = tokens;
            continue;
        }
        let would_be = pack_tokens + tokens;
        let close = would_be > config.max_tokens
            || (would_be > config.target_tokens && pack_tokens >= config.min_tokens);
        if close {
            packs.push((pack_start, i - 1));
            pack_start = i;
            pack_tokens = tokens;
        } else {
            pack_tokens = would_be;
        }
    }
    packs.push((pack_start, sentences.len() - 1));

    let mut chunks = Vec::with_capacity(packs.len());
    for (chunk_index, &(first, last)) in packs.iter().enumerate() {
        // Overlap: walk backwards through the previous pack while the tail
        // still fits the overlap budget.
        let mut tail_first = first;
        if chunk_index > 0 {
            let (prev_first, prev_last) = packs[chunk_index - 1];
            let mut budget = config.overlap_tokens;
            let mut i = prev_last;
            loop {
                let tokens = token_counts[i];
                if tokens > budget {
                    break;
                }
                budget -= tokens;
                tail_first = i;
                if i == prev_first {
                    break;
                }
                i -= 1;
            }
        }

        let char_start = sentences[tail_first].start;
        let char_end = sentences[last].end;
        let excerpt = text[char_start..char_end].trim().to_string();
        if excerpt.is_empty() {
            continue;
        }

        let heading = extract_heading(&excerpt)
            .or_else(|| source_title.map(|t| t.to_string()))
            .or_else(|| url_fallback_heading.map(|h| h.to_string()))
            .filter(|h| !h.is_empty());

        let tokens_estimate = tokenizer::count_tokens(&excerpt, &config.model);
        chunks.push(DraftChunk {
            chunk_index,
            excerpt,
            heading,
            char_start,
            char_end,
            tokens_estimate,
        });
    }

    // Indices must stay dense even if a pack collapsed to whitespace.
    for (i, chunk) in chunks.iter_mut().enumerate() {
        chunk.chunk_index = i;
    }
    chunks
}

#[derive(Debug, Clone, Copy)]
struct SentenceSpan {
    start: usize,
    end: usize,
}

const ABBREVIATIONS: &[&str] = &[
    "mr", "mrs", "ms", "dr", "prof", "sr", "jr", "st", "vs", "etc", "fig", "no", "inc", "ltd",
    "co", "dept", "approx", "est", "al",
];

/// Split on sentence-terminal punctuation with abbreviation handling.
/// Paragraph breaks terminate a sentence even without punctuation.
fn split_sentences(text: &str) -> Vec<SentenceSpan> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut start = 0usize;

    let mut iter = text.char_indices().peekable();
    while let Some((i, c)) = iter.next() {
        let at_terminal = matches!(c, '.' | '!' | '?');
        let at_paragraph_break = c == '\n' && bytes.get(i + 1) == Some(&b'\n');

        if at_terminal {
            let next_is_boundary = iter
                .peek()
                .map(|&(_, next)| next.is_whitespace())
                .unwrap_or(true);
            if next_is_boundary && !is_abbreviation_end(text, start, i) {
                push_span(text, start, i + c.len_utf8(), &mut spans);
                start = i + c.len_utf8();
            }
        } else if at_paragraph_break {
            push_span(text, start, i, &mut spans);
            start = i;
        }
    }
    push_span(text, start, text.len(), &mut spans);
    spans
}

fn push_span(text: &str, start: usize, end: usize, spans: &mut Vec<SentenceSpan>) {
    let slice = &text[start..end];
    let trimmed_front = slice.len() - slice.trim_start().len();
    let trimmed_back = slice.len() - slice.trim_end().len();
    let s = start + trimmed_front;
    let e = end - trimmed_back;
    if s < e {
        spans.push(SentenceSpan { start: s, end: e });
    }
}

/// True when the period at `dot` ends a known abbreviation or an initial,
/// i.e. should not terminate the sentence.
fn is_abbreviation_end(text: &str, sentence_start: usize, dot: usize) -> bool {
    if text.as_bytes().get(dot) != Some(&b'.') {
        return false;
    }
    let word = text[sentence_start..dot]
        .rsplit(|c: char| c.is_whitespace() || c == '(' || c == ',')
        .next()
        .unwrap_or("");
    let word = word.trim_matches(|c: char| !c.is_alphanumeric());
    if word.is_empty() {
        return false;
    }
    // Single letters are initials ("J. Smith"); words of dotted short
    // segments are abbreviations ("e.g", "i.e", "U.S").
    if word.chars().count() == 1 && word.chars().all(|c| c.is_alphabetic()) {
        return true;
    }
    if word.contains('.')
        && word
            .split('.')
            .all(|seg| seg.chars().count() <= 2 && seg.chars().all(|c| c.is_alphabetic()))
    {
        return true;
    }
    ABBREVIATIONS.contains(&word.to_ascii_lowercase().as_str())
}

/// First markdown heading line, else first short ALL-CAPS line.
fn extract_heading(excerpt: &str) -> Option<String> {
    for line in excerpt.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(stripped) = line.strip_prefix('#') {
            let title = stripped.trim_start_matches('#').trim();
            if !title.is_empty() {
                return Some(title.to_string());
            }
        }
        let letters: Vec<char> = line.chars().filter(|c| c.is_alphabetic()).collect();
        if !letters.is_empty()
            && letters.len() >= 3
            && line.chars().count() <= 80
            && letters.iter().all(|c| c.is_uppercase())
        {
            return Some(line.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> ChunkConfig {
        ChunkConfig {
            target_tokens: 30,
            min_tokens: 5,
            max_tokens: 50,
            overlap_tokens: 8,
            model: "gpt-4o-mini".to_string(),
        }
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(chunk_text("", None, None, &ChunkConfig::default()).is_empty());
        assert!(chunk_text("  \n\n ", None, None, &ChunkConfig::default()).is_empty());
    }

    #[test]
    fn short_text_yields_one_chunk() {
        let chunks = chunk_text("Just one small sentence.", None, None, &ChunkConfig::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].excerpt, "Just one small sentence.");
        assert!(chunks[0].tokens_estimate > 0);
    }

    #[test]
    fn long_text_produces_dense_overlapping_chunks() {
        let text = "Alpha is the first letter. Beta follows alpha closely. Gamma is third. "
            .repeat(30);
        let chunks = chunk_text(&text, None, None, &small_config());
        assert!(chunks.len() > 2);

        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i);
            assert!(chunk.char_start < chunk.char_end);
        }
        // Overlap: each later chunk starts before the previous one ends.
        for pair in chunks.windows(2) {
            assert!(pair[1].char_start < pair[0].char_end);
            assert!(pair[1].char_start > pair[0].char_start);
        }
    }

    #[test]
    fn oversized_single_sentence_is_emitted_whole() {
        let config = ChunkConfig {
            target_tokens: 10,
            min_tokens: 2,
            max_tokens: 15,
            overlap_tokens: 3,
            model: "gpt-4o-mini".to_string(),
        };
        let giant = format!("{} end.", "word ".repeat(60));
        let chunks = chunk_text(&giant, None, None, &config);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].tokens_estimate > config.max_tokens);
    }

    #[test]
    fn abbreviations_do_not_split_sentences() {
        let spans = split_sentences("Dr. Smith met Mr. Jones. They talked.");
        assert_eq!(spans.len(), 2);
        let spans = split_sentences("Use tools, e.g. hammers. Then rest.");
        assert_eq!(spans.len(), 2);
    }

    #[test]
    fn paragraph_breaks_terminate_sentences() {
        let spans = split_sentences("A heading without punctuation\n\nThen a body sentence.");
        assert_eq!(spans.len(), 2);
    }

    #[test]
    fn heading_prefers_markdown_then_caps_then_title() {
        let md = chunk_text(
            "# Install Guide\nRun the installer. Then reboot the machine properly.",
            Some("Fallback"),
            None,
            &ChunkConfig::default(),
        );
        assert_eq!(md[0].heading.as_deref(), Some("Install Guide"));

        let caps = chunk_text(
            "GETTING STARTED\nDownload the binary. Unpack it somewhere sensible.",
            Some("Fallback"),
            None,
            &ChunkConfig::default(),
        );
        assert_eq!(caps[0].heading.as_deref(), Some("GETTING STARTED"));

        let title = chunk_text(
            "Plain prose without any heading. More prose follows here.",
            Some("Page Title"),
            None,
            &ChunkConfig::default(),
        );
        assert_eq!(title[0].heading.as_deref(), Some("Page Title"));

        let url = chunk_text(
            "Plain prose without any heading. More prose follows here.",
            None,
            Some("getting started"),
            &ChunkConfig::default(),
        );
        assert_eq!(url[0].heading.as_deref(), Some("getting started"));
    }

    #[test]
    fn char_ranges_cover_the_overlap() {
        let text = "One two three four five six. Seven eight nine ten eleven twelve. \
                    Thirteen fourteen fifteen sixteen. Seventeen eighteen nineteen twenty. "
            .repeat(10);
        let chunks = chunk_text(&text, None, None, &small_config());
        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert_eq!(
                text[chunk.char_start..chunk.char_end].trim(),
                chunk.excerpt
            );
        }
    }
}
