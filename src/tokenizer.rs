//! Deterministic token counting.
//!
//! Counts are produced by tiktoken BPE vocabularies and are stable across
//! processes for the same input. Model names route to an encoding family;
//! anything unrecognized falls back to `cl100k_base`, which is close enough
//! for budget arithmetic on non-OpenAI models.

use std::sync::OnceLock;

use tiktoken_rs::CoreBPE;

static CL100K: OnceLock<CoreBPE> = OnceLock::new();
static O200K: OnceLock<CoreBPE> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Cl100k,
    O200k,
}

fn encoding_for_model(model: &str) -> Encoding {
    let model = model.to_ascii_lowercase();
    if model.starts_with("gpt-4o") || model.starts_with("o1") || model.starts_with("o3") {
        Encoding::O200k
    } else {
        Encoding::Cl100k
    }
}

fn bpe(encoding: Encoding) -> &'static CoreBPE {
    match encoding {
        Encoding::Cl100k => CL100K.get_or_init(|| {
            tiktoken_rs::cl100k_base().expect("cl100k_base vocabulary is bundled")
        }),
        Encoding::O200k => {
            O200K.get_or_init(|| tiktoken_rs::o200k_base().expect("o200k_base vocabulary is bundled"))
        }
    }
}

/// Token count of `text` under the encoding for `model`.
pub fn count_tokens(text: &str, model: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    bpe(encoding_for_model(model)).encode_ordinary(text).len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_are_stable_and_nonzero() {
        let text = "The quick brown fox jumps over the lazy dog.";
        let a = count_tokens(text, "gpt-4o-mini");
        let b = count_tokens(text, "gpt-4o-mini");
        assert_eq!(a, b);
        assert!(a > 0);
    }

    #[test]
    fn empty_text_is_zero_tokens() {
        assert_eq!(count_tokens("", "gpt-4o-mini"), 0);
    }

    #[test]
    fn unknown_models_fall_back_to_cl100k() {
        let text = "hello world";
        assert_eq!(
            count_tokens(text, "gemini-1.5-flash"),
            count_tokens(text, "text-embedding-3-small")
        );
    }

    #[test]
    fn model_families_route_to_different_encodings() {
        assert_eq!(encoding_for_model("gpt-4o"), Encoding::O200k);
        assert_eq!(encoding_for_model("gpt-3.5-turbo"), Encoding::Cl100k);
        assert_eq!(encoding_for_model("gemini-1.5-pro"), Encoding::Cl100k);
    }
}
