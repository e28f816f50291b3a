use lopdf::Document;

use super::{require_content, DocumentParser, ParseMetadata, ParsedDocument};
use crate::core::errors::ApiError;

pub struct PdfParser;

impl DocumentParser for PdfParser {
    fn name(&self) -> &'static str {
        "pdf"
    }

    fn parse(&self, bytes: &[u8]) -> Result<ParsedDocument, ApiError> {
        let doc = Document::load_mem(bytes)
            .map_err(|e| ApiError::CorruptInput(format!("pdf: {}", e)))?;

        let pages = doc.get_pages();
        let page_count = pages.len();

        let mut text = String::new();
        for page_number in pages.keys() {
            // Pages with exotic encodings extract to nothing rather than
            // failing the whole document.
            match doc.extract_text(&[*page_number]) {
                Ok(page_text) => {
                    if !page_text.trim().is_empty() {
                        if !text.is_empty() {
                            text.push('\n');
                        }
                        text.push_str(page_text.trim_end());
                    }
                }
                Err(e) => {
                    tracing::debug!("pdf page {} extraction failed: {}", page_number, e);
                }
            }
        }

        require_content(ParsedDocument {
            text,
            metadata: ParseMetadata {
                page_count: Some(page_count),
                ..Default::default()
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_bytes_are_corrupt_input() {
        let result = PdfParser.parse(b"definitely not a pdf");
        assert!(matches!(result, Err(ApiError::CorruptInput(_))));
    }
}
