//! Format-specific text extraction behind a uniform interface.
//!
//! Each parser takes raw bytes and produces the concatenated text plus
//! format-specific metadata. A factory selects the parser from the source
//! type; HTML never goes through here (the crawler owns URL sources).

mod docx;
mod pdf;
mod text;

pub use docx::DocxParser;
pub use pdf::PdfParser;
pub use text::TextParser;

use crate::core::errors::ApiError;
use crate::store::models::SourceType;

/// Extraction result: the document text and whatever the format can tell us
/// about itself.
#[derive(Debug, Clone, Default)]
pub struct ParsedDocument {
    pub text: String,
    pub metadata: ParseMetadata,
}

#[derive(Debug, Clone, Default)]
pub struct ParseMetadata {
    pub page_count: Option<usize>,
    pub paragraph_count: Option<usize>,
    pub encoding: Option<String>,
}

pub trait DocumentParser: Send + Sync {
    fn name(&self) -> &'static str;

    fn parse(&self, bytes: &[u8]) -> Result<ParsedDocument, ApiError>;
}

static PDF: PdfParser = PdfParser;
static DOCX: DocxParser = DocxParser;
static TEXT: TextParser = TextParser;

/// Select a parser for a file source type.
pub fn parser_for(source_type: SourceType) -> Result<&'static dyn DocumentParser, ApiError> {
    match source_type {
        SourceType::Pdf => Ok(&PDF),
        SourceType::Docx => Ok(&DOCX),
        SourceType::Text => Ok(&TEXT),
        SourceType::Html => Err(ApiError::UnsupportedFormat(
            "html sources are fetched by the crawler".to_string(),
        )),
    }
}

/// Shared guard: extraction that yields no characters is a parse failure.
fn require_content(doc: ParsedDocument) -> Result<ParsedDocument, ApiError> {
    if doc.text.trim().is_empty() {
        Err(ApiError::EmptyContent)
    } else {
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_routes_file_types() {
        assert_eq!(parser_for(SourceType::Pdf).unwrap().name(), "pdf");
        assert_eq!(parser_for(SourceType::Docx).unwrap().name(), "docx");
        assert_eq!(parser_for(SourceType::Text).unwrap().name(), "text");
        assert!(matches!(
            parser_for(SourceType::Html),
            Err(ApiError::UnsupportedFormat(_))
        ));
    }
}
