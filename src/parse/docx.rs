use std::io::{Cursor, Read};

use zip::ZipArchive;

use super::{require_content, DocumentParser, ParseMetadata, ParsedDocument};
use crate::core::errors::ApiError;

pub struct DocxParser;

impl DocumentParser for DocxParser {
    fn name(&self) -> &'static str {
        "docx"
    }

    fn parse(&self, bytes: &[u8]) -> Result<ParsedDocument, ApiError> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| ApiError::CorruptInput(format!("docx archive: {}", e)))?;

        let mut xml = String::new();
        archive
            .by_name("word/document.xml")
            .map_err(|_| ApiError::CorruptInput("docx: missing word/document.xml".to_string()))?
            .read_to_string(&mut xml)
            .map_err(|e| ApiError::CorruptInput(format!("docx document.xml: {}", e)))?;

        let text = plaintext_from_document_xml(&xml);
        let paragraph_count = text.lines().filter(|l| !l.trim().is_empty()).count();

        require_content(ParsedDocument {
            text,
            metadata: ParseMetadata {
                paragraph_count: Some(paragraph_count),
                ..Default::default()
            },
        })
    }
}

/// Reduce WordprocessingML to plain text: paragraphs become lines, tabs and
/// breaks are preserved, every other tag is dropped, entities are decoded.
fn plaintext_from_document_xml(xml: &str) -> String {
    let mut out = String::with_capacity(xml.len() / 4);
    let mut rest = xml;

    while let Some(open) = rest.find('<') {
        out.push_str(&rest[..open]);
        let after = &rest[open..];
        let Some(close) = after.find('>') else {
            break;
        };
        let tag = &after[1..close];
        if tag.starts_with("/w:p") {
            out.push('\n');
        } else if tag.starts_with("w:tab") {
            out.push('\t');
        } else if tag.starts_with("w:br") || tag.starts_with("w:cr") {
            out.push('\n');
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);

    let decoded = out
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'");

    decoded
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
