use super::{require_content, DocumentParser, ParseMetadata, ParsedDocument};
use crate::core::errors::ApiError;

pub struct TextParser;

impl DocumentParser for TextParser {
    fn name(&self) -> &'static str {
        "text"
    }

    fn parse(&self, bytes: &[u8]) -> Result<ParsedDocument, ApiError> {
        let (text, encoding) = decode(bytes)?;
        require_content(ParsedDocument {
            text,
            metadata: ParseMetadata {
                encoding: Some(encoding.to_string()),
                ..Default::default()
            },
        })
    }
}

/// Decoding order: UTF-8, UTF-16 (BOM), Latin-1, Windows-1252. The first
/// encoding that decodes cleanly wins and is reported in the metadata.
/// Latin-1 treats the C1 control range as invalid so that Windows-1252
/// punctuation bytes fall through to the CP-1252 table.
fn decode(bytes: &[u8]) -> Result<(String, &'static str), ApiError> {
    if let Some(stripped) = strip_utf8_bom(bytes) {
        if let Ok(text) = std::str::from_utf8(stripped) {
            return Ok((text.to_string(), "utf-8"));
        }
    }
    if let Ok(text) = std::str::from_utf8(bytes) {
        return Ok((text.to_string(), "utf-8"));
    }

    if bytes.len() >= 2 {
        if bytes[0] == 0xFF && bytes[1] == 0xFE {
            if let Some(text) = decode_utf16(&bytes[2..], u16::from_le_bytes) {
                return Ok((text, "utf-16le"));
            }
        }
        if bytes[0] == 0xFE && bytes[1] == 0xFF {
            if let Some(text) = decode_utf16(&bytes[2..], u16::from_be_bytes) {
                return Ok((text, "utf-16be"));
            }
        }
    }

    if bytes.iter().all(|&b| !(0x80..=0x9F).contains(&b)) {
        let text: String = bytes.iter().map(|&b| b as char).collect();
        return Ok((text, "latin-1"));
    }

    let text: String = bytes.iter().map(|&b| cp1252_char(b)).collect();
    Ok((text, "windows-1252"))
}

fn strip_utf8_bom(bytes: &[u8]) -> Option<&[u8]> {
    bytes.strip_prefix(&[0xEF, 0xBB, 0xBF])
}

fn decode_utf16(bytes: &[u8], combine: fn([u8; 2]) -> u16) -> Option<String> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| combine([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).ok()
}

/// Windows-1252 maps 0x80–0x9F to printable punctuation; everything else
/// matches Latin-1.
fn cp1252_char(byte: u8) -> char {
    const HIGH: [char; 32] = [
        '\u{20AC}', '\u{FFFD}', '\u{201A}', '\u{0192}', '\u{201E}', '\u{2026}', '\u{2020}',
        '\u{2021}', '\u{02C6}', '\u{2030}', '\u{0160}', '\u{2039}', '\u{0152}', '\u{FFFD}',
        '\u{017D}', '\u{FFFD}', '\u{FFFD}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}',
        '\u{2022}', '\u{2013}', '\u{2014}', '\u{02DC}', '\u{2122}', '\u{0161}', '\u{203A}',
        '\u{0153}', '\u{FFFD}', '\u{017E}', '\u{0178}',
    ];
    match byte {
        0x80..=0x9F => HIGH[(byte - 0x80) as usize],
        other => other as char,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_is_preferred() {
        let doc = TextParser.parse("héllo world".as_bytes()).unwrap();
        assert_eq!(doc.text, "héllo world");
        assert_eq!(doc.metadata.encoding.as_deref(), Some("utf-8"));
    }

    #[test]
    fn utf16le_bom_is_detected() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "hi".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let doc = TextParser.parse(&bytes).unwrap();
        assert_eq!(doc.text, "hi");
        assert_eq!(doc.metadata.encoding.as_deref(), Some("utf-16le"));
    }

    #[test]
    fn latin1_without_c1_bytes() {
        // 0xE9 = é in Latin-1, invalid on its own as UTF-8
        let doc = TextParser.parse(&[b'c', b'a', b'f', 0xE9]).unwrap();
        assert_eq!(doc.text, "café");
        assert_eq!(doc.metadata.encoding.as_deref(), Some("latin-1"));
    }

    #[test]
    fn c1_range_falls_through_to_cp1252() {
        // 0x93/0x94 are curly quotes in Windows-1252
        let doc = TextParser.parse(&[0x93, b'o', b'k', 0x94]).unwrap();
        assert_eq!(doc.text, "\u{201C}ok\u{201D}");
        assert_eq!(doc.metadata.encoding.as_deref(), Some("windows-1252"));
    }

    #[test]
    fn whitespace_only_is_empty_content() {
        assert!(matches!(
            TextParser.parse(b"   \n\t  "),
            Err(ApiError::EmptyContent)
        ));
    }
}
