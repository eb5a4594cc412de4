//! Plain-text extraction from uploaded CV files.

use std::io::{Cursor, Read};

use bytes::Bytes;
use tracing::debug;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_DOC: &str = "application/msword";

/// Upload allowlist. Legacy DOC is accepted but fails at extraction.
pub const ACCEPTED_MIME_TYPES: [&str; 3] = [MIME_PDF, MIME_DOCX, MIME_DOC];

/// Ceiling on the inflated `word/document.xml`.
pub const MAX_DOCUMENT_XML_BYTES: u64 = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Docx,
}

impl DocumentFormat {
    pub fn from_mime(mime_type: &str) -> Result<Self, ExtractionError> {
        match mime_type {
            MIME_PDF => Ok(DocumentFormat::Pdf),
            MIME_DOCX => Ok(DocumentFormat::Docx),
            other => Err(ExtractionError::UnsupportedFormat(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("unsupported file type: {0}")]
    UnsupportedFormat(String),

    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("DOCX extraction failed: {0}")]
    Docx(String),

    #[error("no text found in document")]
    Empty,

    #[error("extraction task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Extracts text off the async runtime; both decoders are CPU bound.
pub async fn extract_text(data: Bytes, mime_type: &str) -> Result<String, ExtractionError> {
    let format = DocumentFormat::from_mime(mime_type)?;
    let text = tokio::task::spawn_blocking(move || match format {
        DocumentFormat::Pdf => extract_pdf(&data),
        DocumentFormat::Docx => extract_docx(&data),
    })
    .await??;

    let text = normalize_whitespace(&text);
    if text.is_empty() {
        return Err(ExtractionError::Empty);
    }
    debug!(chars = text.len(), ?format, "Extracted document text");
    Ok(text)
}

fn extract_pdf(data: &[u8]) -> Result<String, ExtractionError> {
    pdf_extract::extract_text_from_mem(data).map_err(|e| ExtractionError::Pdf(e.to_string()))
}

fn extract_docx(data: &[u8]) -> Result<String, ExtractionError> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(data)).map_err(|e| ExtractionError::Docx(e.to_string()))?;
    let file = archive
        .by_name("word/document.xml")
        .map_err(|e| ExtractionError::Docx(format!("word/document.xml: {e}")))?;
    let mut xml = String::new();
    file.take(MAX_DOCUMENT_XML_BYTES + 1)
        .read_to_string(&mut xml)
        .map_err(|e| ExtractionError::Docx(e.to_string()))?;
    if xml.len() as u64 > MAX_DOCUMENT_XML_BYTES {
        return Err(ExtractionError::Docx(format!(
            "word/document.xml inflates past {MAX_DOCUMENT_XML_BYTES} bytes"
        )));
    }
    Ok(document_xml_to_text(&xml))
}

/// Collects `<w:t>` runs; paragraph ends become newlines, `<w:tab/>` a tab
/// and `<w:br/>` a newline.
fn document_xml_to_text(xml: &str) -> String {
    let mut out = String::with_capacity(xml.len() / 4);
    let mut rest = xml;

    while let Some(start) = rest.find('<') {
        let Some(end) = rest[start..].find('>') else {
            break;
        };
        let tag = &rest[start + 1..start + end];
        rest = &rest[start + end + 1..];

        let name = tag
            .trim_end_matches('/')
            .split_whitespace()
            .next()
            .unwrap_or("");
        match name {
            "w:t" if !tag.ends_with('/') => {
                let close = rest.find("</w:t>").unwrap_or(rest.len());
                out.push_str(&decode_entities(&rest[..close]));
                rest = &rest[close..];
            }
            "w:tab" => out.push('\t'),
            "w:br" | "w:cr" => out.push('\n'),
            "/w:p" => out.push('\n'),
            _ => {}
        }
    }

    out
}

/// Decodes the five XML entities and numeric character references in one
/// pass. Anything unrecognised is kept as written.
fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let decoded = rest
            .find(';')
            .filter(|&end| end <= 10)
            .and_then(|end| decode_entity(&rest[1..end]).map(|c| (c, end)));
        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &rest[end + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "amp" => Some('&'),
        _ => {
            let number = name.strip_prefix('#')?;
            let code = match number.strip_prefix(&['x', 'X'][..]) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => number.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}

/// Trims lines, collapses runs of blank lines to one.
fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines().map(str::trim_end) {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 || out.is_empty() {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim_end().to_string()
}
