//! Plain-text extraction from uploaded documents.
//!
//! The document kind is decided by file suffix alone. Each kind has one
//! extraction strategy; a strategy that fails logs a warning and yields an
//! empty string so the caller can report a clean "extraction failed" outcome.

use std::{fmt, path::Path};

use calamine::{Reader, open_workbook_auto};
use docx_rs::{DocumentChild, ParagraphChild, RunChild};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Supported document kinds, tagged as they appear in the metadata log.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum DocumentKind {
    #[serde(rename = "pdf")]
    Pdf,
    #[serde(rename = "docx")]
    Word,
    #[serde(rename = "xlsx")]
    Spreadsheet,
    #[serde(rename = "txt")]
    Text,
    #[serde(rename = "unknown")]
    Unknown,
}

impl DocumentKind {
    /// Classify a file by its (case-insensitive) suffix.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::path::Path;
    /// use preppal::extract::DocumentKind;
    ///
    /// assert_eq!(DocumentKind::from_path(Path::new("a.PDF")), DocumentKind::Pdf);
    /// assert_eq!(DocumentKind::from_path(Path::new("b.xls")), DocumentKind::Spreadsheet);
    /// assert_eq!(DocumentKind::from_path(Path::new("c.md")), DocumentKind::Unknown);
    /// ```
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_lowercase();

        match ext.as_str() {
            "pdf" => DocumentKind::Pdf,
            "docx" => DocumentKind::Word,
            "xlsx" | "xls" => DocumentKind::Spreadsheet,
            "txt" => DocumentKind::Text,
            _ => DocumentKind::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::Word => "docx",
            DocumentKind::Spreadsheet => "xlsx",
            DocumentKind::Text => "txt",
            DocumentKind::Unknown => "unknown",
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, DocumentKind::Unknown)
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Text pulled out of a document together with its detected kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub kind: DocumentKind,
    pub text: String,
}

/// Extract plain text from the file at `path`.
///
/// Never fails: unsupported files and failed strategies produce empty text.
pub fn extract(path: &Path) -> Extraction {
    let kind = DocumentKind::from_path(path);
    debug!(path = %path.display(), %kind, "extracting text");

    let result = match kind {
        DocumentKind::Pdf => extract_pdf(path),
        DocumentKind::Word => extract_docx(path),
        DocumentKind::Spreadsheet => extract_spreadsheet(path),
        DocumentKind::Text => extract_plain(path),
        DocumentKind::Unknown => Ok(String::new()),
    };

    let text = result.unwrap_or_else(|message| {
        warn!(path = %path.display(), %kind, "{message}");
        String::new()
    });

    Extraction { kind, text }
}

fn extract_pdf(path: &Path) -> Result<String, String> {
    let doc = lopdf::Document::load(path)
        .map_err(|e| format!("failed to open PDF: {e}"))?;

    // A page whose text cannot be decoded contributes nothing.
    let pages: Vec<String> = doc
        .get_pages()
        .keys()
        .map(|&page| doc.extract_text(&[page]).unwrap_or_default())
        .collect();

    Ok(pages.join("\n").trim().to_string())
}

fn extract_docx(path: &Path) -> Result<String, String> {
    let bytes = std::fs::read(path)
        .map_err(|e| format!("failed to read DOCX: {e}"))?;
    let docx = docx_rs::read_docx(&bytes)
        .map_err(|e| format!("failed to parse DOCX: {e}"))?;

    let paragraphs: Vec<String> = docx
        .document
        .children
        .iter()
        .filter_map(|child| match child {
            DocumentChild::Paragraph(p) => Some(paragraph_text(&p.children)),
            _ => None,
        })
        .collect();

    Ok(paragraphs.join("\n").trim().to_string())
}

fn paragraph_text(children: &[ParagraphChild]) -> String {
    let mut out = String::new();
    for child in children {
        let ParagraphChild::Run(run) = child else {
            continue;
        };
        for rc in &run.children {
            match rc {
                RunChild::Text(t) => out.push_str(&t.text),
                RunChild::Tab(_) => out.push('\t'),
                RunChild::Break(_) => out.push('\n'),
                _ => {}
            }
        }
    }
    out
}

fn extract_spreadsheet(path: &Path) -> Result<String, String> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|e| format!("failed to open spreadsheet: {e}"))?;

    let mut out = Vec::new();
    for sheet in workbook.sheet_names() {
        let range = match workbook.worksheet_range(&sheet) {
            Ok(range) => range,
            Err(e) => {
                warn!(path = %path.display(), %sheet, "skipping sheet: {e}");
                continue;
            }
        };

        out.push(format!("### Sheet: {sheet}"));
        let rows: Vec<String> = range
            .rows()
            .map(|row| {
                row.iter()
                    .map(|cell| cell.to_string())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect();
        out.push(rows.join("\n"));
    }

    Ok(out.join("\n").trim().to_string())
}

fn extract_plain(path: &Path) -> Result<String, String> {
    let bytes = std::fs::read(path)
        .map_err(|e| format!("failed to read text file: {e}"))?;
    Ok(decode_text(bytes))
}

/// Decode as UTF-8, falling back to Shift_JIS with undecodable bytes dropped.
fn decode_text(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => {
            let bytes = err.into_bytes();
            let (decoded, _, had_errors) =
                encoding_rs::SHIFT_JIS.decode(&bytes);
            if had_errors {
                debug!("dropped undecodable bytes from legacy-encoded text");
            }
            decoded.chars().filter(|&c| c != '\u{FFFD}').collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_suffix() {
        let cases = [
            ("notes.pdf", DocumentKind::Pdf),
            ("report.DOCX", DocumentKind::Word),
            ("grades.xlsx", DocumentKind::Spreadsheet),
            ("old.xls", DocumentKind::Spreadsheet),
            ("plain.txt", DocumentKind::Text),
            ("slides.pptx", DocumentKind::Unknown),
            ("no_extension", DocumentKind::Unknown),
        ];
        for (name, expected) in cases {
            assert_eq!(DocumentKind::from_path(Path::new(name)), expected);
        }
    }

    #[test]
    fn kind_serializes_with_log_tags() {
        let json = serde_json::to_string(&DocumentKind::Word).unwrap();
        assert_eq!(json, "\"docx\"");
        let kind: DocumentKind = serde_json::from_str("\"xlsx\"").unwrap();
        assert_eq!(kind, DocumentKind::Spreadsheet);
    }

    #[test]
    fn reads_utf8_text() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("lecture.txt");
        std::fs::write(&path, "光合成とは\nphotosynthesis").unwrap();

        let out = extract(&path);
        assert_eq!(out.kind, DocumentKind::Text);
        assert_eq!(out.text, "光合成とは\nphotosynthesis");
    }

    #[test]
    fn falls_back_to_shift_jis() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("legacy.txt");
        let (encoded, _, _) = encoding_rs::SHIFT_JIS.encode("日本語のテキスト");
        std::fs::write(&path, &encoded).unwrap();

        let out = extract(&path);
        assert_eq!(out.kind, DocumentKind::Text);
        assert_eq!(out.text, "日本語のテキスト");
    }

    #[test]
    fn unknown_suffix_yields_empty_text() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("deck.pptx");
        std::fs::write(&path, "whatever").unwrap();

        let out = extract(&path);
        assert_eq!(out.kind, DocumentKind::Unknown);
        assert!(out.text.is_empty());
    }

    #[test]
    fn broken_pdf_yields_empty_text() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("broken.pdf");
        std::fs::write(&path, "this is not a pdf").unwrap();

        let out = extract(&path);
        assert_eq!(out.kind, DocumentKind::Pdf);
        assert!(out.text.is_empty());
    }

    #[test]
    fn broken_docx_and_spreadsheet_yield_empty_text() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["broken.docx", "broken.xlsx"] {
            let path = tmp.path().join(name);
            std::fs::write(&path, "not a zip archive").unwrap();
            assert!(extract(&path).text.is_empty(), "{name}");
        }
    }

    #[test]
    fn missing_file_yields_empty_text() {
        let out = extract(Path::new("/nonexistent/preppal/missing.txt"));
        assert_eq!(out.kind, DocumentKind::Text);
        assert!(out.text.is_empty());
    }
}
