//! Text extraction for uploaded RAG documents.
//!
//! The loader is chosen by file extension: `.pdf` goes through
//! `pdf-extract`, `.txt` and `.md` are read as UTF-8 (invalid sequences are
//! replaced rather than rejected).

use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Text,
    Markdown,
}

impl DocumentKind {
    /// Resolves the loader for a filename, case-insensitively.
    pub fn from_filename(filename: &str) -> Result<Self, ExtractError> {
        let ext = file_extension(filename);
        match ext.as_str() {
            ".pdf" => Ok(DocumentKind::Pdf),
            ".txt" => Ok(DocumentKind::Text),
            ".md" => Ok(DocumentKind::Markdown),
            "" => Err(ExtractError::UnsupportedFileType("(none)".to_string())),
            _ => Err(ExtractError::UnsupportedFileType(ext)),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => ".pdf",
            DocumentKind::Text => ".txt",
            DocumentKind::Markdown => ".md",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
}

/// Lower-cased extension including the leading dot, or `""`.
pub fn file_extension(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default()
}

pub fn extract_text(bytes: &[u8], kind: DocumentKind) -> Result<String, ExtractError> {
    match kind {
        DocumentKind::Pdf => {
            pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
        }
        DocumentKind::Text | DocumentKind::Markdown => {
            Ok(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}
