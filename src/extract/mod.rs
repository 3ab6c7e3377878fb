//! Document text extraction and the upload validation helpers around it.

mod docx;

use async_trait::async_trait;
use log::debug;
use std::path::{ Path, PathBuf };
use thiserror::Error;

pub const ALLOWED_EXTENSIONS: [&str; 3] = ["txt", "pdf", "docx"];
pub const MAX_FILE_SIZE: usize = 10 * 1024 * 1024;
pub const PREVIEW_CHARS: usize = 500;
pub const PROMPT_CHARS: usize = 15_000;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Unsupported file type: {0}")]
    Unsupported(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {kind} document: {message}")]
    Parse {
        kind: &'static str,
        message: String,
    },
}

#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_text(&self, path: &Path) -> Result<String, ExtractionError>;
}

/// Dispatches on the file extension. PDF and DOCX parsing is blocking and runs on
/// the blocking pool.
#[derive(Debug, Default, Clone)]
pub struct FileTextExtractor;

#[async_trait]
impl TextExtractor for FileTextExtractor {
    async fn extract_text(&self, path: &Path) -> Result<String, ExtractionError> {
        let ext = extension(&path.to_string_lossy()).unwrap_or_default();
        debug!("Extracting text from {} ({})", path.display(), ext);
        let owned = path.to_path_buf();
        match ext.as_str() {
            "txt" => {
                tokio::fs::read_to_string(path).await.map_err(|source| ExtractionError::Io {
                    path: owned,
                    source,
                })
            }
            "pdf" => {
                run_blocking("pdf", move || {
                    pdf_extract::extract_text(&owned).map_err(|e| e.to_string())
                }).await
            }
            "docx" => run_blocking("docx", move || docx::read_docx_text(&owned)).await,
            other => Err(ExtractionError::Unsupported(other.to_string())),
        }
    }
}

async fn run_blocking<F>(kind: &'static str, parse: F) -> Result<String, ExtractionError>
    where F: FnOnce() -> Result<String, String> + Send + 'static
{
    tokio::task
        ::spawn_blocking(parse).await
        .map_err(|e| ExtractionError::Parse { kind, message: e.to_string() })?
        .map_err(|message| ExtractionError::Parse { kind, message })
}

pub fn extension(filename: &str) -> Option<String> {
    filename.rsplit_once('.').map(|(_, ext)| ext.to_lowercase())
}

pub fn allowed_file(filename: &str) -> bool {
    extension(filename).map_or(false, |ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
}

/// Reduces a client-supplied name to a safe single path component.
pub fn secure_filename(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    cleaned.trim_start_matches(['.', '_']).to_string()
}

pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub fn preview(text: &str) -> String {
    let head = truncate_chars(text, PREVIEW_CHARS);
    if head.len() < text.len() {
        format!("{}...", head)
    } else {
        head.to_string()
    }
}

pub fn document_prompt(text: &str) -> String {
    format!(
        "Analyze this document and provide:\n1. Key points\n2. Important data\n3. Actionable insights\n\n{}",
        truncate_chars(text, PROMPT_CHARS)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn allows_only_known_extensions() {
        assert!(allowed_file("notes.txt"));
        assert!(allowed_file("Report.PDF"));
        assert!(allowed_file("archive.tar.docx"));
        assert!(!allowed_file("malware.exe"));
        assert!(!allowed_file("txt"));
        assert!(!allowed_file("notes."));
    }

    #[test]
    fn secure_filename_strips_paths_and_odd_characters() {
        assert_eq!(secure_filename("../../etc/passwd"), "passwd");
        assert_eq!(secure_filename("C:\\Users\\me\\my report.pdf"), "my_report.pdf");
        assert_eq!(secure_filename("..hidden.txt"), "hidden.txt");
        assert_eq!(secure_filename("résumé.docx"), "rsum.docx");
    }

    #[test]
    fn preview_marks_truncation() {
        assert_eq!(preview("short"), "short");
        let long = "é".repeat(600);
        let p = preview(&long);
        assert!(p.ends_with("..."));
        assert_eq!(p.chars().count(), PREVIEW_CHARS + 3);
        assert_eq!(preview(&"a".repeat(500)), "a".repeat(500));
    }

    #[test]
    fn document_prompt_caps_text() {
        let prompt = document_prompt(&"x".repeat(20_000));
        assert!(prompt.starts_with("Analyze this document and provide:\n1. Key points"));
        assert_eq!(prompt.matches('x').count(), PROMPT_CHARS);
    }

    #[tokio::test]
    async fn extracts_plain_text() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "hello\nworld").unwrap();

        let text = FileTextExtractor.extract_text(&path).await.unwrap();
        assert_eq!(text, "hello\nworld");
    }

    #[tokio::test]
    async fn invalid_utf8_text_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.txt");
        std::fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();

        let err = FileTextExtractor.extract_text(&path).await.unwrap_err();
        assert!(matches!(err, ExtractionError::Io { .. }));
    }

    #[tokio::test]
    async fn corrupt_pdf_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"not a pdf").unwrap();

        let err = FileTextExtractor.extract_text(&path).await.unwrap_err();
        assert!(matches!(err, ExtractionError::Parse { kind: "pdf", .. }));
    }

    #[tokio::test]
    async fn unknown_extension_is_unsupported() {
        let err = FileTextExtractor.extract_text(Path::new("tool.exe")).await.unwrap_err();
        assert!(matches!(err, ExtractionError::Unsupported(_)));
    }
}
