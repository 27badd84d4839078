// Document loading
// Walks a folder and turns every supported file into a `Document`


use std::fmt;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::{RagError, Result};

/// Separator placed between consecutive PDF pages
const PAGE_SEPARATOR: &str = "\n\n";

/// A loaded source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub source_id: String,
    pub raw_text: String,
    pub metadata: DocumentMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentMetadata {
    pub kind: SourceKind,
    /// Size of the file on disk
    pub byte_len: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Text {
        format: TextFormat,
        encoding: &'static str,
    },
    Pdf {
        pages: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextFormat {
    Plain,
    Markdown,
}

/// Recognized file classes, keyed by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileClass {
    Text(TextFormat),
    Pdf,
}

impl FileClass {
    fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        if ext.eq_ignore_ascii_case("txt") {
            Some(Self::Text(TextFormat::Plain))
        } else if ext.eq_ignore_ascii_case("md") || ext.eq_ignore_ascii_case("markdown") {
            Some(Self::Text(TextFormat::Markdown))
        } else if ext.eq_ignore_ascii_case("pdf") {
            Some(Self::Pdf)
        } else {
            None
        }
    }
}

/// A file that could not be loaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionFailure {
    pub path: PathBuf,
    pub reason: String,
}

impl fmt::Display for IngestionFailure {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.reason)
    }
}

impl From<IngestionFailure> for RagError {
    #[inline]
    fn from(failure: IngestionFailure) -> Self {
        Self::Ingestion {
            path: failure.path,
            reason: failure.reason,
        }
    }
}

/// Outcome of loading a folder: every document that loaded plus every file that did not
#[derive(Debug, Default)]
pub struct LoadReport {
    pub documents: Vec<Document>,
    pub failures: Vec<IngestionFailure>,
}

impl LoadReport {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.documents.len()
    }
}

/// Load every supported document below `root`, recursively.
///
/// Files are visited in path order so repeated loads produce the same sequence.
/// A file that fails to load is recorded in the report and skipped.
#[inline]
pub fn load_documents(root: &Path) -> LoadReport {
    let mut report = LoadReport::default();

    if !root.is_dir() {
        warn!("Document folder {} does not exist", root.display());
        report.failures.push(IngestionFailure {
            path: root.to_path_buf(),
            reason: "not a readable directory".to_string(),
        });
        return report;
    }

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().unwrap_or(root).to_path_buf();
                warn!("Failed to read {}: {}", path.display(), e);
                report.failures.push(IngestionFailure {
                    path,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let Some(class) = FileClass::from_path(path) else {
            debug!("Skipping unsupported file {}", path.display());
            continue;
        };

        match load_file(path, class) {
            Ok(document) => {
                debug!(
                    "Loaded {} ({} chars)",
                    document.source_id,
                    document.raw_text.len()
                );
                report.documents.push(document);
            }
            Err(failure) => {
                warn!("Failed to load {}", failure);
                report.failures.push(failure);
            }
        }
    }

    info!(
        "Loaded {} documents from {} ({} failed)",
        report.documents.len(),
        root.display(),
        report.failures.len()
    );

    report
}

/// Load a single file, picking the decoder from its extension
#[inline]
pub fn load_document(path: &Path) -> Result<Document> {
    let class = FileClass::from_path(path).ok_or_else(|| RagError::Ingestion {
        path: path.to_path_buf(),
        reason: "unsupported file extension".to_string(),
    })?;
    load_file(path, class).map_err(RagError::from)
}

fn load_file(path: &Path, class: FileClass) -> std::result::Result<Document, IngestionFailure> {
    let fail = |reason: String| IngestionFailure {
        path: path.to_path_buf(),
        reason,
    };

    let bytes = fs::read(path).map_err(|e| fail(e.to_string()))?;
    let byte_len = bytes.len() as u64;

    let (raw_text, kind) = match class {
        FileClass::Text(format) => {
            let text = String::from_utf8(bytes)
                .map_err(|e| fail(format!("not valid UTF-8: {}", e.utf8_error())))?;
            (
                text,
                SourceKind::Text {
                    format,
                    encoding: "utf-8",
                },
            )
        }
        FileClass::Pdf => {
            let pages = extract_pdf_pages(&bytes).map_err(fail)?;
            let count = pages.len();
            (pages.join(PAGE_SEPARATOR), SourceKind::Pdf { pages: count })
        }
    };

    Ok(Document {
        source_id: path.display().to_string(),
        raw_text,
        metadata: DocumentMetadata { kind, byte_len },
    })
}

/// Decode a PDF page by page.
///
/// The decoder can panic on malformed input; that is reported as a failure of this file.
fn extract_pdf_pages(bytes: &[u8]) -> std::result::Result<Vec<String>, String> {
    panic::catch_unwind(AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem_by_pages(bytes)
    }))
    .map_err(|_| "PDF decoder panicked".to_string())?
    .map_err(|e| format!("PDF extraction failed: {:?}", e))
}
