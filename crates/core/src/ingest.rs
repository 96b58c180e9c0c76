use crate::extractor::extract_pdf_text;
use crate::{Document, DocumentKind, IngestError};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

const TEXT_EXTENSIONS: [&str; 3] = ["txt", "text", "md"];

fn document_kind(path: &Path) -> Option<DocumentKind> {
    let extension = path.extension().and_then(|ext| ext.to_str())?;
    if extension.eq_ignore_ascii_case("pdf") {
        Some(DocumentKind::Pdf)
    } else if TEXT_EXTENSIONS
        .iter()
        .any(|candidate| extension.eq_ignore_ascii_case(candidate))
    {
        Some(DocumentKind::Text)
    } else {
        None
    }
}

pub fn discover_documents(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        if document_kind(entry.path()).is_some() {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

pub struct LoadReport {
    pub documents: Vec<Document>,
    pub skipped_files: Vec<SkippedFile>,
}

fn ensure_directory(folder: &Path) -> Result<(), IngestError> {
    if !folder.exists() {
        return Err(IngestError::DirectoryNotFound(folder.to_path_buf()));
    }
    if !folder.is_dir() {
        return Err(IngestError::NotADirectory(folder.to_path_buf()));
    }
    Ok(())
}

/// Reads every eligible file under `folder`. Files that cannot be read are
/// skipped and reported instead of failing the whole load.
pub fn load_documents(folder: &Path) -> Result<LoadReport, IngestError> {
    ensure_directory(folder)?;

    let mut documents = Vec::new();
    let mut skipped_files = Vec::new();

    for path in discover_documents(folder) {
        match load_document(&path) {
            Ok(document) if document.text.trim().is_empty() => {
                warn!(path = %path.display(), "skipping empty document");
                skipped_files.push(SkippedFile {
                    path,
                    reason: "document has no text".to_string(),
                });
            }
            Ok(document) => documents.push(document),
            Err(error) => {
                warn!(path = %path.display(), reason = %error, "skipping unreadable document");
                skipped_files.push(SkippedFile {
                    path,
                    reason: error.to_string(),
                });
            }
        }
    }

    info!(
        folder = %folder.display(),
        loaded = documents.len(),
        skipped = skipped_files.len(),
        "loaded documents"
    );

    Ok(LoadReport {
        documents,
        skipped_files,
    })
}

pub fn load_document(path: &Path) -> Result<Document, IngestError> {
    let kind =
        document_kind(path).ok_or_else(|| IngestError::UnsupportedFile(path.to_path_buf()))?;
    let bytes = fs::read(path)?;
    let text = match kind {
        DocumentKind::Text => String::from_utf8_lossy(&bytes).into_owned(),
        DocumentKind::Pdf => extract_pdf_text(path)?,
    };

    Ok(Document {
        document_id: generate_document_id(path),
        source_path: path.to_string_lossy().to_string(),
        text,
        checksum: digest_bytes(&bytes),
        kind,
    })
}

fn generate_document_id(path: &Path) -> String {
    digest_bytes(path.to_string_lossy().as_bytes())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryInfo {
    pub exists: bool,
    pub is_directory: bool,
    pub text_files: usize,
    pub pdf_files: usize,
    pub total_bytes: u64,
}

/// Summarises the eligible files of a corpus directory.
pub fn directory_info(folder: &Path) -> DirectoryInfo {
    let mut info = DirectoryInfo {
        exists: folder.exists(),
        is_directory: folder.is_dir(),
        ..DirectoryInfo::default()
    };
    if !info.is_directory {
        return info;
    }

    for path in discover_documents(folder) {
        match document_kind(&path) {
            Some(DocumentKind::Pdf) => info.pdf_files += 1,
            Some(DocumentKind::Text) => info.text_files += 1,
            None => continue,
        }
        info.total_bytes += fs::metadata(&path).map(|meta| meta.len()).unwrap_or(0);
    }

    info
}
