use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("similarity threshold must be within 0.0..=1.0, got {0}")]
    InvalidThreshold(f32),

    #[error("unknown embedding model: {0}")]
    UnknownEmbeddingModel(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("embedding dimension {actual} does not match expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding request failed: {0}")]
    Request(String),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("unsupported file type: {}", .0.display())]
    UnsupportedFile(PathBuf),

    #[error("embedding failed while indexing: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("index at {} is corrupted: {details}", .path.display())]
    IndexCorruption { path: PathBuf, details: String },

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("indexing timed out after {0:?}")]
    Timeout(Duration),

    #[error("retrieval is disabled")]
    Disabled,
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("retrieval failed: {0}")]
    Retrieval(#[from] EmbeddingError),

    #[error("retrieval timed out after {0:?}")]
    Timeout(Duration),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
