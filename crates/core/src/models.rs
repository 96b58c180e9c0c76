use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DocumentKind {
    Text,
    Pdf,
}

/// One ingested file. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub document_id: String,
    pub source_path: String,
    pub text: String,
    pub checksum: String,
    pub kind: DocumentKind,
}

/// A contiguous character window of a [`Document`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub chunk_id: String,
    pub document_id: String,
    pub source_path: String,
    pub chunk_index: u64,
    /// Offset of the first character, counted in chars rather than bytes.
    pub offset: usize,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IndexReport {
    pub documents: usize,
    pub chunks_added: usize,
    pub chunks_skipped: usize,
    pub total_chunks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrieverStats {
    pub enabled: bool,
    pub total_queries: u64,
    pub successful_queries: u64,
    pub empty_queries: u64,
    pub errors: u64,
    pub average_results: f64,
    pub average_context_length: f64,
    pub indexed_chunks: usize,
    pub documents_loaded: usize,
    pub last_indexed_at: Option<DateTime<Utc>>,
}

impl RetrieverStats {
    pub fn success_rate(&self) -> f64 {
        if self.total_queries == 0 {
            0.0
        } else {
            self.successful_queries as f64 / self.total_queries as f64
        }
    }

    pub fn error_rate(&self) -> f64 {
        self.errors as f64 / self.total_queries.max(1) as f64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthStatus {
    pub healthy: bool,
    pub issues: Vec<String>,
}
