pub mod chunking;
pub mod config;
pub mod context;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod index;
pub mod ingest;
pub mod models;
pub mod retriever;

pub use chunking::{build_chunks, split_text, ChunkingConfig, TextWindow};
pub use config::{RetrieverConfig, RetrieverConfigBuilder};
pub use context::assemble_context;
pub use embeddings::{
    CharacterNgramEmbedder, EmbeddingFunction, EmbeddingModel, OllamaEmbedder,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{ConfigError, EmbeddingError, IngestError, RetrievalError};
pub use extractor::{extract_pdf_text, PageText, PdfExtractor};
pub use index::{IndexEntry, MergeOutcome, VectorIndex, INDEX_FILE_NAME};
pub use ingest::{
    directory_info, discover_documents, load_document, load_documents, DirectoryInfo, LoadReport,
    SkippedFile,
};
pub use models::{
    Chunk, Document, DocumentKind, HealthStatus, IndexReport, RetrieverStats, ScoredChunk,
};
pub use retriever::ContextRetriever;
