//! Settings consumed when a [`ContextRetriever`](crate::ContextRetriever) is built.

use crate::chunking::ChunkingConfig;
use crate::embeddings::EmbeddingModel;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Retriever configuration. Every field has a default, so partial JSON
/// documents deserialize cleanly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrieverConfig {
    pub enabled: bool,
    /// Where the index snapshot is stored between runs.
    pub persist_directory: PathBuf,
    /// Corpus read by `reload`.
    pub data_directory: PathBuf,
    /// Default result limit for a search.
    #[serde(alias = "max_documents")]
    pub max_results: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub embedding_model: String,
    /// Base URL for HTTP embedding backends.
    pub embedding_endpoint: String,
    /// Expected vector length for HTTP backends; unset means the first
    /// response decides.
    pub embedding_dimensions: Option<usize>,
    pub similarity_threshold: f32,
    pub request_timeout_ms: u64,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            persist_directory: PathBuf::from("./index_store"),
            data_directory: PathBuf::from("./data"),
            max_results: 3,
            chunk_size: 1_000,
            chunk_overlap: 200,
            embedding_model: "char-ngram".to_string(),
            embedding_endpoint: "http://localhost:11434".to_string(),
            embedding_dimensions: None,
            similarity_threshold: 0.6,
            request_timeout_ms: 30_000,
        }
    }
}

impl RetrieverConfig {
    pub fn builder() -> RetrieverConfigBuilder {
        RetrieverConfigBuilder::default()
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when `chunk_overlap >= chunk_size`, the
    /// threshold lies outside `0.0..=1.0`, the timeout or pinned embedding
    /// dimensions are zero, or the embedding model identifier is unknown.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chunking()?;
        validate_threshold(self.similarity_threshold)?;
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidArgument(
                "request_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.embedding_dimensions == Some(0) {
            return Err(ConfigError::InvalidArgument(
                "embedding_dimensions must be greater than zero".to_string(),
            ));
        }
        self.model()?;
        Ok(())
    }

    pub fn chunking(&self) -> Result<ChunkingConfig, ConfigError> {
        ChunkingConfig::new(self.chunk_size, self.chunk_overlap)
    }

    pub fn model(&self) -> Result<EmbeddingModel, ConfigError> {
        self.embedding_model.parse()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

pub(crate) fn validate_threshold(threshold: f32) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&threshold) {
        Ok(())
    } else {
        Err(ConfigError::InvalidThreshold(threshold))
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetrieverConfigBuilder {
    config: RetrieverConfig,
}

impl RetrieverConfigBuilder {
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    pub fn persist_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.persist_directory = path.into();
        self
    }

    pub fn data_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_directory = path.into();
        self
    }

    pub fn max_results(mut self, max_results: usize) -> Self {
        self.config.max_results = max_results;
        self
    }

    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    pub fn embedding_model(mut self, model: impl Into<String>) -> Self {
        self.config.embedding_model = model.into();
        self
    }

    pub fn embedding_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.embedding_endpoint = endpoint.into();
        self
    }

    pub fn embedding_dimensions(mut self, dimensions: usize) -> Self {
        self.config.embedding_dimensions = Some(dimensions);
        self
    }

    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.config.similarity_threshold = threshold;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn build(self) -> Result<RetrieverConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
