//! The retrieval service object.
//!
//! [`ContextRetriever`] owns the published [`VectorIndex`] and serves
//! searches against it. Writers (`index_documents`, `reload`, `clear`) are
//! serialised by a mutex, build the next index off to the side, persist it,
//! and only then swap it in, so a reader always sees either the old or the
//! new index.

use crate::chunking::{build_chunks, ChunkingConfig};
use crate::config::{validate_threshold, RetrieverConfig};
use crate::context::assemble_context;
use crate::embeddings::EmbeddingFunction;
use crate::error::{ConfigError, EmbeddingError, IngestError, RetrievalError};
use crate::index::{IndexEntry, VectorIndex};
use crate::ingest::{self, LoadReport};
use crate::models::{Document, HealthStatus, IndexReport, RetrieverStats, ScoredChunk};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

const EMBED_BATCH_SIZE: usize = 32;
const MAX_HEALTHY_ERROR_RATE: f64 = 0.1;

#[derive(Debug, Default)]
struct QueryCounters {
    total: AtomicU64,
    successful: AtomicU64,
    empty: AtomicU64,
    errors: AtomicU64,
    results: AtomicU64,
    contexts: AtomicU64,
    context_chars: AtomicU64,
}

impl QueryCounters {
    fn record_results(&self, count: usize) {
        if count == 0 {
            self.empty.fetch_add(1, Ordering::Relaxed);
        } else {
            self.successful.fetch_add(1, Ordering::Relaxed);
            self.results.fetch_add(count as u64, Ordering::Relaxed);
        }
    }

    fn record_context(&self, length: usize) {
        self.contexts.fetch_add(1, Ordering::Relaxed);
        self.context_chars.fetch_add(length as u64, Ordering::Relaxed);
    }
}

pub struct ContextRetriever {
    config: RetrieverConfig,
    chunking: ChunkingConfig,
    embedder: Arc<dyn EmbeddingFunction>,
    index: RwLock<Option<Arc<VectorIndex>>>,
    writer: Mutex<()>,
    enabled: AtomicBool,
    threshold_bits: AtomicU32,
    last_reload_failed: AtomicBool,
    counters: QueryCounters,
}

impl ContextRetriever {
    /// Builds a retriever around an explicit embedding function. No IO
    /// happens here; call [`initialize`](Self::initialize) or
    /// [`reload`](Self::reload) to populate the index.
    pub fn new(
        config: RetrieverConfig,
        embedder: Arc<dyn EmbeddingFunction>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let chunking = config.chunking()?;

        Ok(Self {
            enabled: AtomicBool::new(config.enabled),
            threshold_bits: AtomicU32::new(config.similarity_threshold.to_bits()),
            chunking,
            embedder,
            index: RwLock::new(None),
            writer: Mutex::new(()),
            last_reload_failed: AtomicBool::new(false),
            counters: QueryCounters::default(),
            config,
        })
    }

    /// Builds a retriever with the embedding function named by
    /// `config.embedding_model`.
    pub fn from_config(config: RetrieverConfig) -> Result<Self, ConfigError> {
        let embedder = config
            .model()?
            .build(&config.embedding_endpoint, config.embedding_dimensions)?;
        Self::new(config, embedder)
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn toggle(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        info!(enabled, "retrieval toggled");
    }

    pub fn similarity_threshold(&self) -> f32 {
        f32::from_bits(self.threshold_bits.load(Ordering::SeqCst))
    }

    pub fn set_similarity_threshold(&self, threshold: f32) -> Result<(), ConfigError> {
        validate_threshold(threshold)?;
        self.threshold_bits
            .store(threshold.to_bits(), Ordering::SeqCst);
        info!(threshold, "similarity threshold updated");
        Ok(())
    }

    /// Startup policy: reuse the persisted index when it was built by the
    /// configured embedding model, otherwise rebuild from the data directory.
    /// A failed rebuild disables retrieval and returns the cause.
    pub async fn initialize(&self) -> Result<IndexReport, IngestError> {
        if !self.is_enabled() {
            info!("retrieval disabled; skipping index initialization");
            return Ok(IndexReport::default());
        }

        let directory = self.config.persist_directory.clone();
        let persisted = tokio::task::spawn_blocking(move || VectorIndex::load(&directory))
            .await
            .map_err(join_error)?;

        match persisted {
            Ok(Some(index)) if index.model_id() == self.embedder.model_id() => {
                let report = IndexReport {
                    documents: document_count(&index),
                    chunks_added: 0,
                    chunks_skipped: 0,
                    total_chunks: index.len(),
                };
                info!(
                    chunks = index.len(),
                    built_at = %index.built_at().to_rfc3339(),
                    "loaded persisted index"
                );
                self.publish(Arc::new(index)).await;
                return Ok(report);
            }
            Ok(Some(index)) => warn!(
                persisted_model = index.model_id(),
                configured_model = %self.embedder.model_id(),
                "persisted index was built by another embedding model; rebuilding"
            ),
            Ok(None) => info!("no persisted index found; building from data directory"),
            Err(error) => warn!(%error, "persisted index unreadable; rebuilding from data directory"),
        }

        match self.reload().await {
            Ok(report) => Ok(report),
            Err(error) => {
                error!(%error, "index initialization failed; disabling retrieval");
                self.toggle(false);
                Err(error)
            }
        }
    }

    /// Reads the eligible files under `directory`. The index is not touched.
    pub async fn load_documents(&self, directory: &Path) -> Result<LoadReport, IngestError> {
        let directory = directory.to_path_buf();
        tokio::task::spawn_blocking(move || ingest::load_documents(&directory))
            .await
            .map_err(join_error)?
    }

    /// Chunks, embeds and appends `documents` to the index. Chunks already
    /// indexed are skipped, so re-running on an unchanged corpus adds
    /// nothing. A no-op while retrieval is disabled.
    pub async fn index_documents(&self, documents: &[Document]) -> Result<IndexReport, IngestError> {
        if !self.is_enabled() {
            debug!("retrieval disabled; index_documents is a no-op");
            let total_chunks = self.current_index().await.map_or(0, |index| index.len());
            return Ok(IndexReport {
                total_chunks,
                ..IndexReport::default()
            });
        }

        let _guard = self.writer.lock().await;
        let base = match self.current_index().await {
            Some(index) => index,
            None => Arc::new(self.empty_index()),
        };

        let (next, report) = self.build_on(&base, documents).await?;
        self.persist(&next).await?;
        self.publish(next).await;

        info!(
            documents = report.documents,
            added = report.chunks_added,
            skipped = report.chunks_skipped,
            total = report.total_chunks,
            "indexed documents"
        );
        Ok(report)
    }

    /// Rebuilds the index from the configured data directory, replacing the
    /// previous contents. On any failure the previous index stays published.
    pub async fn reload(&self) -> Result<IndexReport, IngestError> {
        if !self.is_enabled() {
            warn!("retrieval disabled; reload refused");
            return Err(IngestError::Disabled);
        }

        let _guard = self.writer.lock().await;
        info!(directory = %self.config.data_directory.display(), "reloading documents");

        let result = async {
            let loaded = self.load_documents(&self.config.data_directory).await?;
            let fresh = self.empty_index();
            let (next, report) = self.build_on(&fresh, &loaded.documents).await?;
            self.persist(&next).await?;
            Ok::<_, IngestError>((next, report))
        }
        .await;

        match result {
            Ok((next, report)) => {
                self.publish(next).await;
                self.last_reload_failed.store(false, Ordering::SeqCst);
                info!(
                    documents = report.documents,
                    chunks = report.total_chunks,
                    "reload complete"
                );
                Ok(report)
            }
            Err(error) => {
                self.last_reload_failed.store(true, Ordering::SeqCst);
                error!(%error, "reload failed; keeping previous index");
                Err(error)
            }
        }
    }

    /// Deletes the persisted index and publishes an empty one. Works while
    /// retrieval is disabled.
    pub async fn clear(&self) -> Result<(), IngestError> {
        let _guard = self.writer.lock().await;

        let directory = self.config.persist_directory.clone();
        let removed = tokio::task::spawn_blocking(move || VectorIndex::remove(&directory))
            .await
            .map_err(join_error)??;

        self.publish(Arc::new(self.empty_index())).await;
        self.last_reload_failed.store(false, Ordering::SeqCst);
        info!(
            directory = %self.config.persist_directory.display(),
            removed,
            "index cleared"
        );
        Ok(())
    }

    /// Searches with the configured request timeout.
    pub async fn search(
        &self,
        query: &str,
        max_results: Option<usize>,
    ) -> Result<Vec<ScoredChunk>, RetrievalError> {
        self.search_with_timeout(query, max_results, self.config.request_timeout())
            .await
    }

    /// Returns up to `max_results` chunks (configured default when `None`)
    /// scoring at or above the similarity threshold, best first.
    pub async fn search_with_timeout(
        &self,
        query: &str,
        max_results: Option<usize>,
        timeout: Duration,
    ) -> Result<Vec<ScoredChunk>, RetrievalError> {
        if !self.is_enabled() {
            return Ok(Vec::new());
        }

        self.counters.total.fetch_add(1, Ordering::Relaxed);
        let limit = max_results.unwrap_or(self.config.max_results);
        if query.trim().is_empty() || limit == 0 {
            self.counters.record_results(0);
            return Ok(Vec::new());
        }

        let Some(index) = self.current_index().await else {
            debug!("search before any index was loaded");
            self.counters.record_results(0);
            return Ok(Vec::new());
        };

        let threshold = self.similarity_threshold();
        let outcome = tokio::time::timeout(timeout, async {
            let vector = self.embedder.embed(query).await?;
            index.search(&vector, limit, threshold)
        })
        .await;

        match outcome {
            Ok(Ok(results)) => {
                debug!(results = results.len(), limit, threshold, "search complete");
                self.counters.record_results(results.len());
                Ok(results)
            }
            Ok(Err(cause)) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                error!(error = %cause, "search failed");
                Err(RetrievalError::Retrieval(cause))
            }
            Err(_) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX), "search timed out");
                Err(RetrievalError::Timeout(timeout))
            }
        }
    }

    /// Retrieves and assembles context for a downstream generation step.
    /// Failures degrade to an empty context.
    pub async fn context_for(&self, query: &str) -> String {
        match self.search(query, None).await {
            Ok(results) => {
                let context = assemble_context(&results);
                if !context.is_empty() {
                    self.counters.record_context(context.chars().count());
                }
                context
            }
            Err(error) => {
                warn!(%error, "retrieval skipped");
                String::new()
            }
        }
    }

    pub async fn stats(&self) -> RetrieverStats {
        let index = self.current_index().await;
        let total_queries = self.counters.total.load(Ordering::Relaxed);
        let results = self.counters.results.load(Ordering::Relaxed);
        let contexts = self.counters.contexts.load(Ordering::Relaxed);
        let context_chars = self.counters.context_chars.load(Ordering::Relaxed);

        RetrieverStats {
            enabled: self.is_enabled(),
            total_queries,
            successful_queries: self.counters.successful.load(Ordering::Relaxed),
            empty_queries: self.counters.empty.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            average_results: ratio(results, total_queries),
            average_context_length: ratio(context_chars, contexts),
            indexed_chunks: index.as_ref().map_or(0, |index| index.len()),
            documents_loaded: index.as_deref().map_or(0, document_count),
            last_indexed_at: index.as_ref().map(|index| index.built_at()),
        }
    }

    pub async fn health(&self) -> HealthStatus {
        let mut issues = Vec::new();

        if !self.is_enabled() {
            issues.push("retrieval is disabled".to_string());
            return HealthStatus {
                healthy: false,
                issues,
            };
        }

        match self.current_index().await {
            None => issues.push("index is not loaded".to_string()),
            Some(index) if index.is_empty() => issues.push("index is empty".to_string()),
            Some(_) => {}
        }

        if self.last_reload_failed.load(Ordering::SeqCst) {
            issues.push("last reload failed".to_string());
        }

        let stats = self.stats().await;
        if stats.errors > 0 && stats.error_rate() > MAX_HEALTHY_ERROR_RATE {
            issues.push(format!(
                "high error rate: {:.1}%",
                stats.error_rate() * 100.0
            ));
        }

        HealthStatus {
            healthy: issues.is_empty(),
            issues,
        }
    }

    async fn current_index(&self) -> Option<Arc<VectorIndex>> {
        self.index.read().await.clone()
    }

    async fn publish(&self, index: Arc<VectorIndex>) {
        *self.index.write().await = Some(index);
    }

    fn empty_index(&self) -> VectorIndex {
        VectorIndex::empty(self.embedder.model_id(), self.embedder.dimensions())
    }

    async fn persist(&self, index: &Arc<VectorIndex>) -> Result<(), IngestError> {
        let index = Arc::clone(index);
        let directory = self.config.persist_directory.clone();
        let path = tokio::task::spawn_blocking(move || index.persist(&directory))
            .await
            .map_err(join_error)??;
        debug!(path = %path.display(), "index persisted");
        Ok(())
    }

    async fn build_on(
        &self,
        base: &VectorIndex,
        documents: &[Document],
    ) -> Result<(Arc<VectorIndex>, IndexReport), IngestError> {
        let chunks: Vec<_> = documents
            .iter()
            .flat_map(|document| build_chunks(document, self.chunking))
            .collect();
        let total = chunks.len();
        let pending: Vec<_> = chunks
            .into_iter()
            .filter(|chunk| !base.contains(&chunk.chunk_id))
            .collect();
        let already_indexed = total - pending.len();

        let timeout = self.config.request_timeout();
        let mut entries = Vec::with_capacity(pending.len());
        for batch in pending.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<&str> = batch.iter().map(|chunk| chunk.text.as_str()).collect();
            let embeddings = tokio::time::timeout(timeout, self.embedder.embed_batch(&texts))
                .await
                .map_err(|_| IngestError::Timeout(timeout))??;
            if embeddings.len() != batch.len() {
                return Err(EmbeddingError::BackendResponse {
                    backend: self.embedder.model_id(),
                    details: format!(
                        "returned {} embeddings for {} chunks",
                        embeddings.len(),
                        batch.len()
                    ),
                }
                .into());
            }

            entries.extend(
                batch
                    .iter()
                    .cloned()
                    .zip(embeddings)
                    .map(|(chunk, embedding)| IndexEntry { chunk, embedding }),
            );
        }

        let (next, outcome) = base.with_entries(entries)?;
        let report = IndexReport {
            documents: documents.len(),
            chunks_added: outcome.added,
            chunks_skipped: already_indexed + outcome.skipped,
            total_chunks: next.len(),
        };
        Ok((Arc::new(next), report))
    }
}

fn document_count(index: &VectorIndex) -> usize {
    index
        .entries()
        .iter()
        .map(|entry| entry.chunk.document_id.as_str())
        .collect::<std::collections::HashSet<_>>()
        .len()
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

fn join_error(error: tokio::task::JoinError) -> IngestError {
    IngestError::Io(std::io::Error::other(error))
}
