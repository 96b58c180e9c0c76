use crate::error::{EmbeddingError, IngestError};
use crate::models::{Chunk, ScoredChunk};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

pub const INDEX_FILE_NAME: &str = "index.json";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

#[derive(Serialize, Deserialize)]
struct IndexSnapshot {
    format_version: u32,
    model_id: String,
    dimensions: usize,
    built_at: DateTime<Utc>,
    entries: Vec<IndexEntry>,
}

/// Immutable set of embedded chunks. Mutations return a new index so that a
/// published instance can be shared with readers while the next one is built.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    model_id: String,
    dimensions: usize,
    built_at: DateTime<Utc>,
    entries: Vec<IndexEntry>,
    ids: HashSet<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub added: usize,
    pub skipped: usize,
}

impl VectorIndex {
    /// `dimensions` of zero means the first inserted vector decides.
    pub fn empty(model_id: impl Into<String>, dimensions: usize) -> Self {
        Self {
            model_id: model_id.into(),
            dimensions,
            built_at: Utc::now(),
            entries: Vec::new(),
            ids: HashSet::new(),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, chunk_id: &str) -> bool {
        self.ids.contains(chunk_id)
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Returns a copy extended with `entries`, skipping chunk ids that are
    /// already present. Existing entries keep their position.
    pub fn with_entries(
        &self,
        entries: Vec<IndexEntry>,
    ) -> Result<(VectorIndex, MergeOutcome), EmbeddingError> {
        let mut next = self.clone();
        let mut outcome = MergeOutcome::default();

        for entry in entries {
            if next.dimensions == 0 {
                next.dimensions = entry.embedding.len();
            }
            if entry.embedding.len() != next.dimensions {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: next.dimensions,
                    actual: entry.embedding.len(),
                });
            }
            if !next.ids.insert(entry.chunk.chunk_id.clone()) {
                outcome.skipped += 1;
                continue;
            }
            next.entries.push(entry);
            outcome.added += 1;
        }

        next.built_at = Utc::now();
        Ok((next, outcome))
    }

    /// Ranks entries by `1 / (1 + squared euclidean distance)`, keeps those at
    /// or above `threshold` and returns at most `limit` of them. Equal scores
    /// keep insertion order.
    pub fn search(
        &self,
        query: &[f32],
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<ScoredChunk>, EmbeddingError> {
        if limit == 0 || self.entries.is_empty() {
            return Ok(Vec::new());
        }
        if query.len() != self.dimensions {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimensions,
                actual: query.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(position, entry)| (position, similarity(query, &entry.embedding)))
            .filter(|(_, score)| *score >= threshold)
            .collect();

        scored.sort_by(|left, right| right.1.total_cmp(&left.1));
        scored.truncate(limit);

        Ok(scored
            .into_iter()
            .map(|(position, score)| ScoredChunk {
                chunk: self.entries[position].chunk.clone(),
                score,
            })
            .collect())
    }

    /// Writes the snapshot to `<directory>/index.json` through a temporary
    /// file so a crash never leaves a truncated index behind.
    pub fn persist(&self, directory: &Path) -> Result<PathBuf, IngestError> {
        fs::create_dir_all(directory)?;
        let path = directory.join(INDEX_FILE_NAME);
        let temporary = directory.join(format!("{INDEX_FILE_NAME}.tmp"));

        let snapshot = IndexSnapshot {
            format_version: FORMAT_VERSION,
            model_id: self.model_id.clone(),
            dimensions: self.dimensions,
            built_at: self.built_at,
            entries: self.entries.clone(),
        };

        fs::write(&temporary, serde_json::to_vec(&snapshot)?)?;
        fs::rename(&temporary, &path)?;
        Ok(path)
    }

    /// Deletes the persisted snapshot and any leftover temporary file.
    /// Returns whether a snapshot existed.
    pub fn remove(directory: &Path) -> Result<bool, IngestError> {
        let temporary = directory.join(format!("{INDEX_FILE_NAME}.tmp"));
        if temporary.exists() {
            fs::remove_file(&temporary)?;
        }

        let path = directory.join(INDEX_FILE_NAME);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)?;
        Ok(true)
    }

    /// Reads a persisted index. `Ok(None)` when nothing has been persisted yet.
    pub fn load(directory: &Path) -> Result<Option<VectorIndex>, IngestError> {
        let path = directory.join(INDEX_FILE_NAME);
        if !path.exists() {
            return Ok(None);
        }

        let corruption = |details: String| IngestError::IndexCorruption {
            path: path.clone(),
            details,
        };

        let bytes = fs::read(&path).map_err(|error| corruption(error.to_string()))?;
        let snapshot: IndexSnapshot =
            serde_json::from_slice(&bytes).map_err(|error| corruption(error.to_string()))?;

        if snapshot.format_version != FORMAT_VERSION {
            return Err(corruption(format!(
                "unsupported format version {}",
                snapshot.format_version
            )));
        }

        let mut ids = HashSet::with_capacity(snapshot.entries.len());
        for entry in &snapshot.entries {
            if entry.embedding.len() != snapshot.dimensions {
                return Err(corruption(format!(
                    "chunk {} has {} dimensions, expected {}",
                    entry.chunk.chunk_id,
                    entry.embedding.len(),
                    snapshot.dimensions
                )));
            }
            if !ids.insert(entry.chunk.chunk_id.clone()) {
                return Err(corruption(format!(
                    "duplicate chunk id {}",
                    entry.chunk.chunk_id
                )));
            }
        }

        Ok(Some(VectorIndex {
            model_id: snapshot.model_id,
            dimensions: snapshot.dimensions,
            built_at: snapshot.built_at,
            entries: snapshot.entries,
            ids,
        }))
    }
}

fn similarity(left: &[f32], right: &[f32]) -> f32 {
    let distance: f32 = left
        .iter()
        .zip(right.iter())
        .map(|(a, b)| (a - b) * (a - b))
        .sum();
    1.0 / (1.0 + distance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn entry(id: &str, embedding: Vec<f32>) -> IndexEntry {
        IndexEntry {
            chunk: Chunk {
                chunk_id: id.to_string(),
                document_id: "doc-1".to_string(),
                source_path: "/tmp/doc.txt".to_string(),
                chunk_index: 0,
                offset: 0,
                text: format!("text of {id}"),
            },
            embedding,
        }
    }

    fn sample_index() -> VectorIndex {
        let (index, _) = VectorIndex::empty("test", 2)
            .with_entries(vec![
                entry("far", vec![0.0, 1.0]),
                entry("near", vec![1.0, 0.0]),
                entry("middle", vec![0.7, 0.7]),
                entry("near-twin", vec![1.0, 0.0]),
            ])
            .expect("entries should merge");
        index
    }

    #[test]
    fn search_orders_by_descending_similarity_with_stable_ties() {
        let results = sample_index()
            .search(&[1.0, 0.0], 10, 0.0)
            .expect("search should succeed");

        let ids: Vec<_> = results.iter().map(|r| r.chunk.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["near", "near-twin", "middle", "far"]);
        assert!(results.windows(2).all(|pair| pair[0].score >= pair[1].score));
        assert!((results[0].score - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn search_applies_threshold_and_limit() {
        let index = sample_index();

        let limited = index.search(&[1.0, 0.0], 1, 0.0).expect("search should succeed");
        assert_eq!(limited.len(), 1);

        let filtered = index.search(&[1.0, 0.0], 10, 0.6).expect("search should succeed");
        assert!(filtered.iter().all(|r| r.score >= 0.6));
        assert_eq!(filtered.len(), 3);

        assert!(index.search(&[1.0, 0.0], 0, 0.0).expect("search").is_empty());
    }

    #[test]
    fn merging_skips_known_chunk_ids() {
        let index = sample_index();
        let (merged, outcome) = index
            .with_entries(vec![entry("near", vec![1.0, 0.0]), entry("new", vec![0.5, 0.5])])
            .expect("entries should merge");

        assert_eq!(outcome, MergeOutcome { added: 1, skipped: 1 });
        assert_eq!(merged.len(), 5);
        assert_eq!(index.len(), 4);
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let index = sample_index();
        assert!(index.with_entries(vec![entry("bad", vec![1.0])]).is_err());
        assert!(index.search(&[1.0, 0.0, 0.0], 3, 0.0).is_err());
    }

    #[test]
    fn unknown_dimensions_are_taken_from_first_entry() {
        let (index, _) = VectorIndex::empty("remote", 0)
            .with_entries(vec![entry("a", vec![0.1, 0.2, 0.3])])
            .expect("entries should merge");
        assert_eq!(index.dimensions(), 3);
    }

    #[test]
    fn persisted_index_loads_back() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let index = sample_index();
        index.persist(dir.path())?;

        let loaded = VectorIndex::load(dir.path())?.expect("index should exist");
        assert_eq!(loaded.len(), index.len());
        assert_eq!(loaded.model_id(), "test");
        assert!(loaded.contains("middle"));
        assert!(!dir.path().join("index.json.tmp").exists());
        Ok(())
    }

    #[test]
    fn missing_index_is_none() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        assert!(VectorIndex::load(dir.path())?.is_none());
        Ok(())
    }

    #[test]
    fn garbage_index_is_reported_as_corruption() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join(INDEX_FILE_NAME), b"{not json")?;

        let result = VectorIndex::load(dir.path());
        assert!(matches!(result, Err(IngestError::IndexCorruption { .. })));
        Ok(())
    }

    fn rewrite_snapshot(
        directory: &Path,
        edit: impl FnOnce(&mut serde_json::Value),
    ) -> Result<(), Box<dyn std::error::Error>> {
        let path = directory.join(INDEX_FILE_NAME);
        let mut snapshot: serde_json::Value = serde_json::from_slice(&fs::read(&path)?)?;
        edit(&mut snapshot);
        fs::write(&path, serde_json::to_vec(&snapshot)?)?;
        Ok(())
    }

    #[test]
    fn unknown_format_version_is_reported_as_corruption() -> Result<(), Box<dyn std::error::Error>>
    {
        let dir = tempdir()?;
        sample_index().persist(dir.path())?;
        rewrite_snapshot(dir.path(), |snapshot| {
            snapshot["format_version"] = serde_json::json!(99);
        })?;

        let result = VectorIndex::load(dir.path());
        assert!(matches!(
            result,
            Err(IngestError::IndexCorruption { ref details, .. }) if details.contains("version 99")
        ));
        Ok(())
    }

    #[test]
    fn entry_dimension_mismatch_is_reported_as_corruption(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        sample_index().persist(dir.path())?;
        rewrite_snapshot(dir.path(), |snapshot| {
            snapshot["dimensions"] = serde_json::json!(3);
        })?;

        let result = VectorIndex::load(dir.path());
        assert!(matches!(
            result,
            Err(IngestError::IndexCorruption { ref details, .. }) if details.contains("expected 3")
        ));
        Ok(())
    }

    #[test]
    fn removing_deletes_the_snapshot() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        assert!(!VectorIndex::remove(dir.path())?);

        sample_index().persist(dir.path())?;
        fs::write(dir.path().join("index.json.tmp"), b"partial")?;

        assert!(VectorIndex::remove(dir.path())?);
        assert!(!dir.path().join(INDEX_FILE_NAME).exists());
        assert!(!dir.path().join("index.json.tmp").exists());
        assert!(VectorIndex::load(dir.path())?.is_none());
        Ok(())
    }
}
