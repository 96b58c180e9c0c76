use crate::error::ConfigError;
use crate::models::{Chunk, Document};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl ChunkingConfig {
    pub fn new(max_chars: usize, overlap_chars: usize) -> Result<Self, ConfigError> {
        if max_chars == 0 {
            return Err(ConfigError::InvalidChunkConfig(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if overlap_chars >= max_chars {
            return Err(ConfigError::InvalidChunkConfig(format!(
                "chunk_overlap ({overlap_chars}) must be less than chunk_size ({max_chars})"
            )));
        }
        Ok(Self {
            max_chars,
            overlap_chars,
        })
    }

    fn step(&self) -> usize {
        self.max_chars - self.overlap_chars
    }
}

/// A window produced by [`split_text`], with its char offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextWindow {
    pub offset: usize,
    pub text: String,
}

/// Splits `text` into windows of at most `max_chars` characters. Each window
/// starts `max_chars - overlap_chars` characters after the previous one, so
/// neighbours share exactly `overlap_chars` characters. Only the last window
/// may be shorter.
pub fn split_text(text: &str, config: ChunkingConfig) -> Vec<TextWindow> {
    let chars: Vec<char> = text.chars().collect();
    let mut windows = Vec::new();
    if chars.is_empty() {
        return windows;
    }

    let mut start = 0;
    loop {
        let end = (start + config.max_chars).min(chars.len());
        windows.push(TextWindow {
            offset: start,
            text: chars[start..end].iter().collect(),
        });
        if end == chars.len() {
            break;
        }
        start += config.step();
    }

    windows
}

pub fn build_chunks(document: &Document, config: ChunkingConfig) -> Vec<Chunk> {
    split_text(&document.text, config)
        .into_iter()
        .filter(|window| !window.text.trim().is_empty())
        .enumerate()
        .map(|(index, window)| Chunk {
            chunk_id: make_chunk_id(&document.document_id, window.offset, &window.text),
            document_id: document.document_id.clone(),
            source_path: document.source_path.clone(),
            chunk_index: index as u64,
            offset: window.offset,
            text: window.text,
        })
        .collect()
}

fn make_chunk_id(document_id: &str, offset: usize, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update((offset as u64).to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
