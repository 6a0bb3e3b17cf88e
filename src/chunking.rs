//! Chunking utilities for splitting extracted text into overlapping windows.
//!
//! The policy is purely character based: a window of `chunk_size` characters
//! slides over the text, advancing by `chunk_size - overlap` each step. There
//! is no sentence or token awareness.

/// Default chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 800;

/// Default overlap between adjacent chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 120;

/// Chunking configuration.
///
/// # Examples
///
/// ```
/// use preppal::chunking::{ChunkingConfig, DEFAULT_CHUNK_SIZE};
///
/// let config = ChunkingConfig::default();
/// assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
/// assert_eq!(config.step(), 680);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Window size in characters.
    pub chunk_size: usize,
    /// Overlap between adjacent windows in characters.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size,
            overlap,
        }
    }

    /// Distance between window starts. Never zero, so chunking always
    /// terminates, even when `overlap >= chunk_size`.
    pub fn step(&self) -> usize {
        self.chunk_size.saturating_sub(self.overlap).max(1)
    }
}

/// A chunk of text from a larger document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// The trimmed chunk text.
    pub text: String,
    /// Zero-based index among the surviving chunks of the document.
    pub index: usize,
    /// Character offset of the window start in the normalized text.
    pub start_char: usize,
}

/// Split text into overlapping character windows.
///
/// Line endings are normalized to `\n` first. Each window is trimmed and
/// windows that are empty after trimming are dropped; the survivors are
/// numbered contiguously from zero.
///
/// # Examples
///
/// ```
/// use preppal::chunking::{ChunkingConfig, chunk_text};
///
/// let chunks = chunk_text("apple banana cherry", ChunkingConfig::new(5, 0));
/// let texts: Vec<_> = chunks.iter().map(|c| c.text.as_str()).collect();
/// assert_eq!(texts, ["apple", "bana", "na ch", "erry"]);
/// ```
pub fn chunk_text(text: &str, config: ChunkingConfig) -> Vec<Chunk> {
    let normalized = text.replace("\r\n", "\n");
    let chars: Vec<char> = normalized.chars().collect();
    let step = config.step();

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = start.saturating_add(config.chunk_size).min(chars.len());
        let window: String = chars[start..end].iter().collect();
        let trimmed = window.trim();

        if !trimmed.is_empty() {
            chunks.push(Chunk {
                text: trimmed.to_string(),
                index: chunks.len(),
                start_char: start,
            });
        }

        start = start.saturating_add(step);
    }

    chunks
}
