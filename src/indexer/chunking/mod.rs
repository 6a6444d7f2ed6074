
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::IndexingConfig;

/// Spaces in a page break, which is followed by a newline
pub const PAGE_BREAK_WIDTH: usize = 100;

/// How a file is cut into chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    /// The whole file is one chunk
    Whole,
    /// The file is split on page breaks and every piece trimmed
    Pages,
}

impl ChunkKind {
    /// Kind for `path`, or `None` when the file is not indexed
    #[inline]
    pub fn for_path(path: &Path, config: &IndexingConfig) -> Option<Self> {
        let extension = path.extension()?.to_str()?;
        if config.source_extensions.iter().any(|e| e == extension) {
            Some(Self::Whole)
        } else if config.markdown_extensions.iter().any(|e| e == extension) {
            Some(Self::Pages)
        } else {
            None
        }
    }
}

#[inline]
pub fn page_break() -> String {
    format!("{}\n", " ".repeat(PAGE_BREAK_WIDTH))
}

/// Cut one file's text into chunks, dropping empty ones
#[inline]
pub fn chunk_text(text: &str, kind: ChunkKind) -> Vec<String> {
    match kind {
        ChunkKind::Whole => {
            if text.trim().is_empty() {
                Vec::new()
            } else {
                vec![text.to_string()]
            }
        }
        ChunkKind::Pages => text
            .split(page_break().as_str())
            .map(str::trim)
            .filter(|piece| !piece.is_empty())
            .map(str::to_string)
            .collect(),
    }
}

/// Chunks collected from a directory tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectedChunks {
    pub files: Vec<PathBuf>,
    /// Unique chunk texts in the order they were first seen
    pub chunks: Vec<String>,
}

/// Walk `dir` recursively and chunk every indexed file.
///
/// Files are visited in file name order. A chunk text seen twice is kept once.
pub fn collect_chunks(dir: &Path, config: &IndexingConfig) -> Result<CollectedChunks> {
    if !dir.is_dir() {
        anyhow::bail!("Not a directory: {}", dir.display());
    }

    let mut collected = CollectedChunks::default();
    let mut seen = HashSet::new();

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(kind) = ChunkKind::for_path(entry.path(), config) else {
            continue;
        };

        let text = fs::read_to_string(entry.path())
            .with_context(|| format!("Failed to read {}", entry.path().display()))?;
        let chunks = chunk_text(&text, kind);
        debug!("{} chunks from {}", chunks.len(), entry.path().display());

        for chunk in chunks {
            if seen.insert(chunk.clone()) {
                collected.chunks.push(chunk);
            }
        }
        collected.files.push(entry.into_path());
    }

    Ok(collected)
}
