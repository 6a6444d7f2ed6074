//! Flat embedding index and top-n similarity search
//!
//! The index is a read-only mapping from chunk text to a unit-length vector. It is
//! written once by the offline indexer and loaded at service start. Because vectors are
//! normalized, cosine similarity is the plain dot product.


use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::Serialize;
use tracing::{debug, info};

use crate::{ChatBotError, Result};

/// A chunk paired with its similarity to the query
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub score: f32,
    pub chunk: String,
}

/// Immutable mapping from chunk text to embedding vector.
///
/// Entries are kept in ascending lexical order of chunk text, which is also the
/// tie-break order used by [`top_n_similarity`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct EmbeddingIndex {
    entries: BTreeMap<String, Vec<f32>>,
}

impl EmbeddingIndex {
    /// Build an index, normalizing every vector to unit length.
    ///
    /// All vectors must share one dimension and contain only finite values.
    #[inline]
    pub fn from_entries<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, Vec<f32>)>,
    {
        let mut map = BTreeMap::new();
        let mut dimension = None;

        for (chunk, mut vector) in entries {
            if vector.is_empty() {
                return Err(ChatBotError::InvalidArgument(format!(
                    "empty embedding for chunk starting with {:?}",
                    preview(&chunk)
                )));
            }
            if vector.iter().any(|v| !v.is_finite()) {
                return Err(ChatBotError::InvalidArgument(format!(
                    "non-finite embedding value for chunk starting with {:?}",
                    preview(&chunk)
                )));
            }
            match dimension {
                None => dimension = Some(vector.len()),
                Some(expected) if expected != vector.len() => {
                    return Err(ChatBotError::InvalidArgument(format!(
                        "embedding dimension mismatch: expected {}, found {}",
                        expected,
                        vector.len()
                    )));
                }
                Some(_) => {}
            }
            normalize(&mut vector);
            map.insert(chunk, vector);
        }

        Ok(Self { entries: map })
    }

    /// Load an index previously written by [`EmbeddingIndex::save`]
    #[inline]
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read indexed docs: {}", path.display()))?;
        let raw: BTreeMap<String, Vec<f32>> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse indexed docs: {}", path.display()))?;
        let index = Self::from_entries(raw)
            .with_context(|| format!("Invalid indexed docs: {}", path.display()))?;

        info!(
            "Loaded {} chunks ({} dimensions) from {}",
            index.len(),
            index.dimension().unwrap_or(0),
            path.display()
        );
        Ok(index)
    }

    #[inline]
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let content = serde_json::to_string(self).context("Failed to serialize index")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write indexed docs: {}", path.display()))?;
        debug!("Wrote {} chunks to {}", self.len(), path.display());
        Ok(())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Vector dimension, `None` for an empty index
    #[inline]
    pub fn dimension(&self) -> Option<usize> {
        self.entries.values().next().map(Vec::len)
    }

    #[inline]
    pub fn get(&self, chunk: &str) -> Option<&[f32]> {
        self.entries.get(chunk).map(Vec::as_slice)
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f32])> {
        self.entries
            .iter()
            .map(|(chunk, vector)| (chunk.as_str(), vector.as_slice()))
    }
}

/// Scale a vector to unit length in place. Zero vectors are left untouched.
#[inline]
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

#[inline]
pub fn dot(left: &[f32], right: &[f32]) -> f32 {
    left.iter().zip(right).map(|(l, r)| l * r).sum()
}

/// Return the `n` chunks most similar to `query`, best first.
///
/// The result always has exactly `n` entries. Asking for more entries than the index
/// holds is an error rather than a padded result. Equal scores keep ascending lexical
/// order of chunk text.
#[inline]
pub fn top_n_similarity(
    query: &[f32],
    index: &EmbeddingIndex,
    n: usize,
) -> Result<Vec<ScoredChunk>> {
    if n > index.len() {
        return Err(ChatBotError::InvalidArgument(format!(
            "n ({}) is larger than the index ({} chunks)",
            n,
            index.len()
        )));
    }
    if let Some(dimension) = index.dimension() {
        if query.len() != dimension {
            return Err(ChatBotError::InvalidArgument(format!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                dimension
            )));
        }
    }
    if query.iter().any(|v| !v.is_finite()) {
        return Err(ChatBotError::InvalidArgument(
            "query embedding contains non-finite values".to_string(),
        ));
    }

    // Kept sorted best first; a new entry must beat the current worst strictly.
    let mut best: Vec<ScoredChunk> = Vec::with_capacity(n + 1);
    if n == 0 {
        return Ok(best);
    }

    for (chunk, vector) in index.iter() {
        let score = dot(query, vector);
        if best.len() == n && best.last().is_some_and(|worst| score <= worst.score) {
            continue;
        }
        let position = best
            .iter()
            .position(|entry| entry.score < score)
            .unwrap_or(best.len());
        best.insert(
            position,
            ScoredChunk {
                score,
                chunk: chunk.to_string(),
            },
        );
        best.truncate(n);
    }

    Ok(best)
}

fn preview(chunk: &str) -> String {
    chunk.chars().take(20).collect()
}
