// Indexer module
// Offline pass turning a documentation tree into the embedding index the bot loads

pub mod chunking;


use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::config::IndexingConfig;
use crate::embeddings::{EmbeddingClient, EmbeddingIndex};

pub use chunking::{ChunkKind, CollectedChunks, chunk_text, collect_chunks, page_break};

/// Summary of one indexing run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexingStats {
    pub files_read: usize,
    pub chunks_indexed: usize,
    pub dimension: usize,
    pub output: PathBuf,
    pub duration: Duration,
}

pub struct Indexer {
    client: EmbeddingClient,
    config: IndexingConfig,
}

impl Indexer {
    #[inline]
    pub fn new(client: EmbeddingClient, config: IndexingConfig) -> Self {
        Self { client, config }
    }

    /// Chunk every document under `dir`, embed the chunks and write the index to `output`
    pub async fn index_directory(&self, dir: &Path, output: &Path) -> Result<IndexingStats> {
        let started = Instant::now();
        info!("Indexing documents under {}", dir.display());

        let collected = {
            let dir = dir.to_path_buf();
            let config = self.config.clone();
            tokio::task::spawn_blocking(move || collect_chunks(&dir, &config))
                .await
                .context("Chunking task panicked")??
        };
        if collected.chunks.is_empty() {
            warn!("No indexable documents found under {}", dir.display());
        }
        info!(
            "Collected {} chunks from {} files",
            collected.chunks.len(),
            collected.files.len()
        );

        let embeddings = self.embed_all(&collected.chunks).await?;
        if embeddings.len() != collected.chunks.len() {
            anyhow::bail!(
                "Embedding endpoint returned {} embeddings for {} chunks",
                embeddings.len(),
                collected.chunks.len()
            );
        }

        let index = EmbeddingIndex::from_entries(collected.chunks.into_iter().zip(embeddings))
            .context("Failed to build embedding index")?;
        index.save(output)?;

        let stats = IndexingStats {
            files_read: collected.files.len(),
            chunks_indexed: index.len(),
            dimension: index.dimension().unwrap_or(0),
            output: output.to_path_buf(),
            duration: started.elapsed(),
        };
        info!(
            "Indexed {} chunks into {} in {:.1}s",
            stats.chunks_indexed,
            output.display(),
            stats.duration.as_secs_f64()
        );
        Ok(stats)
    }

    async fn embed_all(&self, chunks: &[String]) -> Result<Vec<Vec<f32>>> {
        let bar = progress_bar(chunks.len());
        let mut embeddings = Vec::with_capacity(chunks.len());

        for batch in chunks.chunks(self.client.batch_size()) {
            let client = self.client.clone();
            let texts = batch.to_vec();
            let vectors = tokio::task::spawn_blocking(move || client.generate_embeddings_batch(&texts))
                .await
                .context("Embedding task panicked")??;
            embeddings.extend(vectors);
            bar.inc(batch.len() as u64);
        }

        bar.finish_and_clear();
        Ok(embeddings)
    }
}

fn progress_bar(len: usize) -> ProgressBar {
    if !console::user_attended_stderr() {
        return ProgressBar::hidden();
    }
    let style = ProgressStyle::with_template("{bar:40} [{pos}/{len}] {percent}% embedding chunks")
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    ProgressBar::new(len as u64).with_style(style)
}
