// Embeddings module
// Embedding index with similarity search, and the client that produces embeddings

pub mod index;
pub mod openai;

pub use index::{EmbeddingIndex, ScoredChunk, top_n_similarity};
pub use openai::{Embedder, EmbeddingClient};
