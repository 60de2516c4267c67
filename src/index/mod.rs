//! Semantic vector index
//!
//! This module embeds normalized documents and answers nearest-neighbor
//! queries over them:
//! - Batched embedding through an `EmbeddingProvider`
//! - Cosine-similarity search with a threshold retriever
//! - Directory-backed persistence keyed by a content hash

mod embedding;
mod persist;
mod retriever;

pub use embedding::{EmbeddingProvider, OllamaEmbedding, MockEmbedding, OpenAIEmbedding};
pub use retriever::Retriever;

use crate::extract::{content_hash, Metadata, NormalizedDocument};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Default number of documents sent to the embedding service per request
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Failures surfaced by the vector index
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Invalid vector dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("No index found at {0}")]
    NotFound(String),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl IndexError {
    fn embedding(err: anyhow::Error) -> Self {
        IndexError::Embedding(format!("{:#}", err))
    }

    fn persistence(err: anyhow::Error) -> Self {
        IndexError::Persistence(format!("{:#}", err))
    }
}

/// A stored document and its vector
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub id: String,
    pub content: String,
    pub metadata: Metadata,
    pub embedding: Vec<f32>,
}

/// A search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub content: String,
    pub metadata: Metadata,
    /// Cosine similarity to the query
    pub score: f64,
}

/// How `open_or_build` produced its index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOrigin {
    /// Reloaded from disk; the stored hash matched
    Loaded,
    /// Embedded from scratch and persisted
    Built,
}

/// In-memory vector index
#[derive(Debug, Clone)]
pub struct VectorIndex {
    collection: String,
    entries: Vec<IndexEntry>,
    content_hash: Option<String>,
    built_at: Option<DateTime<Utc>>,
}

impl VectorIndex {
    /// Create an empty index
    pub fn new(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            entries: Vec::new(),
            content_hash: None,
            built_at: None,
        }
    }

    /// Embed every document and build a fresh index
    ///
    /// Any failed batch aborts the whole build.
    pub async fn build(
        collection: &str,
        documents: &[NormalizedDocument],
        provider: &dyn EmbeddingProvider,
        batch_size: usize,
    ) -> Result<Self, IndexError> {
        let mut index = Self::new(collection);
        index.add_documents(documents, provider, batch_size).await?;
        index.content_hash = Some(corpus_hash(documents, &provider.name()));
        index.built_at = Some(Utc::now());

        tracing::info!(
            "Built index '{}' with {} entries",
            index.collection,
            index.entries.len()
        );

        Ok(index)
    }

    /// Embed and append documents in batches
    ///
    /// Documents with empty content are skipped. Returns how many entries
    /// were added.
    pub async fn add_documents(
        &mut self,
        documents: &[NormalizedDocument],
        provider: &dyn EmbeddingProvider,
        batch_size: usize,
    ) -> Result<usize, IndexError> {
        let embeddable: Vec<&NormalizedDocument> = documents
            .iter()
            .filter(|doc| {
                let keep = !doc.content.trim().is_empty();
                if !keep {
                    tracing::warn!("Skipping document {} with empty content", doc.id);
                }
                keep
            })
            .collect();

        let batch_size = batch_size.max(1);
        let total_batches = embeddable.len().div_ceil(batch_size);
        let mut added = 0;

        for (i, batch) in embeddable.chunks(batch_size).enumerate() {
            let texts: Vec<String> = batch.iter().map(|doc| doc.content.clone()).collect();
            let embeddings = provider
                .embed_batch(&texts)
                .await
                .map_err(IndexError::embedding)?;

            if embeddings.len() != batch.len() {
                return Err(IndexError::Embedding(format!(
                    "expected {} vectors, got {}",
                    batch.len(),
                    embeddings.len()
                )));
            }

            for (doc, embedding) in batch.iter().zip(embeddings) {
                if let Some(expected) = self.dimension() {
                    if embedding.len() != expected {
                        return Err(IndexError::InvalidDimension {
                            expected,
                            actual: embedding.len(),
                        });
                    }
                }

                self.entries.push(IndexEntry {
                    id: doc.id.clone(),
                    content: doc.content.clone(),
                    metadata: doc.metadata.clone(),
                    embedding,
                });
                added += 1;
            }

            tracing::debug!("Embedded batch {}/{}", i + 1, total_batches);
        }

        Ok(added)
    }

    /// Return the `k` entries most similar to `query`
    ///
    /// Equal scores keep insertion order.
    pub async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        provider: &dyn EmbeddingProvider,
    ) -> Result<Vec<SearchHit>, IndexError> {
        if self.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let vector = provider.embed(query).await.map_err(IndexError::embedding)?;
        self.search_by_vector(&vector, k)
    }

    /// Nearest neighbors of an already embedded query
    pub fn search_by_vector(&self, vector: &[f32], k: usize) -> Result<Vec<SearchHit>, IndexError> {
        if let Some(expected) = self.dimension() {
            if vector.len() != expected {
                return Err(IndexError::InvalidDimension {
                    expected,
                    actual: vector.len(),
                });
            }
        }

        let mut scored: Vec<(usize, f64)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (i, cosine_similarity(vector, &entry.embedding)))
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| {
                let entry = &self.entries[i];
                SearchHit {
                    id: entry.id.clone(),
                    content: entry.content.clone(),
                    metadata: entry.metadata.clone(),
                    score,
                }
            })
            .collect())
    }

    /// Write the index to `<dir>/index.db`
    pub fn persist(&self, dir: &Path) -> Result<(), IndexError> {
        persist::save(self, dir).map_err(IndexError::persistence)
    }

    /// Read an index written by `persist`; nothing is re-embedded
    pub fn load(dir: &Path) -> Result<Self, IndexError> {
        if !persist::index_path(dir).exists() {
            return Err(IndexError::NotFound(dir.display().to_string()));
        }
        persist::load(dir).map_err(IndexError::persistence)
    }

    /// Reload the index stored in `dir` if it was built from the same
    /// documents, otherwise build it and persist the result
    pub async fn open_or_build(
        dir: &Path,
        collection: &str,
        documents: &[NormalizedDocument],
        provider: &dyn EmbeddingProvider,
        batch_size: usize,
    ) -> Result<(Self, IndexOrigin), IndexError> {
        let hash = corpus_hash(documents, &provider.name());

        match persist::stored_hash(dir, collection) {
            Ok(Some(stored)) if stored == hash => {
                let index = Self::load(dir)?;
                tracing::info!("Loaded index from {:?} ({} entries)", dir, index.len());
                return Ok((index, IndexOrigin::Loaded));
            }
            Ok(Some(_)) => tracing::info!("Index at {:?} is stale, rebuilding", dir),
            Ok(None) => tracing::info!("No index at {:?}, building", dir),
            Err(e) => tracing::warn!("Unreadable index at {:?}, rebuilding: {:#}", dir, e),
        }

        let index = Self::build(collection, documents, provider, batch_size).await?;
        index.persist(dir)?;
        Ok((index, IndexOrigin::Built))
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Vector dimension, known once the first entry is added
    pub fn dimension(&self) -> Option<usize> {
        self.entries.first().map(|e| e.embedding.len())
    }

    /// Hash of the documents this index was built from
    pub fn content_hash(&self) -> Option<&str> {
        self.content_hash.as_deref()
    }

    pub fn built_at(&self) -> Option<DateTime<Utc>> {
        self.built_at
    }
}

/// SHA-256 over every document's id, content and metadata plus the embedder name
pub fn corpus_hash(documents: &[NormalizedDocument], embedder: &str) -> String {
    let mut combined = String::new();
    combined.push_str(embedder);
    combined.push('\u{1e}');

    for doc in documents {
        combined.push_str(&doc.id);
        combined.push('\u{1f}');
        combined.push_str(&doc.content);
        combined.push('\u{1f}');
        combined.push_str(&serde_json::to_string(&doc.metadata).unwrap_or_default());
        combined.push('\u{1e}');
    }

    content_hash(&combined)
}

/// Compute cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f64 = a.iter().zip(b.iter()).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}
