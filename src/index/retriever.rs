//! Threshold retriever over a vector index

use super::{EmbeddingProvider, IndexError, SearchHit, VectorIndex};

/// Top-k search that drops hits scoring below `min_score`
#[derive(Debug, Clone, PartialEq)]
pub struct Retriever {
    pub k: usize,
    pub min_score: f64,
}

impl Default for Retriever {
    fn default() -> Self {
        Self { k: 3, min_score: 0.0 }
    }
}

impl Retriever {
    pub fn new(k: usize, min_score: f64) -> Self {
        Self { k, min_score }
    }

    /// Search and apply the threshold; zero hits is a valid result
    pub async fn retrieve(
        &self,
        index: &VectorIndex,
        query: &str,
        provider: &dyn EmbeddingProvider,
    ) -> Result<Vec<SearchHit>, IndexError> {
        let hits = index.similarity_search(query, self.k, provider).await?;
        let total = hits.len();

        let kept: Vec<SearchHit> = hits
            .into_iter()
            .filter(|hit| hit.score >= self.min_score)
            .collect();

        if kept.len() < total {
            tracing::debug!(
                "Dropped {} hits below score {:.2}",
                total - kept.len(),
                self.min_score
            );
        }

        Ok(kept)
    }
}
