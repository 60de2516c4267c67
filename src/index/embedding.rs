//! Embedding providers
//!
//! Vectors come from Ollama, an OpenAI-compatible service, or a
//! deterministic lexical embedder for offline use and tests.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Turns text into vectors
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// One vector per input, in input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .pop()
            .context("Embedding service returned no vector")
    }

    /// Length of every vector this provider returns
    fn dimension(&self) -> usize;

    /// Provider and model, such as `ollama:nomic-embed-text`
    ///
    /// Part of the index content hash, so switching models forces a rebuild.
    fn name(&self) -> String;
}

/// Endpoint, model and credentials shared by the HTTP providers
struct HttpTarget {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl HttpTarget {
    fn new(endpoint: &str, model: &str, api_key: Option<&str>) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.map(str::to_string),
            http: reqwest::Client::new(),
        }
    }

    async fn post_json<B: Serialize, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<R> {
        let url = format!("{}/{}", self.endpoint, path);
        let mut request = self.http.post(&url).json(body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to reach embedding service at {}", url))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            anyhow::bail!("Embedding request to {} failed with {}: {}", url, status, detail);
        }

        response
            .json::<R>()
            .await
            .context("Unexpected embedding response body")
    }
}

/// Ollama `/api/embeddings`, one request per text
pub struct OllamaEmbedding {
    target: HttpTarget,
    dimension: usize,
}

impl OllamaEmbedding {
    /// 768 dimensions unless told otherwise, matching nomic-embed-text
    pub fn new(endpoint: &str, model: &str) -> Self {
        Self {
            target: HttpTarget::new(endpoint, model, None),
            dimension: 768,
        }
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }
}

#[derive(Serialize)]
struct OllamaEmbedBody<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct OllamaEmbedReply {
    embedding: Vec<f32>,
}

#[async_trait::async_trait]
impl EmbeddingProvider for OllamaEmbedding {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());

        for text in texts {
            let body = OllamaEmbedBody {
                model: &self.target.model,
                prompt: text,
            };
            let reply: OllamaEmbedReply = self.target.post_json("api/embeddings", &body).await?;
            vectors.push(reply.embedding);
        }

        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> String {
        format!("ollama:{}", self.target.model)
    }
}

/// OpenAI-compatible `/v1/embeddings`, one request per batch
pub struct OpenAIEmbedding {
    target: HttpTarget,
    dimension: usize,
}

impl OpenAIEmbedding {
    /// 1536 dimensions unless told otherwise, matching text-embedding-3-small
    pub fn new(endpoint: &str, model: &str, api_key: Option<&str>) -> Self {
        Self {
            target: HttpTarget::new(endpoint, model, api_key),
            dimension: 1536,
        }
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }
}

#[derive(Serialize)]
struct OpenAIEmbedBody<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct OpenAIEmbedReply {
    data: Vec<OpenAIEmbedItem>,
}

#[derive(Deserialize)]
struct OpenAIEmbedItem {
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait::async_trait]
impl EmbeddingProvider for OpenAIEmbedding {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = OpenAIEmbedBody {
            model: &self.target.model,
            input: texts,
        };
        let reply: OpenAIEmbedReply = self.target.post_json("v1/embeddings", &body).await?;

        if reply.data.len() != texts.len() {
            anyhow::bail!(
                "Embedding service returned {} vectors for {} inputs",
                reply.data.len(),
                texts.len()
            );
        }

        // items may arrive out of order
        let mut items = reply.data;
        items.sort_by_key(|item| item.index);
        Ok(items.into_iter().map(|item| item.embedding).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> String {
        format!("openai:{}", self.target.model)
    }
}

/// Deterministic bag-of-words embedder
///
/// Every lower-cased word is hashed into one of `dimension` buckets and the
/// counts are L2-normalized, so texts sharing words score higher. Needs no
/// network and gives the same vector for the same text on every run.
pub struct MockEmbedding {
    dimension: usize,
}

impl MockEmbedding {
    /// Create a new mock embedding provider
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        let lowered = text.to_lowercase();
        for word in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let bucket = (fnv1a(word.as_bytes()) % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }

        vector
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for MockEmbedding {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> String {
        format!("mock:{}", self.dimension)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    bytes.iter().fold(OFFSET, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(PRIME)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::cosine_similarity;

    #[tokio::test]
    async fn test_mock_embedding() {
        let provider = MockEmbedding::new(384);
        let embedding = provider.embed("Hello, world!").await.unwrap();
        assert_eq!(embedding.len(), 384);

        let embedding2 = provider.embed("Hello, world!").await.unwrap();
        assert_eq!(embedding, embedding2);

        let embedding3 = provider.embed("Goodbye, moon!").await.unwrap();
        assert_ne!(embedding, embedding3);
    }

    #[tokio::test]
    async fn test_mock_embedding_is_lexical() {
        let provider = MockEmbedding::new(512);
        let query = provider.embed("What does first strike do?").await.unwrap();
        let related = provider
            .embed("Rule 702.7a: First strike is a static ability.")
            .await
            .unwrap();
        let unrelated = provider
            .embed("Card: Grizzly Bears\nOracle Text: ")
            .await
            .unwrap();

        assert!(cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated));
    }

    #[tokio::test]
    async fn test_empty_text_is_zero_vector() {
        let provider = MockEmbedding::new(16);
        let embedding = provider.embed("").await.unwrap();
        assert!(embedding.iter().all(|x| *x == 0.0));
    }
}
