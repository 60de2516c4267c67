//! Application configuration for mtgsage

use crate::index::{EmbeddingProvider, OllamaEmbedding, MockEmbedding, OpenAIEmbedding, DEFAULT_BATCH_SIZE};
use crate::llm::{LlmClient, LlmConfig, LlmProvider};
use crate::query::PipelineConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the configuration file inside the data directory
pub const CONFIG_FILE: &str = "mtgsage.toml";

/// Top-level configuration
///
/// Relative paths are resolved against the directory holding the config
/// file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub sources: SourcesConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub llm: GenerationConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Directory relative paths are resolved against
    #[serde(skip)]
    base_dir: PathBuf,

    /// Key supplied at runtime; never written back to disk
    #[serde(skip)]
    runtime_api_key: Option<String>,
}

/// Input files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Card records, JSON array or one object per line
    #[serde(default = "default_cards_path")]
    pub cards: PathBuf,

    #[serde(default = "default_rulings_path")]
    pub rulings: PathBuf,

    /// Comprehensive rules text
    #[serde(default = "default_rules_path")]
    pub rules: PathBuf,

    #[serde(default = "default_glossary_path")]
    pub glossary: PathBuf,
}

/// Where ingested data lives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database: PathBuf,

    #[serde(default = "default_index_dir")]
    pub index_dir: PathBuf,

    #[serde(default = "default_collection")]
    pub collection: String,
}

/// Which embedding service to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    Ollama,
    OpenAI,
    /// Offline bag-of-words embedder
    Mock,
}

/// Embedding service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_backend")]
    pub provider: EmbeddingBackend,

    #[serde(default = "default_ollama_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    pub api_key: Option<String>,

    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Documents per embedding request
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

/// Generative model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: LlmProvider,

    #[serde(default = "default_ollama_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    pub api_key: Option<String>,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
}

/// Retrieval tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Hits requested per probe
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Similarity threshold (0.0 - 1.0)
    #[serde(default)]
    pub min_score: f64,

    #[serde(default = "default_max_context_docs")]
    pub max_context_docs: usize,

    #[serde(default = "default_chunk_max_chars")]
    pub chunk_max_chars: usize,
}

fn default_cards_path() -> PathBuf {
    PathBuf::from("data/cards.json")
}

fn default_rulings_path() -> PathBuf {
    PathBuf::from("data/rulings.json")
}

fn default_rules_path() -> PathBuf {
    PathBuf::from("data/rules.txt")
}

fn default_glossary_path() -> PathBuf {
    PathBuf::from("data/glossary.txt")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("mtg.db")
}

fn default_index_dir() -> PathBuf {
    PathBuf::from("index")
}

fn default_collection() -> String {
    "mtg_rules".to_string()
}

fn default_embedding_backend() -> EmbeddingBackend {
    EmbeddingBackend::Ollama
}

fn default_ollama_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_embedding_dimension() -> usize {
    768
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_llm_provider() -> LlmProvider {
    LlmProvider::Ollama
}

fn default_llm_model() -> String {
    "llama3.1".to_string()
}

fn default_max_tokens() -> usize {
    1024
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_retries() -> usize {
    3
}

fn default_top_k() -> usize {
    3
}

fn default_max_context_docs() -> usize {
    8
}

fn default_chunk_max_chars() -> usize {
    120
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            cards: default_cards_path(),
            rulings: default_rulings_path(),
            rules: default_rules_path(),
            glossary: default_glossary_path(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
            index_dir: default_index_dir(),
            collection: default_collection(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_backend(),
            endpoint: default_ollama_endpoint(),
            model: default_embedding_model(),
            api_key: None,
            dimension: default_embedding_dimension(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            endpoint: default_ollama_endpoint(),
            model: default_llm_model(),
            api_key: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_score: 0.0,
            max_context_docs: default_max_context_docs(),
            chunk_max_chars: default_chunk_max_chars(),
        }
    }
}

impl EmbeddingConfig {
    /// Create the configured embedding provider
    pub fn build(&self) -> Box<dyn EmbeddingProvider> {
        match self.provider {
            EmbeddingBackend::Ollama => Box::new(
                OllamaEmbedding::new(&self.endpoint, &self.model).with_dimension(self.dimension),
            ),
            EmbeddingBackend::OpenAI => Box::new(
                OpenAIEmbedding::new(&self.endpoint, &self.model, self.api_key.as_deref())
                    .with_dimension(self.dimension),
            ),
            EmbeddingBackend::Mock => Box::new(MockEmbedding::new(self.dimension)),
        }
    }
}

impl GenerationConfig {
    /// Settings for the HTTP client
    pub fn client_config(&self) -> LlmConfig {
        LlmConfig {
            provider: self.provider,
            endpoint: self.endpoint.clone(),
            model: self.model.clone(),
            api_key: self.api_key.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }

    /// Create the configured client
    pub fn build(&self) -> LlmClient {
        LlmClient::new(self.client_config())
    }
}

impl AppConfig {
    /// Load configuration from `path`, or return defaults when it does not exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str::<AppConfig>(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        Ok(config)
    }

    /// Save configuration to `path`, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Resolve a configured path against the config directory
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.resolve(&self.storage.database)
    }

    pub fn index_dir(&self) -> PathBuf {
        self.resolve(&self.storage.index_dir)
    }

    /// Pipeline tuning taken from the retrieval and llm sections
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            top_k: self.retrieval.top_k,
            min_score: self.retrieval.min_score,
            max_context_docs: self.retrieval.max_context_docs,
            chunk_max_chars: self.retrieval.chunk_max_chars,
            max_retries: self.llm.max_retries,
        }
    }

    /// Use `key` for both services unless the file already sets one
    ///
    /// The key stays in memory only: `save` and `config --show` never see it.
    pub fn apply_api_key(&mut self, key: &str) {
        self.runtime_api_key = Some(key.to_string());
    }

    /// Embedding section with the runtime key filled in
    pub fn effective_embedding(&self) -> EmbeddingConfig {
        let mut embedding = self.embedding.clone();
        if embedding.api_key.is_none() {
            embedding.api_key = self.runtime_api_key.clone();
        }
        embedding
    }

    /// Generation section with the runtime key filled in
    pub fn effective_llm(&self) -> GenerationConfig {
        let mut llm = self.llm.clone();
        if llm.api_key.is_none() {
            llm.api_key = self.runtime_api_key.clone();
        }
        llm
    }

    pub fn embedder(&self) -> Box<dyn EmbeddingProvider> {
        self.effective_embedding().build()
    }

    pub fn llm_client(&self) -> LlmClient {
        self.effective_llm().build()
    }
}

/// Default data directory
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join(crate::APP_NAME))
        .unwrap_or_else(|| PathBuf::from(format!(".{}", crate::APP_NAME)))
}

/// Default configuration file path
pub fn default_config_path() -> PathBuf {
    default_data_dir().join(CONFIG_FILE)
}
