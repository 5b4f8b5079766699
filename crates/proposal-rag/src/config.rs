//! Configuration for the proposal pipeline

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Environment variable naming a TOML config file
pub const CONFIG_ENV_VAR: &str = "PROPOSAL_RAG_CONFIG";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RagConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Ollama/LLM configuration
    pub llm: LlmConfig,
    /// Embedding configuration
    pub embeddings: EmbeddingConfig,
    /// Batch processor configuration
    pub batch: BatchConfig,
    /// Memoization caches
    pub cache: CacheConfig,
    /// Dataset chunking configuration
    pub optimizer: OptimizerConfig,
    /// Per-file pipeline configuration
    pub pipeline: PipelineConfig,
    /// Job registry and push channel configuration
    pub tracker: TrackerConfig,
    /// On-disk locations
    pub storage: StorageConfig,
}

impl RagConfig {
    /// Read configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("Invalid config '{}': {}", path.display(), e)))
    }

    /// Load from `PROPOSAL_RAG_CONFIG` if set, otherwise defaults
    pub fn load() -> Result<Self> {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path),
            _ => Ok(Self::default()),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
    /// Maximum upload size in bytes (default: 100MB)
    pub max_upload_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            enable_cors: true,
            max_upload_size: 100 * 1024 * 1024, // 100MB
        }
    }
}

/// Ollama configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Ollama base URL
    pub base_url: String,
    /// Embedding model name
    pub embed_model: String,
    /// Model used for section classification
    pub generate_model: String,
    /// Temperature for generation
    pub temperature: f32,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Number of retries for failed requests
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            embed_model: "nomic-embed-text".to_string(),
            generate_model: "phi3".to_string(),
            temperature: 0.3, // Lower for more consistent section labels
            timeout_secs: 120,
            max_retries: 2,
        }
    }
}

/// Embedding backend selection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackend {
    /// Deterministic feature hashing, no external service
    #[default]
    Hash,
    /// Ollama embeddings endpoint
    Ollama,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    /// Embedding dimensions (384 for the hashing embedder, 768 for nomic-embed-text)
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Hash,
            dimensions: 384,
        }
    }
}

/// Batch processor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Items drained per `get_batch` call
    pub batch_size: usize,
    /// Worker pool size (default: CPU count)
    pub max_workers: Option<usize>,
    /// Timeout for a single attempt of a single item
    pub item_timeout_secs: u64,
    /// Attempts allowed per item when retries are enabled
    pub max_retries: u32,
    pub retry_enabled: bool,
    /// Backoff unit; attempt `n` waits `base * 2^n`
    pub backoff_base_ms: u64,
    /// Error records kept for post-mortem reporting
    pub max_error_records: usize,
    /// System memory usage (percent) that triggers relief hooks
    pub memory_threshold_percent: f32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_workers: None, // Auto-detect from CPU count
            item_timeout_secs: 30,
            max_retries: 3,
            retry_enabled: true,
            backoff_base_ms: 1000,
            max_error_records: 100,
            memory_threshold_percent: 90.0,
        }
    }
}

impl BatchConfig {
    pub fn item_timeout(&self) -> Duration {
        Duration::from_secs(self.item_timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    /// Resolved worker count
    pub fn workers(&self) -> usize {
        self.max_workers.unwrap_or_else(num_cpus::get).max(1)
    }
}

/// Cache sizes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Extracted documents keyed by content hash
    pub extraction_max_items: usize,
    /// Language pattern results keyed by text hash
    pub pattern_max_items: usize,
    /// Section classification results keyed by chunk hash
    pub classification_max_items: usize,
    /// Optional memory cap applied to each cache
    pub max_memory_bytes: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            extraction_max_items: 100,
            pattern_max_items: 500,
            classification_max_items: 1000,
            max_memory_bytes: None,
        }
    }
}

/// Dataset chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Items per chunk for the size strategy
    pub chunk_size: usize,
    /// Concurrent chunks (default: CPU count x 2)
    pub max_concurrent: Option<usize>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            max_concurrent: None,
        }
    }
}

/// Per-file pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Characters per classification chunk
    pub text_chunk_size: usize,
    /// Overlap between classification chunks
    pub text_chunk_overlap: usize,
    /// Blocks below this confidence are not indexed
    pub confidence_threshold: f32,
    /// Confidence assumed when the classifier supplies none
    pub default_confidence: f32,
    /// Pause between stages so UI consumers can render each transition
    pub stage_delay_ms: u64,
    /// Outer retry attempts for parsing and section identification
    pub retry_attempts: u32,
    pub retry_min_backoff_ms: u64,
    pub retry_max_backoff_ms: u64,
    pub ocr_enabled: bool,
    /// Tesseract language code
    pub ocr_language: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            text_chunk_size: 2000,
            text_chunk_overlap: 200,
            confidence_threshold: 0.7,
            default_confidence: 0.8,
            stage_delay_ms: 500,
            retry_attempts: 3,
            retry_min_backoff_ms: 4_000,
            retry_max_backoff_ms: 10_000,
            ocr_enabled: true,
            ocr_language: "eng".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn stage_delay(&self) -> Duration {
        Duration::from_millis(self.stage_delay_ms)
    }
}

/// Job registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Completed jobs older than this are swept (default: 1 hour)
    pub retention_secs: u64,
    /// Interval of the background sweeper
    pub sweep_interval_secs: u64,
    /// Push channels stay open this long after the terminal event
    pub push_grace_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            retention_secs: 3600,
            sweep_interval_secs: 300,
            push_grace_secs: 5,
        }
    }
}

/// On-disk locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Where uploaded PDFs are saved
    pub upload_dir: PathBuf,
    /// Where JSON metadata sidecars are written
    pub sidecar_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("./data/uploads"),
            sidecar_dir: PathBuf::from("./data/proposals"),
        }
    }
}
