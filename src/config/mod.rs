
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Which embedding backend query-time vectorization and the embed build use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedBackendKind {
    /// Local Ollama-protocol server.
    Ollama,
    /// Remote OpenAI-protocol API.
    OpenAi,
    /// No embedder configured; search degrades to lexical-only.
    Off,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedConfig {
    pub backend: EmbedBackendKind,
    /// Model identifier recorded next to every stored vector.
    pub model: String,
    /// Base URL for the Ollama backend.
    pub ollama_url: String,
    /// Base URL for the OpenAI-protocol backend.
    pub openai_url: String,
    /// API key for the remote backend.
    pub api_key: Option<String>,
    pub batch_size: usize,
    /// Vector dimensionality reported by the backend.
    pub dims: usize,
    /// Attempts per embedding call before giving up on a transient failure.
    pub retry_attempts: u32,
    /// Width of the semaphore gating concurrent embedder calls.
    pub width: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root directory of the markdown corpus.
    pub notes_dir: PathBuf,
    /// Path of the SQLite store.
    pub db_path: PathBuf,
    /// Server bind address.
    pub bind_addr: String,
    /// File extensions picked up by the ingest walk.
    pub file_extensions: Vec<String>,
    /// Fail the ingest on invalid UTF-8 instead of skipping the file.
    pub strict_decode: bool,
    /// Parallel request cap; the admission queue holds twice this many.
    pub max_parallel_requests: usize,
    /// Per-request deadline in milliseconds.
    pub request_timeout_ms: u64,
    pub embed: EmbedConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid embedder backend: {0} (must be 'ollama', 'openai' or 'off')")]
    InvalidBackend(String),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("invalid embed model name (cannot be empty)")]
    InvalidModel,
    #[error("invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(usize),
    #[error("invalid embedding dimensionality: {0} (must be between 8 and 8192)")]
    InvalidDims(usize),
    #[error("invalid retry attempts: {0} (must be between 1 and 10)")]
    InvalidRetries(u32),
    #[error("invalid parallel request cap: {0} (must be between 1 and 1024)")]
    InvalidParallelism(usize),
    #[error("OPENAI_API_KEY is required for the openai backend")]
    MissingApiKey,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            backend: EmbedBackendKind::Off,
            model: "nomic-embed-text:latest".to_string(),
            ollama_url: "http://localhost:11434".to_string(),
            openai_url: "https://api.openai.com".to_string(),
            api_key: None,
            batch_size: 64,
            dims: 768,
            retry_attempts: 3,
            width: 2,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            notes_dir: PathBuf::from("./data/notes"),
            db_path: PathBuf::from("./data/kb.sqlite"),
            bind_addr: "127.0.0.1:8080".to_string(),
            file_extensions: vec!["md".to_string()],
            strict_decode: false,
            max_parallel_requests: 16,
            request_timeout_ms: 10_000,
            embed: EmbedConfig::default(),
        }
    }
}

impl Config {
    /// Build the configuration from the environment. Every variable is
    /// optional; the defaults are safe for a local corpus.
    #[inline]
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("KB_NOTES_DIR") {
            config.notes_dir = PathBuf::from(dir);
        }
        if let Ok(path) = std::env::var("KB_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Ok(addr) = std::env::var("KB_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Ok(exts) = std::env::var("KB_FILE_EXTENSIONS") {
            let parsed: Vec<String> = exts
                .split(',')
                .map(|e| e.trim().trim_start_matches('.').to_string())
                .filter(|e| !e.is_empty())
                .collect();
            if !parsed.is_empty() {
                config.file_extensions = parsed;
            }
        }
        if let Ok(val) = std::env::var("KB_STRICT_DECODE") {
            config.strict_decode = val == "1" || val.eq_ignore_ascii_case("true");
        }
        if let Ok(val) = std::env::var("KB_MAX_PARALLEL_REQUESTS") {
            if let Ok(v) = val.parse() {
                config.max_parallel_requests = v;
            }
        }
        if let Ok(val) = std::env::var("KB_REQUEST_TIMEOUT_MS") {
            if let Ok(v) = val.parse() {
                config.request_timeout_ms = v;
            }
        }

        if let Ok(backend) = std::env::var("KB_EMBED_BACKEND") {
            config.embed.backend = match backend.to_ascii_lowercase().as_str() {
                "ollama" => EmbedBackendKind::Ollama,
                "openai" => EmbedBackendKind::OpenAi,
                "off" | "" => EmbedBackendKind::Off,
                other => return Err(ConfigError::InvalidBackend(other.to_string())),
            };
        }
        if let Ok(model) = std::env::var("KB_EMBED_MODEL") {
            config.embed.model = model;
        }
        if let Ok(url) = std::env::var("KB_OLLAMA_URL") {
            config.embed.ollama_url = url;
        }
        if let Ok(url) = std::env::var("KB_OPENAI_URL") {
            config.embed.openai_url = url;
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            config.embed.api_key = Some(key);
        }
        if let Ok(val) = std::env::var("KB_EMBED_BATCH_SIZE") {
            if let Ok(v) = val.parse() {
                config.embed.batch_size = v;
            }
        }
        if let Ok(val) = std::env::var("KB_EMBED_DIMS") {
            if let Ok(v) = val.parse() {
                config.embed.dims = v;
            }
        }
        if let Ok(val) = std::env::var("KB_EMBED_RETRIES") {
            if let Ok(v) = val.parse() {
                config.embed.retry_attempts = v;
            }
        }
        if let Ok(val) = std::env::var("KB_EMBED_WIDTH") {
            if let Ok(v) = val.parse() {
                config.embed.width = v;
            }
        }

        config.validate()?;
        Ok(config)
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.embed.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel);
        }
        if self.embed.batch_size == 0 || self.embed.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.embed.batch_size));
        }
        if !(8..=8192).contains(&self.embed.dims) {
            return Err(ConfigError::InvalidDims(self.embed.dims));
        }
        if !(1..=10).contains(&self.embed.retry_attempts) {
            return Err(ConfigError::InvalidRetries(self.embed.retry_attempts));
        }
        if self.max_parallel_requests == 0 || self.max_parallel_requests > 1024 {
            return Err(ConfigError::InvalidParallelism(self.max_parallel_requests));
        }
        for url in [&self.embed.ollama_url, &self.embed.openai_url] {
            Url::parse(url).map_err(|_| ConfigError::InvalidUrl(url.clone()))?;
        }
        if self.embed.backend == EmbedBackendKind::OpenAi && self.embed.api_key.is_none() {
            return Err(ConfigError::MissingApiKey);
        }
        Ok(())
    }

    /// Deadline applied to every read request.
    #[inline]
    pub fn request_budget(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.request_timeout_ms)
    }
}
