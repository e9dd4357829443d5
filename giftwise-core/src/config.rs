use crate::catalog::KeyField;
use crate::models::EmbeddingModel;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid value {value:?} for environment variable {var}")]
    Env { var: String, value: String },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Configuration for the whole pipeline and the agent.
///
/// Every section has defaults, so a YAML file only needs the keys it changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub enrich: EnrichConfig,
    pub storage: StorageConfig,
    pub sync: SyncConfig,
    pub retry: RetryConfig,
    pub catalog: CatalogConfig,
    pub agent: AgentConfig,
}

/// OpenAI-compatible endpoint used for extraction, embeddings and chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    pub base_url: String,
    /// Usually left empty and supplied through `OPENAI_API_KEY`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub temperature: f64,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    pub dimensions: usize,
    /// Texts per embedding request during loads.
    pub batch_size: usize,
    /// Inputs longer than this many characters are truncated.
    pub max_chars: usize,
}

impl EmbeddingConfig {
    pub fn model(&self) -> EmbeddingModel {
        EmbeddingModel::new(&self.model, self.dimensions)
    }
}

/// Stage 2 keyword enrichment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichConfig {
    pub top_k: usize,
    pub min_similarity: f32,
    pub concurrency: usize,
    pub target_lang: String,
    pub include_embedding: bool,
}

/// Vector database storage mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum StorageMode {
    /// Redis Stack (RedisJSON + RediSearch).
    Redis { url: String },
    /// Qdrant over gRPC.
    Qdrant { url: String },
    /// In-process store persisted to a JSON file.
    Embedded { path: String },
}

impl Default for StorageMode {
    fn default() -> Self {
        Self::Redis {
            url: "redis://localhost:6379/0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub storage_mode: StorageMode,
    /// Search index (Redis) or collection (Qdrant) name.
    pub index_name: String,
    /// Key prefix of the JSON product documents.
    pub json_prefix: String,
    /// Key prefix of the indexed vector records.
    pub vec_prefix: String,
    /// Products per pipelined write flush.
    pub write_batch: usize,
}

/// Stage 3 incremental load defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub key_field: KeyField,
    pub skip_unchanged: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Upper bound of the random extra fraction added to each delay.
    pub jitter: f64,
}

/// Stage 1 catalog conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub lang_priority: Vec<String>,
    pub default_brand: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub model: String,
    pub system_prompt: String,
    pub temperature: f64,
    pub max_tool_rounds: usize,
    pub default_k: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_path: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            temperature: 0.0,
            timeout_secs: 60,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-large".to_string(),
            dimensions: 1024,
            batch_size: 64,
            max_chars: 12000,
        }
    }
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            top_k: 16,
            min_similarity: 0.25,
            concurrency: 50,
            target_lang: "en".to_string(),
            include_embedding: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_mode: StorageMode::default(),
            index_name: "idx:products".to_string(),
            json_prefix: "prod:".to_string(),
            vec_prefix: "vec:".to_string(),
            write_batch: 200,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            key_field: KeyField::Id,
            skip_unchanged: true,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 1200,
            max_delay_ms: 30_000,
            jitter: 0.25,
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            lang_priority: ["it", "en", "x-default", "es", "fr", "de"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            default_brand: String::new(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini-2024-07-18".to_string(),
            system_prompt: DEFAULT_AGENT_PROMPT.to_string(),
            temperature: 0.3,
            max_tool_rounds: 8,
            default_k: 8,
            session_path: None,
        }
    }
}

const DEFAULT_AGENT_PROMPT: &str = "You are GiftFinder, an assistant that helps people choose gifts.\n\
- Be clear and concrete.\n\
- NEVER invent products: only propose items returned by the search tool.\n\
- When the user asks for ideas, call `search_products` right away with include_details=true and show 3-5 relevant results with useful details (size, materials, theme, country).\n\
- If the user asks about one item, use the details already in the results; call `get_product` only if something is missing.\n\
- Ask at most 1-2 clarifying questions (budget, recipient, occasion, interests) but do not hold back a first proposal.\n\
- After the results, suggest 2-3 quick filters (price, colour/theme, size).\n";

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from `config.yaml` if it exists, otherwise use defaults.
    pub fn load_or_default() -> Self {
        Self::load("config.yaml").unwrap_or_default()
    }

    /// Applies overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary variable lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("OPENAI_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = get("OPENAI_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = get("OPENAI_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = get("LLM_MODEL") {
            self.agent.model = v;
        }
        if let Some(v) = get("EMBED_MODEL") {
            self.embedding.model = v;
        }
        if let Some(v) = get("EMBED_DIM") {
            self.embedding.dimensions = parse_env("EMBED_DIM", &v)?;
        }
        if let Some(v) = get("BATCH_SIZE") {
            self.embedding.batch_size = parse_env("BATCH_SIZE", &v)?;
        }
        if let Some(v) = get("MAX_CHARS") {
            self.embedding.max_chars = parse_env("MAX_CHARS", &v)?;
        }
        if let Some(v) = get("TOP_K_KEYWORDS") {
            self.enrich.top_k = parse_env("TOP_K_KEYWORDS", &v)?;
        }
        if let Some(v) = get("MIN_SIM") {
            self.enrich.min_similarity = parse_env("MIN_SIM", &v)?;
        }
        if let Some(v) = get("CONCURRENCY") {
            self.enrich.concurrency = parse_env("CONCURRENCY", &v)?;
        }
        if let Some(v) = get("TARGET_LANG") {
            self.enrich.target_lang = v;
        }
        if let Some(v) = get("REDIS_URL") {
            self.storage.storage_mode = StorageMode::Redis { url: v };
        }
        if let Some(v) = get("INDEX_NAME") {
            self.storage.index_name = v;
        }
        if let Some(v) = get("JSON_PREFIX") {
            self.storage.json_prefix = v;
        }
        if let Some(v) = get("VEC_PREFIX") {
            self.storage.vec_prefix = v;
        }
        if let Some(v) = get("KEY_FIELD") {
            self.sync.key_field = parse_env("KEY_FIELD", &v)?;
        }

        Ok(())
    }

    /// Rejects values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.embedding.dimensions == 0 {
            return Err(ConfigError::Invalid("embedding.dimensions must be > 0".into()));
        }
        if self.embedding.batch_size == 0 {
            return Err(ConfigError::Invalid("embedding.batch_size must be > 0".into()));
        }
        if self.enrich.top_k == 0 {
            return Err(ConfigError::Invalid("enrich.top_k must be >= 1".into()));
        }
        if self.enrich.concurrency == 0 {
            return Err(ConfigError::Invalid("enrich.concurrency must be >= 1".into()));
        }
        if !(-1.0..=1.0).contains(&self.enrich.min_similarity) {
            return Err(ConfigError::Invalid(
                "enrich.min_similarity must be within [-1, 1]".into(),
            ));
        }
        if !self.retry.jitter.is_finite() || !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(ConfigError::Invalid("retry.jitter must be within [0, 1]".into()));
        }
        if self.storage.write_batch == 0 {
            return Err(ConfigError::Invalid("storage.write_batch must be > 0".into()));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(var: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        var: var.to_string(),
        value: value.to_string(),
    })
}
