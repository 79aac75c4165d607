use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "config.yaml";

/// Read window for the vector file (10 MiB).
const DEFAULT_CHUNK_SIZE_BYTES: usize = 10 * 1024 * 1024;
/// A single record larger than this is dropped rather than buffered.
const DEFAULT_MAX_RECORD_BYTES: usize = crate::corpus::parser::DEFAULT_MAX_RECORD_BYTES;
const DEFAULT_SEARCH_LIMIT: usize = 5;
const DEFAULT_BATCH_SIZE: usize = 100;
/// Pause between import batches to stay under the provider's rate limit.
const DEFAULT_BATCH_DELAY_MS: u64 = 100;
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const DEFAULT_LOCAL_MODEL: &str = "bge-base-en-v1.5";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_EXPLAIN_MODEL: &str = "gpt-4o";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReaderConfig {
    #[serde(default = "default_chunk_size_bytes")]
    pub chunk_size_bytes: usize,

    #[serde(default = "default_max_record_bytes")]
    pub max_record_bytes: usize,

    /// Read the next chunk on a background thread while parsing.
    #[serde(default = "default_true")]
    pub prefetch: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            chunk_size_bytes: DEFAULT_CHUNK_SIZE_BYTES,
            max_record_bytes: DEFAULT_MAX_RECORD_BYTES,
            prefetch: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_search_limit")]
    pub default_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_SEARCH_LIMIT,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImportConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay_ms: DEFAULT_BATCH_DELAY_MS,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    OpenAi,
    Local,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: ProviderKind,

    /// Remote embedding model name.
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// fastembed model used when `provider: local`.
    #[serde(default = "default_local_model")]
    pub local_model: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            local_model: DEFAULT_LOCAL_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExplainConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_explain_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for ExplainConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: DEFAULT_EXPLAIN_MODEL.to_string(),
            max_tokens: 150,
            temperature: 0.3,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_chunk_size_bytes() -> usize {
    DEFAULT_CHUNK_SIZE_BYTES
}

fn default_max_record_bytes() -> usize {
    DEFAULT_MAX_RECORD_BYTES
}

fn default_search_limit() -> usize {
    DEFAULT_SEARCH_LIMIT
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_batch_delay_ms() -> u64 {
    DEFAULT_BATCH_DELAY_MS
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_local_model() -> String {
    DEFAULT_LOCAL_MODEL.to_string()
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_api_key_env() -> String {
    DEFAULT_API_KEY_ENV.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_explain_model() -> String {
    DEFAULT_EXPLAIN_MODEL.to_string()
}

fn default_max_tokens() -> u32 {
    150
}

fn default_temperature() -> f32 {
    0.3
}

fn default_codes_file() -> String {
    "loinc-codes.json".to_string()
}

fn default_embeddings_file() -> String {
    "loinc-embeddings.json".to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Codes file, relative to the data directory.
    #[serde(default = "default_codes_file")]
    pub codes_file: String,

    /// Pre-computed vector file, relative to the data directory.
    #[serde(default = "default_embeddings_file")]
    pub embeddings_file: String,

    #[serde(default)]
    pub reader: ReaderConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub explain: ExplainConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            codes_file: default_codes_file(),
            embeddings_file: default_embeddings_file(),
            reader: ReaderConfig::default(),
            search: SearchConfig::default(),
            import: ImportConfig::default(),
            embedding: EmbeddingConfig::default(),
            explain: ExplainConfig::default(),
            base_path: PathBuf::new(),
        }
    }
}

impl Config {
    fn validate(&self) -> anyhow::Result<()> {
        if self.reader.chunk_size_bytes == 0 {
            bail!("reader.chunk_size_bytes must be greater than 0");
        }
        if self.reader.max_record_bytes == 0 {
            bail!("reader.max_record_bytes must be greater than 0");
        }
        if self.search.default_limit == 0 {
            bail!("search.default_limit must be greater than 0");
        }
        if self.import.batch_size == 0 {
            bail!("import.batch_size must be greater than 0");
        }
        if self.embedding.timeout_secs == 0 {
            bail!("embedding.timeout_secs must be greater than 0");
        }
        if !(0.0..=2.0).contains(&self.explain.temperature) {
            bail!(
                "explain.temperature must be between 0.0 and 2.0, got {}",
                self.explain.temperature
            );
        }
        if self.codes_file.is_empty() || self.embeddings_file.is_empty() {
            bail!("codes_file and embeddings_file must not be empty");
        }
        Ok(())
    }

    /// Load `config.yaml` from `base_path`, creating it with defaults first.
    pub fn load_with(base_path: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(base_path)
            .with_context(|| format!("failed to create {}", base_path.display()))?;

        let path = base_path.join(CONFIG_FILE);
        if !path.exists() {
            log::info!("Creating default config at {}", path.display());
            let mut config = Self::default();
            config.base_path = base_path.to_path_buf();
            config.save()?;
        }

        let config_str = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut config: Self = serde_yml::from_str(&config_str)
            .with_context(|| format!("config is malformed: {}", path.display()))?;

        config.base_path = base_path.to_path_buf();
        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_str = serde_yml::to_string(&self)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.base_path)?;
        std::io::Write::write_all(&mut tmp, config_str.as_bytes())?;
        tmp.persist(self.base_path.join(CONFIG_FILE))?;
        Ok(())
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn codes_path(&self) -> PathBuf {
        self.base_path.join(&self.codes_file)
    }

    pub fn embeddings_path(&self) -> PathBuf {
        self.base_path.join(&self.embeddings_file)
    }
}
