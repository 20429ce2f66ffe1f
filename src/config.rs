//! TOML configuration parsing and validation.
//!
//! Only `[db]` is required; every other section falls back to defaults
//! tuned for a personal notes workspace:
//!
//! ```toml
//! [db]
//! path = "./data/memory.sqlite"
//!
//! [workspace]
//! dir = "."
//!
//! [embedding]
//! provider = "openai"
//! api_key_env = "OPENAI_API_KEY"
//! ```
//!
//! Credentials are resolved once, when the file is loaded: an explicit
//! `api_key` wins, otherwise `api_key_env` names the variable to read.
//! Providers never consult the environment themselves.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

use memory_harness_core::chunk::ChunkingParams;
use memory_harness_core::search::HybridParams;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub hybrid: HybridConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkspaceConfig {
    #[serde(default = "default_workspace_dir")]
    pub dir: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            dir: default_workspace_dir(),
        }
    }
}

fn default_workspace_dir() -> PathBuf {
    PathBuf::from(".")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_tokens")]
    pub tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            tokens: default_tokens(),
            overlap: default_overlap(),
        }
    }
}

fn default_tokens() -> usize {
    400
}
fn default_overlap() -> usize {
    80
}

#[derive(Debug, Deserialize, Clone)]
pub struct HybridConfig {
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f64,
    #[serde(default = "default_text_weight")]
    pub text_weight: f64,
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: f64,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            vector_weight: default_vector_weight(),
            text_weight: default_text_weight(),
            candidate_multiplier: default_candidate_multiplier(),
        }
    }
}

fn default_vector_weight() -> f64 {
    0.7
}
fn default_text_weight() -> f64 {
    0.3
}
fn default_candidate_multiplier() -> f64 {
    4.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_min_score")]
    pub min_score: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            min_score: default_min_score(),
        }
    }
}

fn default_max_results() -> usize {
    6
}
fn default_min_score() -> f64 {
    0.35
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: default_max_entries(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_max_entries() -> usize {
    50_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_true")]
    pub watch: bool,
    #[serde(default = "default_watch_debounce_ms")]
    pub watch_debounce_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            watch: true,
            watch_debounce_ms: default_watch_debounce_ms(),
        }
    }
}

fn default_watch_debounce_ms() -> u64 {
    1500
}

#[derive(Deserialize, Clone, PartialEq)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Overrides the provider's default model.
    #[serde(default)]
    pub model: Option<String>,
    /// Overrides the provider's default dimensionality.
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Environment variable to read `api_key` from at load time.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Base URL override (OpenAI-compatible gateways, remote Ollama).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            api_key: None,
            api_key_env: None,
            url: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl fmt::Debug for EmbeddingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddingConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("dims", &self.dims)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_key_env", &self.api_key_env)
            .field("url", &self.url)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}

impl Config {
    pub fn chunking_params(&self) -> ChunkingParams {
        ChunkingParams {
            tokens: self.chunking.tokens,
            overlap: self.chunking.overlap,
        }
    }

    pub fn hybrid_params(&self) -> HybridParams {
        HybridParams {
            vector_weight: self.hybrid.vector_weight,
            text_weight: self.hybrid.text_weight,
            candidate_multiplier: self.hybrid.candidate_multiplier,
        }
    }
}

/// Read, parse, and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content).with_context(|| format!("Invalid config file: {}", path.display()))
}

/// Parse and validate config text, resolving credentials and relative paths.
pub fn parse_config(content: &str) -> Result<Config> {
    let mut config: Config =
        toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.embedding.api_key.is_none() {
        if let Some(var) = &config.embedding.api_key_env {
            config.embedding.api_key = std::env::var(var).ok().filter(|v| !v.is_empty());
        }
    }

    config.db.path = absolutize(&config.db.path)?;
    config.workspace.dir = absolutize(&config.workspace.dir)?;

    validate(&config)?;
    Ok(config)
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to resolve current directory")?;
    Ok(cwd.join(path))
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.tokens == 0 {
        bail!("chunking.tokens must be > 0");
    }
    if config.chunking.overlap >= config.chunking.tokens {
        bail!("chunking.overlap must be smaller than chunking.tokens");
    }

    let weights = [
        ("hybrid.vector_weight", config.hybrid.vector_weight),
        ("hybrid.text_weight", config.hybrid.text_weight),
    ];
    for (name, w) in weights {
        if !(0.0..=1.0).contains(&w) {
            bail!("{} must be in [0.0, 1.0]", name);
        }
    }
    if !(config.hybrid.candidate_multiplier > 0.0) {
        bail!("hybrid.candidate_multiplier must be > 0");
    }

    if config.search.max_results < 1 {
        bail!("search.max_results must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.search.min_score) {
        bail!("search.min_score must be in [0.0, 1.0]");
    }

    if config.embedding.provider.trim().is_empty() {
        bail!("embedding.provider must not be empty");
    }
    if config.embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }

    Ok(())
}
