//! Application configuration for kbchat.
//!
//! User config lives at `~/.kbchat/kbchat.toml`. It is loaded once at startup
//! and handed to each component by reference; nothing reads settings from
//! ambient global state. Secrets never live in the file, only the names of
//! the environment variables that hold them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{KbChatError, Result};
use crate::types::SelectionPolicy;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "kbchat.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".kbchat";

/// Value shipped in sample `.env` files; treated the same as an unset key.
const PLACEHOLDER_API_KEY: &str = "your-openrouter-api-key-here";

// ---------------------------------------------------------------------------
// Config structs (matching kbchat.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Candidate retrieval and context selection.
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Similarity graph settings.
    #[serde(default)]
    pub graph: GraphConfig,

    /// Live-augmentation trigger.
    #[serde(default)]
    pub live_augmentation: LiveAugmentationConfig,

    /// Text-generation backend (OpenRouter).
    #[serde(default)]
    pub generator: GeneratorConfig,

    /// Local embedding provider.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Capability providers behind the tool router.
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Per-collaborator call timeouts.
    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    /// Document store location.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// `[retrieval]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Maximum candidates requested from the nearest-neighbor index.
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,

    /// Context selection policy used when the caller does not pick one.
    #[serde(default)]
    pub policy: SelectionPolicy,

    /// Hops followed when expanding candidates through the graph.
    #[serde(default = "default_expansion_depth")]
    pub expansion_depth: usize,

    /// Character budget for a grounding excerpt.
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,

    /// Character budget for the UI preview attached to an attribution.
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            candidate_limit: default_candidate_limit(),
            policy: SelectionPolicy::default(),
            expansion_depth: default_expansion_depth(),
            excerpt_chars: default_excerpt_chars(),
            preview_chars: default_preview_chars(),
        }
    }
}

fn default_candidate_limit() -> usize {
    5
}
fn default_expansion_depth() -> usize {
    1
}
fn default_excerpt_chars() -> usize {
    2000
}
fn default_preview_chars() -> usize {
    300
}

/// `[graph]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Edges exist only for pairs whose cosine similarity exceeds this value.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    /// Load every stored document into the graph before answering.
    #[serde(default = "default_true")]
    pub preload: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            preload: true,
        }
    }
}

fn default_similarity_threshold() -> f64 {
    0.7
}

/// `[live_augmentation]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveAugmentationConfig {
    /// Master switch for supplementary live lookups.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Capability invoked through the tool router when triggered.
    #[serde(default = "default_live_capability")]
    pub capability: String,

    /// Whether a four-digit year in the query counts as a trigger.
    #[serde(default = "default_true")]
    pub match_years: bool,

    /// Words and phrases signalling recency or depth-of-detail needs.
    #[serde(default = "default_live_keywords")]
    pub keywords: Vec<String>,
}

impl Default for LiveAugmentationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capability: default_live_capability(),
            match_years: true,
            keywords: default_live_keywords(),
        }
    }
}

fn default_live_capability() -> String {
    "web_search".into()
}

fn default_live_keywords() -> Vec<String> {
    [
        "current",
        "latest",
        "today",
        "recent",
        "now",
        "breaking",
        "news",
        "more",
        "additional",
        "expand",
        "elaborate",
        "details",
        "comprehensive",
        "complete",
        "update",
        "new",
        "advance",
        "development",
        "trend",
        "state of",
        "overview",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// `[generator]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// OpenAI-compatible API root.
    #[serde(default = "default_generator_base_url")]
    pub base_url: String,

    /// Model identifier sent with every completion request.
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Upper bound on generated tokens.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            base_url: default_generator_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_generator_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_model() -> String {
    "openai/gpt-3.5-turbo".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1000
}

/// `[embedding]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Fixed vector length for this deployment.
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimensions: default_dimensions(),
        }
    }
}

fn default_dimensions() -> usize {
    384
}

/// `[tools]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Try the remote delegate before local providers.
    #[serde(default)]
    pub prefer_remote: bool,

    /// Base URL of the remote capability server, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,

    /// Capability names the remote server is expected to satisfy.
    #[serde(default)]
    pub remote_capabilities: Vec<String>,

    /// Name of the env var holding the Brave Search key.
    #[serde(default = "default_brave_key_env")]
    pub brave_api_key_env: String,

    /// Brave Search API root.
    #[serde(default = "default_brave_base_url")]
    pub brave_base_url: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            prefer_remote: false,
            remote_url: None,
            remote_capabilities: Vec::new(),
            brave_api_key_env: default_brave_key_env(),
            brave_base_url: default_brave_base_url(),
        }
    }
}

fn default_brave_key_env() -> String {
    "BRAVE_API_KEY".into()
}
fn default_brave_base_url() -> String {
    "https://api.search.brave.com/res/v1".into()
}

/// `[timeouts]` section, all values in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_embedding_ms")]
    pub embedding_ms: u64,
    #[serde(default = "default_index_ms")]
    pub index_ms: u64,
    #[serde(default = "default_live_search_ms")]
    pub live_search_ms: u64,
    #[serde(default = "default_generator_ms")]
    pub generator_ms: u64,
}

impl TimeoutsConfig {
    pub fn embedding(&self) -> Duration {
        Duration::from_millis(self.embedding_ms)
    }

    pub fn index(&self) -> Duration {
        Duration::from_millis(self.index_ms)
    }

    pub fn live_search(&self) -> Duration {
        Duration::from_millis(self.live_search_ms)
    }

    pub fn generator(&self) -> Duration {
        Duration::from_millis(self.generator_ms)
    }
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            embedding_ms: default_embedding_ms(),
            index_ms: default_index_ms(),
            live_search_ms: default_live_search_ms(),
            generator_ms: default_generator_ms(),
        }
    }
}

fn default_embedding_ms() -> u64 {
    5_000
}
fn default_index_ms() -> u64 {
    5_000
}
fn default_live_search_ms() -> u64 {
    15_000
}
fn default_generator_ms() -> u64 {
    60_000
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// libSQL database file; a leading `~/` expands to the home directory.
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

impl StorageConfig {
    /// Resolve `database_path`, expanding a leading `~/`.
    pub fn resolved_path(&self) -> Result<PathBuf> {
        match self.database_path.strip_prefix("~/") {
            Some(rest) => {
                let home = dirs::home_dir().ok_or_else(|| {
                    KbChatError::config("could not determine home directory")
                })?;
                Ok(home.join(rest))
            }
            None => Ok(PathBuf::from(&self.database_path)),
        }
    }
}

fn default_database_path() -> String {
    "~/.kbchat/knowledge.db".into()
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    /// Reject values that would make the pipeline misbehave at runtime.
    pub fn validate(&self) -> Result<()> {
        let threshold = self.graph.similarity_threshold;
        if !(-1.0..=1.0).contains(&threshold) {
            return Err(KbChatError::config(format!(
                "graph.similarity_threshold must be within [-1, 1], got {threshold}"
            )));
        }
        if self.retrieval.candidate_limit == 0 {
            return Err(KbChatError::config("retrieval.candidate_limit must be > 0"));
        }
        if self.embedding.dimensions == 0 {
            return Err(KbChatError::config("embedding.dimensions must be > 0"));
        }

        let mut urls = vec![
            ("generator.base_url", self.generator.base_url.as_str()),
            ("tools.brave_base_url", self.tools.brave_base_url.as_str()),
        ];
        if let Some(remote) = &self.tools.remote_url {
            urls.push(("tools.remote_url", remote.as_str()));
        }
        for (field, value) in urls {
            Url::parse(value)
                .map_err(|e| KbChatError::config(format!("{field} is not a valid URL: {e}")))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Credentials (resolved from the environment once at startup)
// ---------------------------------------------------------------------------

/// Secrets named by the config, resolved from the process environment.
#[derive(Clone, Default)]
pub struct Credentials {
    /// Key for the generator backend.
    pub generator_api_key: Option<String>,
    /// Key for the live web-search capability.
    pub brave_api_key: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("generator_api_key", &self.generator_api_key.as_ref().map(|_| "<set>"))
            .field("brave_api_key", &self.brave_api_key.as_ref().map(|_| "<set>"))
            .finish()
    }
}

impl Credentials {
    /// Read every key named in `config` from the environment.
    pub fn from_env(config: &AppConfig) -> Self {
        let generator_api_key = read_key(&config.generator.api_key_env);
        if generator_api_key.is_none() {
            tracing::warn!(
                var = %config.generator.api_key_env,
                "generator API key is not set; answers will report a configuration error"
            );
        }
        Self {
            generator_api_key,
            brave_api_key: read_key(&config.tools.brave_api_key_env),
        }
    }
}

fn read_key(var_name: &str) -> Option<String> {
    std::env::var(var_name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && v != PLACEHOLDER_API_KEY)
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.kbchat/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| KbChatError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.kbchat/kbchat.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load and validate the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| KbChatError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content)
        .map_err(|e| KbChatError::config(format!("failed to parse {}: {e}", path.display())))?;
    config.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| KbChatError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| KbChatError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| KbChatError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the generator API key env var is set and non-empty.
pub fn validate_generator_key(config: &AppConfig) -> Result<()> {
    let var_name = &config.generator.api_key_env;
    match read_key(var_name) {
        Some(_) => Ok(()),
        None => Err(KbChatError::config(format!(
            "generator API key not found. Set the {var_name} environment variable.\n\
             Get a key at https://openrouter.ai/keys"
        ))),
    }
}
