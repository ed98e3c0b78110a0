//! Application configuration for RepoTutor.
//!
//! User config lives at `~/.repotutor/repotutor.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{RepoTutorError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "repotutor.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".repotutor";

/// Default per-file size ceiling in bytes.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100_000;

// ---------------------------------------------------------------------------
// Config structs (matching repotutor.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// OpenRouter settings.
    #[serde(default)]
    pub openrouter: OpenRouterConfig,

    /// Crawl policies.
    #[serde(default)]
    pub crawl: CrawlPoliciesConfig,

    /// External renderers.
    #[serde(default)]
    pub render: RenderConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Root directory for generated tutorials.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Tutorial language.
    #[serde(default = "default_language")]
    pub language: String,

    /// Upper bound on extracted abstractions.
    #[serde(default = "default_max_abstractions")]
    pub max_abstractions: usize,

    /// Worker pool size for chapters and diagrams.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Directory holding the response cache database.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            language: default_language(),
            max_abstractions: default_max_abstractions(),
            concurrency: default_concurrency(),
            cache_dir: default_cache_dir(),
        }
    }
}

fn default_output_dir() -> String {
    "output".into()
}
fn default_language() -> String {
    "english".into()
}
fn default_max_abstractions() -> usize {
    10
}
fn default_concurrency() -> usize {
    4
}
fn default_cache_dir() -> String {
    "~/.repotutor/cache".into()
}

/// `[openrouter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Default model to use for generation.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Chat completions base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Per-request timeout.
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Total attempts per request, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            default_model: default_model(),
            base_url: default_base_url(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_llm_timeout(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "google/gemini-2.5-pro".into()
}
fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_max_tokens() -> u32 {
    8192
}
fn default_temperature() -> f32 {
    0.2
}
fn default_llm_timeout() -> u64 {
    180
}
fn default_max_attempts() -> u32 {
    3
}

/// `[crawl]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlPoliciesConfig {
    /// Path include globs. A file must match at least one when non-empty.
    #[serde(default = "default_include_patterns")]
    pub include_patterns: Vec<String>,

    /// Path exclude globs.
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,

    /// Per-file size ceiling in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Name of the env var holding the GitHub token.
    #[serde(default = "default_github_token_env")]
    pub github_token_env: String,

    /// GitHub REST API base URL.
    #[serde(default = "default_github_api_url")]
    pub github_api_url: String,

    /// Raw content host base URL.
    #[serde(default = "default_github_raw_url")]
    pub github_raw_url: String,
}

impl Default for CrawlPoliciesConfig {
    fn default() -> Self {
        Self {
            include_patterns: default_include_patterns(),
            exclude_patterns: default_exclude_patterns(),
            max_file_size: default_max_file_size(),
            github_token_env: default_github_token_env(),
            github_api_url: default_github_api_url(),
            github_raw_url: default_github_raw_url(),
        }
    }
}

fn default_include_patterns() -> Vec<String> {
    [
        "*.py", "*.js", "*.jsx", "*.ts", "*.tsx", "*.go", "*.java", "*.kt", "*.rs", "*.c",
        "*.h", "*.cpp", "*.hpp", "*.cs", "*.php", "*.rb", "*.swift", "*.html", "*.css",
        "*.md", "*.rst", "*.toml", "*.yaml", "*.yml", "Dockerfile", "Makefile",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_exclude_patterns() -> Vec<String> {
    [
        "*test*",
        "*docs/*",
        "*examples/*",
        "*venv/*",
        "*node_modules/*",
        "*dist/*",
        "*build/*",
        "*target/*",
        "*vendor/*",
        ".git/*",
        ".github/*",
        ".vscode/*",
        "*.min.js",
        "*.log",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}
fn default_github_token_env() -> String {
    "GITHUB_TOKEN".into()
}
fn default_github_api_url() -> String {
    "https://api.github.com".into()
}
fn default_github_raw_url() -> String {
    "https://raw.githubusercontent.com".into()
}

/// `[render]` section: external diagram converter and document exporter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Mermaid CLI command.
    #[serde(default = "default_mermaid_cmd")]
    pub mermaid_cmd: String,

    /// Markdown to PDF command.
    #[serde(default = "default_pdf_cmd")]
    pub pdf_cmd: String,

    /// Timeout for a single render invocation.
    #[serde(default = "default_render_timeout")]
    pub timeout_secs: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            mermaid_cmd: default_mermaid_cmd(),
            pdf_cmd: default_pdf_cmd(),
            timeout_secs: default_render_timeout(),
        }
    }
}

fn default_mermaid_cmd() -> String {
    "mmdc".into()
}
fn default_pdf_cmd() -> String {
    "md-to-pdf".into()
}
fn default_render_timeout() -> u64 {
    120
}

// ---------------------------------------------------------------------------
// Crawl config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime crawl configuration, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Path include glob patterns.
    pub include_patterns: Vec<String>,
    /// Path exclude glob patterns.
    pub exclude_patterns: Vec<String>,
    /// Per-file size ceiling in bytes.
    pub max_file_size: u64,
    /// GitHub access token.
    pub token: Option<String>,
    /// Maximum concurrent blob downloads.
    pub concurrency: usize,
    pub github_api_url: String,
    pub github_raw_url: String,
}

impl From<&AppConfig> for CrawlConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            include_patterns: config.crawl.include_patterns.clone(),
            exclude_patterns: config.crawl.exclude_patterns.clone(),
            max_file_size: config.crawl.max_file_size,
            token: github_token(config),
            concurrency: config.defaults.concurrency.max(1),
            github_api_url: config.crawl.github_api_url.clone(),
            github_raw_url: config.crawl.github_raw_url.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.repotutor/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| RepoTutorError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.repotutor/repotutor.toml`).
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

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| RepoTutorError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| RepoTutorError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| RepoTutorError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| RepoTutorError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| RepoTutorError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

/// Read the OpenRouter API key from the configured env var.
pub fn api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.openrouter.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(RepoTutorError::config(format!(
            "OpenRouter API key not found. Set the {var_name} environment variable.\n\
             Get a key at https://openrouter.ai/keys"
        ))),
    }
}

/// Read the GitHub token from the configured env var, if set.
pub fn github_token(config: &AppConfig) -> Option<String> {
    std::env::var(&config.crawl.github_token_env)
        .ok()
        .filter(|t| !t.is_empty())
}
