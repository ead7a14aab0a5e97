//! Application configuration for lineage.
//!
//! User config lives at `~/.lineage/lineage.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{LineageError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "lineage.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".lineage";

// ---------------------------------------------------------------------------
// Config structs (matching lineage.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Extraction producer settings.
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Per-stage time budgets.
    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    /// Citation ranking policy.
    #[serde(default)]
    pub ranking: RankingConfig,

    /// Paper source.
    #[serde(default)]
    pub ingest: IngestConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Where rendered notes are written.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Where the recursion state file and database live.
    #[serde(default = "default_state_dir")]
    pub state_dir: String,

    /// Maximum recursion depth (inclusive).
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Maximum foundational citations followed per paper.
    #[serde(default = "default_max_citations")]
    pub max_citations: usize,

    /// Papers of the same depth processed concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            state_dir: default_state_dir(),
            max_depth: default_max_depth(),
            max_citations: default_max_citations(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_output_dir() -> String {
    "./output".into()
}
fn default_state_dir() -> String {
    "./data".into()
}
fn default_max_depth() -> u32 {
    3
}
fn default_max_citations() -> usize {
    5
}
fn default_concurrency() -> usize {
    4
}

/// `[extraction]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Bridge command (e.g., "bun").
    #[serde(default = "default_bridge_cmd")]
    pub bridge_cmd: String,

    /// Bridge script passed to `<bridge_cmd> run`.
    #[serde(default = "default_bridge_script")]
    pub bridge_script: String,

    /// Working directory for the bridge subprocess (defaults to cwd).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    /// Model identifier forwarded to the bridge and used as cache key.
    #[serde(default = "default_model")]
    pub model: String,

    /// Extra Extract attempts after a validation failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            bridge_cmd: default_bridge_cmd(),
            bridge_script: default_bridge_script(),
            working_dir: None,
            model: default_model(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_bridge_cmd() -> String {
    "bun".into()
}
fn default_bridge_script() -> String {
    "bridge/extract.ts".into()
}
fn default_model() -> String {
    "gpt-4o".into()
}
fn default_max_retries() -> u32 {
    2
}

/// `[timeouts]` section (seconds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_ingest_secs")]
    pub ingest_secs: u64,
    #[serde(default = "default_extract_secs")]
    pub extract_secs: u64,
    #[serde(default = "default_render_secs")]
    pub render_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            ingest_secs: default_ingest_secs(),
            extract_secs: default_extract_secs(),
            render_secs: default_render_secs(),
        }
    }
}

fn default_ingest_secs() -> u64 {
    60
}
fn default_extract_secs() -> u64 {
    300
}
fn default_render_secs() -> u64 {
    30
}

/// How "foundational-ness" of a citation is scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RankingPolicyKind {
    /// Older relative to the citing paper ranks higher.
    Age,
    /// More-cited ranks higher.
    Influence,
    /// Mean of the age and influence signals.
    Blend,
}

/// `[ranking]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    #[serde(default = "default_policy")]
    pub policy: RankingPolicyKind,

    /// Weight of the age signal.
    #[serde(default = "default_signal_weight")]
    pub age_weight: f64,

    /// Age (years before the citing paper) at which the age signal saturates.
    #[serde(default = "default_age_horizon")]
    pub age_horizon_years: u32,

    /// Weight of the influence signal.
    #[serde(default = "default_signal_weight")]
    pub influence_weight: f64,

    /// Citation count at which the influence signal saturates.
    #[serde(default = "default_influence_cap")]
    pub influence_cap: u64,

    /// Bonus for citations whose identity was resolved from a DOI.
    #[serde(default = "default_doi_bonus")]
    pub doi_bonus: f64,

    /// Bonus for citations carrying a title.
    #[serde(default = "default_metadata_bonus")]
    pub metadata_bonus: f64,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            policy: default_policy(),
            age_weight: default_signal_weight(),
            age_horizon_years: default_age_horizon(),
            influence_weight: default_signal_weight(),
            influence_cap: default_influence_cap(),
            doi_bonus: default_doi_bonus(),
            metadata_bonus: default_metadata_bonus(),
        }
    }
}

fn default_policy() -> RankingPolicyKind {
    RankingPolicyKind::Age
}
fn default_signal_weight() -> f64 {
    3.0
}
fn default_age_horizon() -> u32 {
    50
}
fn default_influence_cap() -> u64 {
    10_000
}
fn default_doi_bonus() -> f64 {
    1.0
}
fn default_metadata_bonus() -> f64 {
    0.25
}

/// Where papers are ingested from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IngestSource {
    SemanticScholar,
    Local,
}

/// `[ingest]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_ingest_source")]
    pub source: IngestSource,

    /// Directory of `<file_stem>.json` papers for the local source.
    #[serde(default = "default_corpus_dir")]
    pub corpus_dir: String,

    /// Semantic Scholar API base URL.
    #[serde(default = "default_semantic_scholar_url")]
    pub semantic_scholar_url: String,

    /// Name of the env var holding the Semantic Scholar API key (optional).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            source: default_ingest_source(),
            corpus_dir: default_corpus_dir(),
            semantic_scholar_url: default_semantic_scholar_url(),
            api_key_env: default_api_key_env(),
        }
    }
}

fn default_ingest_source() -> IngestSource {
    IngestSource::SemanticScholar
}
fn default_corpus_dir() -> String {
    "./corpus".into()
}
fn default_semantic_scholar_url() -> String {
    "https://api.semanticscholar.org".into()
}
fn default_api_key_env() -> String {
    "S2_API_KEY".into()
}

// ---------------------------------------------------------------------------
// Run limits (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Bounds of a single run, merged from config file + CLI flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLimits {
    /// Inclusive maximum depth.
    pub max_depth: u32,
    /// Foundational citations followed per paper.
    pub max_citations: usize,
    /// Worker pool size for one depth.
    pub concurrency: usize,
}

impl From<&AppConfig> for RunLimits {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_depth: config.defaults.max_depth,
            max_citations: config.defaults.max_citations,
            concurrency: config.defaults.concurrency.max(1),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.lineage/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| LineageError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.lineage/lineage.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| LineageError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| LineageError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| LineageError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| LineageError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| LineageError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the optional Semantic Scholar API key named by the config.
pub fn semantic_scholar_api_key(config: &AppConfig) -> Option<String> {
    std::env::var(&config.ingest.api_key_env)
        .ok()
        .filter(|v| !v.is_empty())
}
