//! Application configuration for the openness crawler.
//!
//! User config lives at `~/.openness/openness.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{OpennessError, Result};
use crate::retry::RetryPolicy;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "openness.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".openness";

/// User agent sent with every crawl and evaluator request.
pub const USER_AGENT: &str = concat!("openness-crawler/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Config structs (matching openness.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub crawl: CrawlSection,

    #[serde(default)]
    pub run: RunSection,

    /// OpenAI-compatible evaluator settings.
    #[serde(default)]
    pub llm: LlmSection,

    #[serde(default)]
    pub evaluation: EvaluationSection,

    /// Backoff applied to both fetch and evaluator retries.
    #[serde(default)]
    pub backoff: BackoffSection,

    #[serde(default)]
    pub roster: RosterSection,
}

/// `[crawl]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSection {
    /// Maximum link depth from the base URL (0 = base page only).
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Maximum pages fetched per organization.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries per page after the first attempt.
    #[serde(default = "default_fetch_retries")]
    pub max_retries: u32,

    /// Concurrent page fetches within one organization.
    #[serde(default = "default_page_concurrency")]
    pub page_concurrency: usize,

    #[serde(default = "default_true")]
    pub respect_robots_txt: bool,

    /// Minimum ms to wait before each request.
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    /// Allow crawling loopback and private-network hosts.
    #[serde(default)]
    pub allow_private_hosts: bool,
}

impl Default for CrawlSection {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_pages: default_max_pages(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_fetch_retries(),
            page_concurrency: default_page_concurrency(),
            respect_robots_txt: true,
            request_delay_ms: default_request_delay_ms(),
            allow_private_hosts: false,
        }
    }
}

fn default_max_depth() -> u32 {
    2
}
fn default_max_pages() -> usize {
    10
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_fetch_retries() -> u32 {
    2
}
fn default_page_concurrency() -> usize {
    3
}
fn default_true() -> bool {
    true
}
fn default_request_delay_ms() -> u64 {
    250
}

/// `[run]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSection {
    /// Organizations processed concurrently.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Directory receiving the CSV and JSON exports.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            output_dir: default_output_dir(),
        }
    }
}

fn default_parallelism() -> usize {
    3
}
fn default_output_dir() -> String {
    "results".into()
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSection {
    /// Base URL of the OpenAI-compatible API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Env var that, when set, overrides `base_url`.
    #[serde(default = "default_base_url_env")]
    pub base_url_env: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,

    /// Concurrent evaluator calls across the whole run.
    #[serde(default = "default_llm_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    /// Retries per evaluator call after the first attempt.
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            base_url_env: default_base_url_env(),
            api_key_env: default_api_key_env(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout_secs(),
            concurrency: default_llm_concurrency(),
            requests_per_minute: default_requests_per_minute(),
            max_retries: default_llm_retries(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_base_url_env() -> String {
    "OPENAI_BASE_URL".into()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_model() -> String {
    "gpt-4.1-mini".into()
}
fn default_temperature() -> f64 {
    0.3
}
fn default_max_tokens() -> u32 {
    500
}
fn default_llm_timeout_secs() -> u64 {
    30
}
fn default_llm_concurrency() -> usize {
    2
}
fn default_requests_per_minute() -> u32 {
    60
}
fn default_llm_retries() -> u32 {
    3
}

/// `[evaluation]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationSection {
    /// Results below this confidence are flagged for manual review.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,

    /// Evidence snippets sent to the evaluator per criterion.
    #[serde(default = "default_max_evidence")]
    pub max_evidence: usize,
}

impl Default for EvaluationSection {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            max_evidence: default_max_evidence(),
        }
    }
}

fn default_confidence_threshold() -> f64 {
    0.5
}
fn default_max_evidence() -> usize {
    3
}

/// `[backoff]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffSection {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for BackoffSection {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_base_delay_ms() -> u64 {
    500
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_max_delay_ms() -> u64 {
    8_000
}

/// `[roster]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterSection {
    /// Single-character CSV delimiter, also used for exports.
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
}

impl Default for RosterSection {
    fn default() -> Self {
        Self {
            delimiter: default_delimiter(),
        }
    }
}

fn default_delimiter() -> String {
    ";".into()
}

// ---------------------------------------------------------------------------
// Run config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime crawl configuration for one organization's traversal.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub max_depth: u32,
    pub max_pages: usize,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub page_concurrency: usize,
    pub respect_robots_txt: bool,
    pub request_delay: Duration,
    pub allow_private_hosts: bool,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for CrawlConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_depth: config.crawl.max_depth,
            max_pages: config.crawl.max_pages,
            timeout: Duration::from_secs(config.crawl.timeout_secs),
            retry: RetryPolicy::from(&config.backoff).with_max_retries(config.crawl.max_retries),
            page_concurrency: config.crawl.page_concurrency,
            respect_robots_txt: config.crawl.respect_robots_txt,
            request_delay: Duration::from_millis(config.crawl.request_delay_ms),
            allow_private_hosts: config.crawl.allow_private_hosts,
        }
    }
}

/// Runtime evaluator configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub base_url_env: String,
    pub api_key_env: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout: Duration,
    pub concurrency: usize,
    pub requests_per_minute: u32,
    pub retry: RetryPolicy,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for LlmConfig {
    fn from(config: &AppConfig) -> Self {
        let llm = &config.llm;
        Self {
            base_url: llm.base_url.clone(),
            base_url_env: llm.base_url_env.clone(),
            api_key_env: llm.api_key_env.clone(),
            model: llm.model.clone(),
            temperature: llm.temperature,
            max_tokens: llm.max_tokens,
            timeout: Duration::from_secs(llm.timeout_secs),
            concurrency: llm.concurrency,
            requests_per_minute: llm.requests_per_minute,
            retry: RetryPolicy::from(&config.backoff).with_max_retries(llm.max_retries),
        }
    }
}

impl LlmConfig {
    /// Base URL, taking the override env var into account.
    pub fn resolved_base_url(&self) -> String {
        match std::env::var(&self.base_url_env) {
            Ok(val) if !val.trim().is_empty() => val.trim().trim_end_matches('/').to_string(),
            _ => self.base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl From<&BackoffSection> for RetryPolicy {
    fn from(section: &BackoffSection) -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::from_millis(section.base_delay_ms),
            multiplier: section.multiplier,
            max_delay: Duration::from_millis(section.max_delay_ms),
        }
    }
}

/// Fully merged configuration for one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub crawl: CrawlConfig,
    pub llm: LlmConfig,
    pub parallelism: usize,
    pub confidence_threshold: f64,
    pub max_evidence: usize,
    pub delimiter: String,
    pub output_dir: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for RunConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            crawl: CrawlConfig::from(config),
            llm: LlmConfig::from(config),
            parallelism: config.run.parallelism,
            confidence_threshold: config.evaluation.confidence_threshold,
            max_evidence: config.evaluation.max_evidence,
            delimiter: config.roster.delimiter.clone(),
            output_dir: PathBuf::from(&config.run.output_dir),
        }
    }
}

impl RunConfig {
    /// Reject parameter combinations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let crawl = &self.crawl;
        if crawl.max_pages == 0 {
            return Err(OpennessError::config("crawl.max_pages must be at least 1"));
        }
        if crawl.page_concurrency == 0 {
            return Err(OpennessError::config("crawl.page_concurrency must be at least 1"));
        }
        if crawl.timeout.is_zero() {
            return Err(OpennessError::config("crawl.timeout_secs must be positive"));
        }
        if self.parallelism == 0 {
            return Err(OpennessError::config("run.parallelism must be at least 1"));
        }
        if self.llm.concurrency == 0 {
            return Err(OpennessError::config("llm.concurrency must be at least 1"));
        }
        if self.llm.requests_per_minute == 0 {
            return Err(OpennessError::config("llm.requests_per_minute must be at least 1"));
        }
        if self.llm.timeout.is_zero() {
            return Err(OpennessError::config("llm.timeout_secs must be positive"));
        }
        if !self.llm.temperature.is_finite() || self.llm.temperature < 0.0 {
            return Err(OpennessError::config("llm.temperature must be a non-negative number"));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(OpennessError::config(format!(
                "evaluation.confidence_threshold must be within [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        if self.max_evidence == 0 {
            return Err(OpennessError::config("evaluation.max_evidence must be at least 1"));
        }

        for (name, policy) in [("crawl", &crawl.retry), ("llm", &self.llm.retry)] {
            if !policy.multiplier.is_finite() || policy.multiplier < 1.0 {
                return Err(OpennessError::config(format!(
                    "backoff.multiplier must be >= 1.0 ({name} retries)"
                )));
            }
            if policy.base_delay > policy.max_delay {
                return Err(OpennessError::config(
                    "backoff.base_delay_ms must not exceed backoff.max_delay_ms",
                ));
            }
        }

        self.delimiter_byte().map(|_| ())
    }

    /// The roster delimiter as the single byte the CSV reader expects.
    pub fn delimiter_byte(&self) -> Result<u8> {
        parse_delimiter(&self.delimiter)
    }
}

/// Parse a single-character ASCII delimiter.
pub fn parse_delimiter(raw: &str) -> Result<u8> {
    let value = if raw == "\\t" { "\t" } else { raw };
    match value.as_bytes() {
        [b] if b.is_ascii() && *b != b'"' && *b != b'\n' && *b != b'\r' => Ok(*b),
        _ => Err(OpennessError::config(format!(
            "roster.delimiter must be a single ASCII character, got {raw:?}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.openness/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| OpennessError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.openness/openness.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| OpennessError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| OpennessError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| OpennessError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| OpennessError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| OpennessError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the evaluator API key from the configured env var.
pub fn validate_api_key(config: &LlmConfig) -> Result<String> {
    let var_name = &config.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val.trim().to_string()),
        _ => Err(OpennessError::config(format!(
            "evaluator API key not found. Set the {var_name} environment variable."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("max_pages"));
        assert!(toml_str.contains("OPENAI_API_KEY"));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let toml_str = r#"
[crawl]
max_depth = 0

[roster]
delimiter = ","
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.crawl.max_depth, 0);
        assert_eq!(config.crawl.max_pages, 10);
        assert_eq!(config.roster.delimiter, ",");
        assert_eq!(config.llm.model, "gpt-4.1-mini");
    }

    #[test]
    fn negative_depth_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("openness.toml");
        std::fs::write(&path, "[crawl]\nmax_depth = -1\n").expect("write");

        let err = load_config_from(&path).unwrap_err();
        assert!(matches!(err, OpennessError::Config { .. }));
    }

    #[test]
    fn run_config_from_app_config() {
        let run = RunConfig::from(&AppConfig::default());
        assert_eq!(run.crawl.max_depth, 2);
        assert_eq!(run.crawl.retry.max_retries, 2);
        assert_eq!(run.llm.retry.max_retries, 3);
        assert_eq!(run.crawl.retry.base_delay, Duration::from_millis(500));
        assert_eq!(run.delimiter_byte().expect("delimiter"), b';');
        run.validate().expect("defaults are valid");
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut run = RunConfig::default();
        run.crawl.max_pages = 0;
        assert!(run.validate().is_err());

        let mut run = RunConfig::default();
        run.confidence_threshold = 1.5;
        assert!(run.validate().is_err());

        let mut run = RunConfig::default();
        run.parallelism = 0;
        assert!(run.validate().is_err());

        let mut run = RunConfig::default();
        run.delimiter = ";;".into();
        assert!(run.validate().is_err());

        let mut run = RunConfig::default();
        run.crawl.retry.multiplier = 0.5;
        assert!(run.validate().is_err());
    }

    #[test]
    fn tab_delimiter_escape() {
        assert_eq!(parse_delimiter("\\t").expect("tab"), b'\t');
        assert!(parse_delimiter("").is_err());
    }

    #[test]
    fn api_key_validation() {
        let mut config = LlmConfig::default();
        config.api_key_env = "OPENNESS_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }
}
