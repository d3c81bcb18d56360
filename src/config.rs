//! TOML configuration.
//!
//! Every section except `[db]` is optional and falls back to defaults.
//!
//! ```toml
//! [db]
//! path = "./data/finsight.sqlite"
//!
//! [server]
//! bind = "127.0.0.1:8000"
//! cors_origins = ["http://localhost:3000"]
//!
//! [fetch]
//! timeout_secs = 20
//!
//! [dispatcher]
//! workers = 4
//!
//! [scheduler]
//! scan_interval_secs = 30
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use finsight_core::retry::RetryPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub youtube: YouTubeConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            cors_origins: default_cors_origins(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}
fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:3000".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// When set, local PDF paths must resolve inside this directory.
    #[serde(default)]
    pub pdf_root: Option<PathBuf>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout_secs(),
            max_redirects: default_max_redirects(),
            user_agent: default_user_agent(),
            max_body_bytes: default_max_body_bytes(),
            pdf_root: None,
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_fetch_timeout_secs() -> u64 {
    20
}
fn default_max_redirects() -> usize {
    5
}
fn default_user_agent() -> String {
    format!("finsight/{}", env!("CARGO_PKG_VERSION"))
}
fn default_max_body_bytes() -> usize {
    20 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct YouTubeConfig {
    #[serde(default = "default_timedtext_url")]
    pub timedtext_url: String,
    #[serde(default = "default_language")]
    pub language: String,
}

impl Default for YouTubeConfig {
    fn default() -> Self {
        Self {
            timedtext_url: default_timedtext_url(),
            language: default_language(),
        }
    }
}

fn default_timedtext_url() -> String {
    "https://www.youtube.com/api/timedtext".to_string()
}
fn default_language() -> String {
    "en".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_cap_secs")]
    pub backoff_cap_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_secs: default_backoff_cap_secs(),
        }
    }
}

impl PipelineConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_secs(self.backoff_cap_secs),
        )
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_backoff_cap_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct DispatcherConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_admission_timeout_ms")]
    pub admission_timeout_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            workers: default_workers(),
            admission_timeout_ms: default_admission_timeout_ms(),
        }
    }
}

impl DispatcherConfig {
    pub fn admission_timeout(&self) -> Duration {
        Duration::from_millis(self.admission_timeout_ms)
    }
}

fn default_queue_capacity() -> usize {
    256
}
fn default_workers() -> usize {
    4
}
fn default_admission_timeout_ms() -> u64 {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
    /// Overrides the derived claim lifetime.
    #[serde(default)]
    pub claim_ttl_secs: Option<u64>,
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scan_interval_secs: default_scan_interval_secs(),
            claim_ttl_secs: None,
            batch_limit: default_batch_limit(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_scan_interval_secs() -> u64 {
    30
}
fn default_batch_limit() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl Config {
    /// Defaults with an in-working-directory database. Used when no config
    /// file is present and by tests.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/finsight.sqlite"),
            },
            server: ServerConfig::default(),
            fetch: FetchConfig::default(),
            youtube: YouTubeConfig::default(),
            pipeline: PipelineConfig::default(),
            dispatcher: DispatcherConfig::default(),
            scheduler: SchedulerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Lifetime of a schedule claim between renewals: every fetch attempt
    /// timing out plus the full backoff budget, plus one scan interval.
    /// The engine renews claims while their re-check is queued or running.
    pub fn claim_ttl(&self) -> Duration {
        if let Some(secs) = self.scheduler.claim_ttl_secs {
            return Duration::from_secs(secs);
        }
        let policy = self.pipeline.retry_policy();
        let attempts = self.pipeline.max_retries + 1;
        let fetching = self.fetch.timeout() * attempts;
        let backoff: Duration = (0..self.pipeline.max_retries)
            .map(|r| policy.delay_for(r))
            .sum();
        fetching + backoff + Duration::from_secs(self.scheduler.scan_interval_secs)
    }
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

fn validate(config: &Config) -> Result<()> {
    if config.dispatcher.workers == 0 {
        anyhow::bail!("dispatcher.workers must be > 0");
    }
    if config.dispatcher.queue_capacity == 0 {
        anyhow::bail!("dispatcher.queue_capacity must be > 0");
    }
    if config.fetch.timeout_secs == 0 {
        anyhow::bail!("fetch.timeout_secs must be > 0");
    }
    if config.scheduler.scan_interval_secs == 0 {
        anyhow::bail!("scheduler.scan_interval_secs must be > 0");
    }
    if config.scheduler.batch_limit == 0 {
        anyhow::bail!("scheduler.batch_limit must be > 0");
    }
    if config.pipeline.backoff_base_ms == 0 {
        anyhow::bail!("pipeline.backoff_base_ms must be > 0");
    }
    if config.youtube.language.trim().is_empty() {
        anyhow::bail!("youtube.language must not be empty");
    }
    for origin in &config.server.cors_origins {
        if origin != "*" && url::Url::parse(origin).is_err() {
            anyhow::bail!("server.cors_origins contains an invalid origin: '{}'", origin);
        }
    }
    Ok(())
}
