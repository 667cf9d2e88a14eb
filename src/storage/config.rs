//! Configuration file loading and management.
//!
//! Loads configuration from `<config dir>/edugate/config.toml`
//! (overridable with `EDUGATE_CONFIG`).
//!
//! ## Precedence
//!
//! Settings are resolved with the following precedence (highest first):
//! 1. CLI flags
//! 2. Environment variables
//! 3. Config file
//! 4. Built-in defaults
//!
//! ## Environment Variables
//!
//! - `EDUGATE_BASE_URL`: API base URL
//! - `EDUGATE_TIMEOUT`: Request timeout in seconds
//! - `EDUGATE_CACHE_DB`: Path of the SQLite cache database
//! - `EDUGATE_FORMAT`: Output format (human, json)
//! - `EDUGATE_NO_COLOR` or `NO_COLOR`: Disable colors
//! - `EDUGATE_PRETTY`: Pretty-print JSON output (1, true, yes)
//! - `EDUGATE_VERBOSE`: Enable verbose output (1, true, yes)
//! - `EDUGATE_CONFIG`: Override config file path

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::AppPaths;
use super::store::DEFAULT_RETENTION_FACTOR;
use crate::cli::args::{Cli, OutputFormat};
use crate::core::client::{
    ClientSettings, DEFAULT_BASE_URL, DEFAULT_COOLDOWN_STALE_FACTOR, DEFAULT_REFRESH_PATH,
};
use crate::core::http::{RetryPolicy, default_user_agent};
use crate::error::{ClientError, Result};

// =============================================================================
// Environment Variable Names
// =============================================================================

pub const ENV_BASE_URL: &str = "EDUGATE_BASE_URL";
pub const ENV_TIMEOUT: &str = "EDUGATE_TIMEOUT";
pub const ENV_CACHE_DB: &str = "EDUGATE_CACHE_DB";
pub const ENV_FORMAT: &str = "EDUGATE_FORMAT";
pub const ENV_NO_COLOR: &str = "EDUGATE_NO_COLOR";
/// Standard environment variable to disable colors.
pub const ENV_NO_COLOR_STD: &str = "NO_COLOR";
pub const ENV_PRETTY: &str = "EDUGATE_PRETTY";
pub const ENV_VERBOSE: &str = "EDUGATE_VERBOSE";
pub const ENV_CONFIG: &str = "EDUGATE_CONFIG";

const MAX_TIMEOUT_SECONDS: u64 = 300;

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Fully resolved configuration after merging CLI, env vars, and config file.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub format: OutputFormat,
    pub no_color: bool,
    pub pretty: bool,
    pub verbose: bool,
    /// SQLite cache database.
    pub cache_db: PathBuf,
    pub use_keyring: bool,
    /// Where the session file lives when the keyring is not used.
    pub session_file: PathBuf,
    /// The file-level settings the rest was resolved against.
    pub config: Config,
    pub config_path: PathBuf,
    /// Source of each setting for debugging.
    pub sources: ConfigSources,
}

/// Tracks the source of each configuration value.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSources {
    pub base_url: ConfigSource,
    pub timeout: ConfigSource,
    pub format: ConfigSource,
    pub no_color: ConfigSource,
    pub pretty: ConfigSource,
    pub verbose: ConfigSource,
    pub cache_db: ConfigSource,
}

/// Where a configuration value came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigSource {
    Cli,
    Env,
    ConfigFile,
    #[default]
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI flag"),
            Self::Env => write!(f, "environment variable"),
            Self::ConfigFile => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

impl ResolvedConfig {
    /// Resolve final configuration from CLI args, the process environment,
    /// and the config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but is invalid, or if any
    /// resolved value is invalid.
    pub fn resolve(cli: &Cli) -> Result<Self> {
        let env = |key: &str| std::env::var(key).ok();
        let paths = AppPaths::new();
        let config_path = env(ENV_CONFIG).map_or_else(|| paths.config_file(), PathBuf::from);
        let config = Config::load_from(&config_path)?;
        Self::resolve_with(cli, config, config_path, &paths, env)
    }

    /// Resolve against an explicit config, paths and environment lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] if a value is invalid.
    pub fn resolve_with(
        cli: &Cli,
        config: Config,
        config_path: PathBuf,
        paths: &AppPaths,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        config.validate()?;
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());
        let truthy = |key: &str| env(key).is_some_and(|v| is_truthy(&v));

        let mut sources = ConfigSources::default();

        let base_url = if let Some(url) = &cli.base_url {
            sources.base_url = ConfigSource::Cli;
            url.clone()
        } else if let Some(url) = env(ENV_BASE_URL) {
            sources.base_url = ConfigSource::Env;
            url
        } else {
            sources.base_url = source_if(config.api.base_url != DEFAULT_BASE_URL);
            config.api.base_url.clone()
        };

        let timeout = if let Some(secs) = env(ENV_TIMEOUT).and_then(|v| v.trim().parse::<u64>().ok()) {
            sources.timeout = ConfigSource::Env;
            secs
        } else {
            sources.timeout = source_if(config.api.timeout_seconds != ApiConfig::default().timeout_seconds);
            config.api.timeout_seconds
        };
        if timeout == 0 || timeout > MAX_TIMEOUT_SECONDS {
            return Err(ClientError::Config(format!(
                "Timeout must be between 1 and {MAX_TIMEOUT_SECONDS} seconds"
            )));
        }

        let format = if cli.json {
            sources.format = ConfigSource::Cli;
            OutputFormat::Json
        } else if let Some(format) = cli.format {
            sources.format = ConfigSource::Cli;
            format
        } else if let Some(format) = env(ENV_FORMAT) {
            sources.format = ConfigSource::Env;
            parse_format(&format)?
        } else if let Some(format) = &config.output.format {
            sources.format = ConfigSource::ConfigFile;
            parse_format(format)?
        } else {
            OutputFormat::Human
        };

        let no_color = if cli.no_color {
            sources.no_color = ConfigSource::Cli;
            true
        } else if truthy(ENV_NO_COLOR) || env(ENV_NO_COLOR_STD).is_some() {
            sources.no_color = ConfigSource::Env;
            true
        } else {
            sources.no_color = source_if(!config.output.color);
            !config.output.color
        };

        let pretty = if cli.pretty {
            sources.pretty = ConfigSource::Cli;
            true
        } else if truthy(ENV_PRETTY) {
            sources.pretty = ConfigSource::Env;
            true
        } else {
            sources.pretty = source_if(config.output.pretty);
            config.output.pretty
        };

        let verbose = if cli.verbose > 0 {
            sources.verbose = ConfigSource::Cli;
            true
        } else if truthy(ENV_VERBOSE) {
            sources.verbose = ConfigSource::Env;
            true
        } else {
            false
        };

        let cache_db = if let Some(path) = env(ENV_CACHE_DB) {
            sources.cache_db = ConfigSource::Env;
            PathBuf::from(path)
        } else if let Some(path) = &config.cache.db_path {
            sources.cache_db = ConfigSource::ConfigFile;
            path.clone()
        } else {
            paths.cache_db_file()
        };

        Ok(Self {
            base_url,
            timeout: Duration::from_secs(timeout),
            format,
            no_color,
            pretty,
            verbose,
            cache_db,
            use_keyring: config.session.use_keyring,
            session_file: paths.session_file(),
            config,
            config_path,
            sources,
        })
    }

    /// Settings for the [`ApiClient`](crate::core::client::ApiClient).
    #[must_use]
    pub fn client_settings(&self) -> ClientSettings {
        let cache = &self.config.cache;
        let retry = &self.config.retry;
        ClientSettings {
            base_url: self.base_url.clone(),
            request_timeout: self.timeout,
            default_ttl: Duration::from_secs(cache.default_ttl_minutes * 60),
            cooldown_window: Duration::from_millis(cache.cooldown_ms),
            cooldown_grace: Duration::from_millis(cache.cooldown_grace_ms),
            cooldown_stale_factor: cache.cooldown_stale_factor,
            revalidation_delay: Duration::from_millis(cache.revalidation_delay_ms),
            retry: RetryPolicy {
                max_attempts: retry.max_attempts,
                base_delay: Duration::from_millis(retry.base_delay_ms),
                max_delay: Duration::from_millis(retry.max_delay_ms),
            },
            refresh_path: self.config.api.refresh_path.clone(),
            user_agent: default_user_agent(),
        }
    }
}

const fn source_if(from_file: bool) -> ConfigSource {
    if from_file {
        ConfigSource::ConfigFile
    } else {
        ConfigSource::Default
    }
}

fn parse_format(s: &str) -> Result<OutputFormat> {
    match s.trim().to_lowercase().as_str() {
        "human" => Ok(OutputFormat::Human),
        "json" => Ok(OutputFormat::Json),
        _ => Err(ClientError::Config(format!(
            "Invalid format '{s}'. Valid formats: human, json"
        ))),
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

// =============================================================================
// File configuration
// =============================================================================

/// Application configuration as stored in `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub cache: CacheConfig,
    pub retry: RetryConfig,
    pub session: SessionConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// Request timeout in seconds (1-300).
    pub timeout_seconds: u64,
    /// Path of the token refresh endpoint, relative to `base_url`.
    pub refresh_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub default_ttl_minutes: u64,
    pub cooldown_ms: u64,
    /// How long a cooldown record outlives its window.
    pub cooldown_grace_ms: u64,
    /// Multiplier on the TTL for reads during cooldown. At least 1.
    pub cooldown_stale_factor: f64,
    pub revalidation_delay_ms: u64,
    pub db_path: Option<PathBuf>,
    /// `cache prune` removes entries older than `ttl × retention_factor`.
    pub retention_factor: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Keep the access token in the OS keyring instead of a session file.
    pub use_keyring: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Default output format (human, json).
    pub format: Option<String>,
    pub color: bool,
    pub pretty: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_seconds: 30,
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_minutes: 5,
            cooldown_ms: 1000,
            cooldown_grace_ms: 1000,
            cooldown_stale_factor: DEFAULT_COOLDOWN_STALE_FACTOR,
            revalidation_delay_ms: 100,
            db_path: None,
            retention_factor: DEFAULT_RETENTION_FACTOR,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: u64::try_from(policy.base_delay.as_millis()).unwrap_or(u64::MAX),
            max_delay_ms: u64::try_from(policy.max_delay.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: None,
            color: true,
            pretty: false,
        }
    }
}

impl Config {
    /// Load configuration from the default config file path.
    ///
    /// # Errors
    ///
    /// Returns an error only if the file exists but is invalid.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a specific path.
    ///
    /// Returns the defaults if the file doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConfigParse`] if the file is not valid TOML
    /// for this schema.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(?path, "config file not found, using defaults");
            return Ok(Self::default());
        }

        tracing::debug!(?path, "loading config file");
        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| ClientError::ConfigParse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Save configuration to a specific path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be serialized or written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| ClientError::Config(format!("Failed to serialize config: {e}")))?;

        fs::write(path, content)?;
        tracing::debug!(?path, "config file saved");
        Ok(())
    }

    #[must_use]
    pub fn config_path() -> PathBuf {
        AppPaths::new().config_file()
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] naming the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if reqwest::Url::parse(&self.api.base_url).is_err() {
            return Err(ClientError::Config(format!(
                "Invalid base_url \"{}\"",
                self.api.base_url
            )));
        }

        if self.api.timeout_seconds == 0 || self.api.timeout_seconds > MAX_TIMEOUT_SECONDS {
            return Err(ClientError::Config(format!(
                "Timeout must be between 1 and {MAX_TIMEOUT_SECONDS} seconds"
            )));
        }

        if let Some(format) = &self.output.format {
            parse_format(format)?;
        }

        let cache = &self.cache;
        if !cache.cooldown_stale_factor.is_finite() || cache.cooldown_stale_factor < 1.0 {
            return Err(ClientError::Config(
                "cooldown_stale_factor must be at least 1".to_string(),
            ));
        }
        if !cache.retention_factor.is_finite() || cache.retention_factor < 1.0 {
            return Err(ClientError::Config(
                "retention_factor must be at least 1".to_string(),
            ));
        }
        if cache.default_ttl_minutes == 0 {
            return Err(ClientError::Config(
                "default_ttl_minutes must be positive".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ClientError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
