//! `config` subcommands.

use std::time::Duration;

use colored::Colorize;
use serde::Serialize;

use super::args::ConfigCommand;
use super::{Output, emit};
use crate::error::Result;
use crate::render::robot;
use crate::storage::config::{CacheConfig, ConfigSource, ConfigSources, ResolvedConfig, RetryConfig};
use crate::util::format_duration;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfigView<'a> {
    config_path: String,
    base_url: &'a str,
    timeout_seconds: u64,
    cache_db: String,
    use_keyring: bool,
    cache: &'a CacheConfig,
    retry: &'a RetryConfig,
    sources: &'a ConfigSources,
}

/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn execute(cmd: &ConfigCommand, config: &ResolvedConfig, output: Output) -> Result<()> {
    match cmd {
        ConfigCommand::Path => emit(&config.config_path.display().to_string()),
        ConfigCommand::Show => {
            let view = ConfigView {
                config_path: config.config_path.display().to_string(),
                base_url: &config.base_url,
                timeout_seconds: config.timeout.as_secs(),
                cache_db: config.cache_db.display().to_string(),
                use_keyring: config.use_keyring,
                cache: &config.config.cache,
                retry: &config.config.retry,
                sources: &config.sources,
            };
            if output.is_json() {
                emit(&robot::render(&view, output.pretty)?);
            } else {
                emit(&render_human(config, output.no_color));
            }
        }
    }
    Ok(())
}

fn render_human(config: &ResolvedConfig, no_color: bool) -> String {
    let row = |name: &str, value: String, source: Option<ConfigSource>| {
        let name = format!("{name:<22}");
        let name = if no_color { name } else { name.bold().to_string() };
        match source {
            Some(source) => format!("{name}{value}  ({source})"),
            None => format!("{name}{value}"),
        }
    };
    let cache = &config.config.cache;
    let token_storage = if config.use_keyring {
        "keyring".to_string()
    } else {
        config.session_file.display().to_string()
    };
    [
        row("config file", config.config_path.display().to_string(), None),
        row("base_url", config.base_url.clone(), Some(config.sources.base_url)),
        row("timeout", format!("{}s", config.timeout.as_secs()), Some(config.sources.timeout)),
        row("cache db", config.cache_db.display().to_string(), Some(config.sources.cache_db)),
        row("default ttl", format_duration(Duration::from_secs(cache.default_ttl_minutes * 60)), None),
        row("cooldown", format_duration(Duration::from_millis(cache.cooldown_ms)), None),
        row("cooldown stale factor", cache.cooldown_stale_factor.to_string(), None),
        row("revalidation delay", format_duration(Duration::from_millis(cache.revalidation_delay_ms)), None),
        row("token storage", token_storage, None),
    ]
    .join("\n")
}
