//! Output rendering for human and JSON modes.

pub mod error;
pub mod human;
pub mod robot;

use serde::Serialize;
use serde_json::Value;

use crate::cli::args::OutputFormat;
use crate::error::Result;
use crate::storage::store::CacheStats;

pub use human::AuthStatus;

/// Render an API response body.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn render_value(value: &Value, format: OutputFormat, pretty: bool, no_color: bool) -> Result<String> {
    match format {
        OutputFormat::Human => Ok(human::render_value(value, no_color)),
        OutputFormat::Json => robot::render(value, pretty),
    }
}

/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn render_cache_stats(
    stats: &CacheStats,
    format: OutputFormat,
    pretty: bool,
    no_color: bool,
) -> Result<String> {
    match format {
        OutputFormat::Human => Ok(human::render_cache_stats(stats, no_color)),
        OutputFormat::Json => robot::render(stats, pretty),
    }
}

/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn render_auth_status(
    status: &AuthStatus,
    format: OutputFormat,
    pretty: bool,
    no_color: bool,
) -> Result<String> {
    match format {
        OutputFormat::Human => Ok(human::render_auth_status(status, no_color)),
        OutputFormat::Json => robot::render(status, pretty),
    }
}

/// Render a one-line outcome, or `payload` in JSON mode.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn render_notice<T: Serialize>(
    message: &str,
    payload: &T,
    format: OutputFormat,
    pretty: bool,
    no_color: bool,
) -> Result<String> {
    match format {
        OutputFormat::Human => Ok(human::render_notice(message, no_color)),
        OutputFormat::Json => robot::render(payload, pretty),
    }
}
