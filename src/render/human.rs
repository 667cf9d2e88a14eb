//! Human-readable terminal output.

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;
use serde_json::Value;

use crate::storage::store::CacheStats;
use crate::util::{format_bytes, format_expiry, format_relative_time};

/// What `auth status` reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStatus {
    pub signed_in: bool,
    /// Short hash of the stored token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<Value>,
    /// Where the token is kept (`keyring` or a file path).
    pub storage: String,
}

fn paint(text: &str, no_color: bool, style: impl FnOnce(&str) -> colored::ColoredString) -> String {
    if no_color {
        text.to_string()
    } else {
        style(text).to_string()
    }
}

/// Pretty JSON, with object keys highlighted at the top level.
#[must_use]
pub fn render_value(value: &Value, no_color: bool) -> String {
    let pretty = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    if no_color {
        return pretty;
    }
    pretty
        .lines()
        .map(|line| {
            let trimmed = line.trim_start();
            let indent = &line[..line.len() - trimmed.len()];
            match trimmed.split_once("\": ") {
                Some((key, rest)) if trimmed.starts_with('"') => {
                    format!("{indent}{}\": {rest}", key.cyan())
                }
                _ => line.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[must_use]
pub fn render_cache_stats(stats: &CacheStats, no_color: bool) -> String {
    let now = Utc::now();
    let label = |text: &str| paint(text, no_color, |t| t.bold());
    let mut lines = vec![
        format!("{} {}", label("Entries:"), stats.total_entries),
        format!(
            "{} {}",
            label("Fresh:  "),
            paint(&stats.fresh_entries.to_string(), no_color, |t| t.green())
        ),
        format!(
            "{} {}",
            label("Expired:"),
            paint(&stats.expired_entries.to_string(), no_color, |t| t.yellow())
        ),
        format!("{} {}", label("Size:   "), format_bytes(stats.total_bytes)),
    ];
    if let Some(oldest) = stats.oldest_written_at {
        lines.push(format!("{} {}", label("Oldest: "), format_relative_time(oldest, now)));
    }
    if let Some(newest) = stats.newest_written_at {
        lines.push(format!("{} {}", label("Newest: "), format_relative_time(newest, now)));
    }
    lines.join("\n")
}

#[must_use]
pub fn render_auth_status(status: &AuthStatus, no_color: bool) -> String {
    if !status.signed_in {
        return format!(
            "{} (token storage: {})",
            paint("Not signed in", no_color, |t| t.yellow()),
            status.storage
        );
    }

    let now = Utc::now();
    let mut lines = vec![format!(
        "{} (token storage: {})",
        paint("Signed in", no_color, |t| t.green()),
        status.storage
    )];
    if let Some(fingerprint) = &status.fingerprint {
        lines.push(format!("  token   {fingerprint}"));
    }
    match status.expires_at {
        Some(expires_at) if expires_at <= now => lines.push(format!(
            "  expiry  {}",
            paint(&format_expiry(expires_at, now), no_color, |t| t.red())
        )),
        Some(expires_at) => lines.push(format!("  expiry  {}", format_expiry(expires_at, now))),
        None => lines.push("  expiry  unknown".to_string()),
    }
    if let Some(user) = &status.user {
        let name = ["name", "email", "id"]
            .iter()
            .find_map(|field| user.get(*field).and_then(Value::as_str));
        if let Some(name) = name {
            lines.push(format!("  user    {name}"));
        }
    }
    lines.join("\n")
}

#[must_use]
pub fn render_notice(message: &str, no_color: bool) -> String {
    format!("{} {message}", paint("✓", no_color, |t| t.green()))
}
