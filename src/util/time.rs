//! Time formatting.

use chrono::{DateTime, Utc};

fn plural(n: i64) -> &'static str {
    if n == 1 { "" } else { "s" }
}

/// Format `target` relative to `now`, e.g. `3 minutes ago`.
#[must_use]
pub fn format_relative_time(target: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let duration = now.signed_duration_since(target);

    if duration.num_seconds().abs() < 60 {
        return "just now".to_string();
    }

    let minutes = duration.num_minutes().abs();
    let hours = duration.num_hours().abs();
    let days = duration.num_days().abs();

    let suffix = if duration.num_seconds() > 0 {
        "ago"
    } else {
        "from now"
    };

    if days > 0 {
        format!("{days} day{} {suffix}", plural(days))
    } else if hours > 0 {
        format!("{hours} hour{} {suffix}", plural(hours))
    } else {
        format!("{minutes} minute{} {suffix}", plural(minutes))
    }
}

/// Describe a token expiry: `expired 5 minutes ago` or `expires in 2h 3m`.
#[must_use]
pub fn format_expiry(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let remaining = expires_at.signed_duration_since(now);
    if remaining.num_seconds() <= 0 {
        return format!("expired {}", format_relative_time(expires_at, now));
    }

    let hours = remaining.num_hours();
    let minutes = remaining.num_minutes() % 60;
    if hours >= 24 {
        let days = hours / 24;
        format!("expires in {days} day{}", plural(days))
    } else if hours > 0 {
        format!("expires in {hours}h {minutes}m")
    } else if minutes > 0 {
        format!("expires in {minutes}m")
    } else {
        format!("expires in {}s", remaining.num_seconds())
    }
}
