//! Error rendering for the CLI.

use colored::Colorize;

use crate::cli::args::OutputFormat;
use crate::error::{ClientError, ErrorCategory};

/// Render `error` for stderr.
///
/// JSON mode prints only the [`ErrorPayload`](crate::error::ErrorPayload);
/// human mode adds the error code and a hint.
#[must_use]
pub fn render_error(error: &ClientError, format: OutputFormat, no_color: bool, pretty: bool) -> String {
    match format {
        OutputFormat::Json => render_error_json(error, pretty),
        OutputFormat::Human => render_simple(error, no_color),
    }
}

#[must_use]
pub fn render_error_json(error: &ClientError, pretty: bool) -> String {
    let payload = error.payload();
    let rendered = if pretty {
        serde_json::to_string_pretty(&payload)
    } else {
        serde_json::to_string(&payload)
    };
    rendered.unwrap_or_else(|_| format!("{{\"message\":{:?}}}", payload.message))
}

fn render_simple(error: &ClientError, no_color: bool) -> String {
    let code = format!("[{}]", error.error_code());
    let mut out = if no_color {
        format!("Error {code}: {error}")
    } else {
        format!("{} {}: {error}", "Error".red().bold(), code.dimmed())
    };
    if let Some(hint) = hint(error) {
        out.push_str("\n  hint: ");
        out.push_str(hint);
    }
    out
}

/// A one-line next step for the user, where there is an obvious one.
#[must_use]
pub const fn hint(error: &ClientError) -> Option<&'static str> {
    match error {
        ClientError::Cooldown { .. } => Some("wait a moment, or pass --refresh to bypass the cooldown"),
        ClientError::ConnectionRefused { .. } => {
            Some("check --base-url / EDUGATE_BASE_URL and that the server is running")
        }
        ClientError::ConfigParse { .. } => Some("fix the file or point EDUGATE_CONFIG elsewhere"),
        _ => match error.category() {
            ErrorCategory::Authentication => Some("store a new token with `edugate auth set-token <TOKEN>`"),
            ErrorCategory::Network => Some("the request may succeed if retried"),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_mode_prints_payload_only() {
        let err = ClientError::http(422, Some("name is required".to_string()));
        assert_eq!(render_error_json(&err, false), r#"{"message":"name is required"}"#);
    }

    #[test]
    fn human_mode_has_code_and_hint() {
        let err = ClientError::Cooldown {
            endpoint: "/students".to_string(),
        };
        let out = render_error(&err, OutputFormat::Human, true, false);
        assert!(out.starts_with(&format!("Error [{}]", err.error_code())));
        assert!(out.contains("hint: wait a moment"));
    }

    #[test]
    fn auth_errors_point_to_set_token() {
        let err = ClientError::AuthRequired {
            reason: "session expired".to_string(),
        };
        assert!(hint(&err).unwrap().contains("auth set-token"));
    }
}
