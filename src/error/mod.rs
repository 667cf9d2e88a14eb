//! Error types for edugate.
//!
//! Uses `thiserror` for structured error types that map to exit codes.
//!
//! ## Error Taxonomy
//!
//! Errors are categorized into seven main categories:
//! - **Authentication**: 401 handling that could not be recovered by a token refresh
//! - **Http**: Non-2xx responses from the backend (validation, not found, server errors)
//! - **Network**: Connection, timeout, or transport failures with no response
//! - **Throttle**: Requests suppressed by the cooldown throttle with no cached fallback
//! - **Configuration**: Config file parsing, validation, or missing values
//! - **Storage**: Cache store or session store failures
//! - **Internal**: Unexpected errors, bugs, or unclassified issues
//!
//! Each error has a stable error code (e.g., `EDU-A001`) for programmatic handling.
//!
//! `ClientError` is `Clone`: a single settled outcome of a deduplicated request or
//! token refresh is handed to every caller that joined it.

use serde::Serialize;
use thiserror::Error;

// =============================================================================
// Error Categories
// =============================================================================

/// High-level error categories for classification and routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Authentication failed and could not be recovered.
    Authentication,
    /// The backend answered with a non-2xx status.
    Http,
    /// No response was received (timeout, refused connection, DNS, TLS).
    Network,
    /// Suppressed by the cooldown throttle.
    Throttle,
    /// Configuration issues (parse errors, invalid values).
    Configuration,
    /// Cache store or session store failures.
    Storage,
    /// Internal errors (bugs, unexpected state, unclassified).
    Internal,
}

impl ErrorCategory {
    /// Returns a human-readable description of the category.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Authentication => "Authentication error",
            Self::Http => "HTTP error",
            Self::Network => "Network error",
            Self::Throttle => "Throttled",
            Self::Configuration => "Configuration error",
            Self::Storage => "Storage error",
            Self::Internal => "Internal error",
        }
    }

    /// Returns a short code prefix for this category.
    #[must_use]
    pub const fn code_prefix(&self) -> &'static str {
        match self {
            Self::Authentication => "A",
            Self::Http => "H",
            Self::Network => "N",
            Self::Throttle => "T",
            Self::Configuration => "C",
            Self::Storage => "S",
            Self::Internal => "X",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

// =============================================================================
// Exit Codes
// =============================================================================

/// Process exit codes for the `edugate` binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    /// Success
    Success = 0,
    /// Unexpected failure
    GeneralError = 1,
    /// Authentication required
    AuthRequired = 2,
    /// Configuration or parse errors
    ParseError = 3,
    /// Timeout or throttled
    Timeout = 4,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as Self
    }
}

// =============================================================================
// Error Payload
// =============================================================================

/// Error shape handed to the UI layer.
///
/// Only the message is part of the public contract; status codes and raw
/// server bodies are logged instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// Main error type for edugate operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    // ==========================================================================
    // Authentication errors (Category: Authentication)
    // ==========================================================================
    /// A 401 could not be recovered: the refresh failed, or the retried request
    /// was rejected again.
    #[error("authentication required: {reason}")]
    AuthRequired { reason: String },

    /// The token refresh endpoint rejected the refresh.
    #[error("token refresh failed: {reason}")]
    RefreshFailed { reason: String },

    // ==========================================================================
    // HTTP errors (Category: Http)
    // ==========================================================================
    /// The backend answered with a non-2xx status.
    #[error("{message}")]
    Http { status: u16, message: String },

    /// A 2xx body could not be converted into the requested type.
    #[error("failed to parse response: {0}")]
    ParseResponse(String),

    // ==========================================================================
    // Network errors (Category: Network)
    // ==========================================================================
    /// Request timed out after the transport's timeout.
    #[error("request timeout after {0} seconds")]
    Timeout(u64),

    /// Connection refused by remote server.
    #[error("connection refused: {host}")]
    ConnectionRefused { host: String },

    /// Generic transport failure with no response.
    #[error("network error: {0}")]
    Network(String),

    // ==========================================================================
    // Throttle errors (Category: Throttle)
    // ==========================================================================
    /// A fetch was suppressed by the cooldown throttle and nothing was cached.
    #[error("too many requests for {endpoint}, please try again shortly")]
    Cooldown { endpoint: String },

    // ==========================================================================
    // Configuration errors (Category: Configuration)
    // ==========================================================================
    /// Generic configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Error parsing configuration file.
    #[error("config parse error at {path}: {message}")]
    ConfigParse { path: String, message: String },

    /// Endpoint or base URL could not be turned into a request URL.
    #[error("invalid endpoint '{endpoint}': {message}")]
    InvalidEndpoint { endpoint: String, message: String },

    // ==========================================================================
    // Storage errors (Category: Storage)
    // ==========================================================================
    /// Cache store failure.
    #[error("cache store error: {0}")]
    Store(String),

    /// Session store failure.
    #[error("session store error: {0}")]
    Session(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(String),

    // ==========================================================================
    // Internal errors (Category: Internal)
    // ==========================================================================
    /// A background task failed to complete (panicked or was aborted).
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<rusqlite::Error> for ClientError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<keyring::Error> for ClientError {
    fn from(err: keyring::Error) -> Self {
        Self::Session(err.to_string())
    }
}

impl ClientError {
    /// Build an HTTP error from a status and an optional server-provided message.
    #[must_use]
    pub fn http(status: u16, message: Option<String>) -> Self {
        Self::Http {
            status,
            message: message.unwrap_or_else(|| format!("HTTP {status}")),
        }
    }

    /// Map error to exit code.
    #[must_use]
    pub const fn exit_code(&self) -> ExitCode {
        match self {
            Self::AuthRequired { .. } | Self::RefreshFailed { .. } => ExitCode::AuthRequired,

            Self::Config(_)
            | Self::ConfigParse { .. }
            | Self::InvalidEndpoint { .. }
            | Self::ParseResponse(_)
            | Self::Json(_) => ExitCode::ParseError,

            Self::Timeout(_) | Self::Cooldown { .. } => ExitCode::Timeout,

            Self::Http { .. }
            | Self::ConnectionRefused { .. }
            | Self::Network(_)
            | Self::Store(_)
            | Self::Session(_)
            | Self::Io(_)
            | Self::Internal(_) => ExitCode::GeneralError,
        }
    }

    /// Returns the error category for classification and routing.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::AuthRequired { .. } | Self::RefreshFailed { .. } => {
                ErrorCategory::Authentication
            }

            Self::Http { .. } | Self::ParseResponse(_) => ErrorCategory::Http,

            Self::Timeout(_) | Self::ConnectionRefused { .. } | Self::Network(_) => {
                ErrorCategory::Network
            }

            Self::Cooldown { .. } => ErrorCategory::Throttle,

            Self::Config(_) | Self::ConfigParse { .. } | Self::InvalidEndpoint { .. } => {
                ErrorCategory::Configuration
            }

            Self::Store(_) | Self::Session(_) | Self::Io(_) | Self::Json(_) => {
                ErrorCategory::Storage
            }

            Self::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Returns a stable error code for programmatic handling.
    ///
    /// Format: `EDU-{category}{number}`.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::AuthRequired { .. } => "EDU-A001",
            Self::RefreshFailed { .. } => "EDU-A002",

            Self::Http { .. } => "EDU-H001",
            Self::ParseResponse(_) => "EDU-H002",

            Self::Timeout(_) => "EDU-N001",
            Self::ConnectionRefused { .. } => "EDU-N002",
            Self::Network(_) => "EDU-N099",

            Self::Cooldown { .. } => "EDU-T001",

            Self::Config(_) => "EDU-C001",
            Self::ConfigParse { .. } => "EDU-C002",
            Self::InvalidEndpoint { .. } => "EDU-C003",

            Self::Store(_) => "EDU-S001",
            Self::Session(_) => "EDU-S002",
            Self::Io(_) => "EDU-S003",
            Self::Json(_) => "EDU-S004",

            Self::Internal(_) => "EDU-X099",
        }
    }

    /// Returns whether the error is a transient failure worth retrying with backoff.
    ///
    /// Only 502/503/504 responses and failures without any response qualify.
    /// Client errors (400, 403, 404, 409, 422) are never retried, and 401 is
    /// handled by the token refresh flow instead.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => matches!(*status, 502..=504),
            Self::Timeout(_) | Self::ConnectionRefused { .. } | Self::Network(_) => true,
            _ => false,
        }
    }

    /// Returns true for terminal authentication failures.
    #[must_use]
    pub const fn is_auth(&self) -> bool {
        matches!(self.category(), ErrorCategory::Authentication)
    }

    /// HTTP status associated with this error, if the backend answered.
    #[must_use]
    pub const fn http_status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::AuthRequired { .. } => Some(401),
            Self::Cooldown { .. } => Some(429),
            _ => None,
        }
    }

    /// The `{message}` shape surfaced to the UI layer.
    #[must_use]
    pub fn payload(&self) -> ErrorPayload {
        ErrorPayload {
            message: self.to_string(),
        }
    }
}

/// Result type alias for edugate operations.
pub type Result<T> = std::result::Result<T, ClientError>;
