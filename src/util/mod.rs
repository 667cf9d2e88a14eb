//! Small helpers for CLI output.

pub mod env;
pub mod format;
pub mod time;

pub use format::{format_bytes, format_duration};
pub use time::{format_expiry, format_relative_time};
