//! edugate - caching, request-coordinating client for the school-management API.
//!
//! Reads go through a tagged local cache with per-key cooldown and
//! request deduplication; writes invalidate affected entries; a 401 triggers
//! one shared token refresh and a single retry.

// Note: deny (not forbid) to allow #[allow(unsafe_code)] in test helpers for env var manipulation
#![deny(unsafe_code)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod core;
pub mod error;
pub mod render;
pub mod storage;
pub mod util;

/// Test utilities module - included in test builds or when test-utils feature is enabled.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use crate::core::client::{ApiClient, ClientSettings, GetOptions};
pub use crate::core::context::{Context, QueryParams};
pub use crate::core::mutation::{MultipartBody, RequestBody};
pub use error::{ClientError, ErrorPayload, ExitCode, Result};

// Re-export test utilities for external test crates
#[cfg(any(test, feature = "test-utils"))]
pub use test_utils::*;
