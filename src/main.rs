//! edugate - cached, authenticated access to the school-management API.
//!
//! CLI entry point.

#![forbid(unsafe_code)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use std::process::ExitCode;

use clap::Parser;

use edugate::cli::{Cli, OutputFormat};
use edugate::core::logging;
use edugate::error::ClientError;
use edugate::render::error::render_error;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = cli
        .log_level
        .as_deref()
        .and_then(logging::LogLevel::from_arg)
        .or_else(logging::parse_log_level_from_env)
        .unwrap_or_default();
    let log_format = if cli.json_output {
        logging::LogFormat::Json
    } else {
        logging::parse_log_format_from_env().unwrap_or_default()
    };
    logging::init(log_level, log_format, logging::parse_log_file_from_env(), cli.verbose);

    // The resolved config is not available if resolution itself failed.
    let format = if cli.json || cli.format == Some(OutputFormat::Json) {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };
    let no_color = cli.no_color || !edugate::util::env::should_use_color(false);
    let pretty = cli.pretty;

    match edugate::cli::run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::debug!(error = ?err, "command failed");
            let client_error = err
                .chain()
                .find_map(|cause| cause.downcast_ref::<ClientError>())
                .cloned()
                .unwrap_or_else(|| ClientError::Internal(format!("{err:#}")));
            // Setup failures carry context above the underlying error.
            if format == OutputFormat::Human && err.chain().count() > 1 {
                eprintln!("{err}");
            }
            eprintln!("{}", render_error(&client_error, format, no_color, pretty));
            ExitCode::from(client_error.exit_code() as u8)
        }
    }
}
