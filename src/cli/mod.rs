//! CLI argument parsing and command dispatch.

pub mod app;
pub mod args;
pub mod auth;
pub mod cache;
pub mod config;
pub mod get;
pub mod send;

use anyhow::Context as _;
use clap::CommandFactory;

pub use app::App;
pub use args::{Cli, Commands, OutputFormat};

use crate::storage::config::ResolvedConfig;

/// How command results are printed.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    pub format: OutputFormat,
    pub pretty: bool,
    pub no_color: bool,
}

impl Output {
    #[must_use]
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            format: config.format,
            pretty: config.pretty,
            no_color: !crate::util::env::should_use_color(config.no_color),
        }
    }

    #[must_use]
    pub const fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }
}

/// Run a parsed command line.
///
/// # Errors
///
/// Returns the command's error. [`ClientError`](crate::error::ClientError)s
/// are passed through unwrapped so the caller can map them to an exit code.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Commands::Completions { shell } = &cli.command {
        let mut command = Cli::command();
        clap_complete::generate(*shell, &mut command, "edugate", &mut std::io::stdout());
        return Ok(());
    }

    let resolved = ResolvedConfig::resolve(&cli)?;
    let output = Output::from_config(&resolved);
    tracing::debug!(base_url = %resolved.base_url, format = ?resolved.format, "configuration resolved");

    match cli.command {
        Commands::Config(cmd) => config::execute(&cmd, &resolved, output)?,
        Commands::Get(args) => {
            let app = App::open(resolved).context("failed to set up the API client")?;
            get::execute(&args, &app, output).await?;
        }
        Commands::Send(args) => {
            let app = App::open(resolved).context("failed to set up the API client")?;
            send::execute(&args, &app, output).await?;
        }
        Commands::Cache(cmd) => {
            let app = App::open(resolved).context("failed to open the cache")?;
            cache::execute(&cmd, &app, output)?;
        }
        Commands::Auth(cmd) => {
            let app = App::open(resolved).context("failed to open the session store")?;
            auth::execute(&cmd, &app, output)?;
        }
        Commands::Completions { .. } => {}
    }
    Ok(())
}

/// Print `text` to stdout unless it is empty.
pub(crate) fn emit(text: &str) {
    if !text.is_empty() {
        println!("{text}");
    }
}
