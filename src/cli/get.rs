//! `get` command.

use std::time::Duration;

use super::args::GetArgs;
use super::{App, Output, emit};
use crate::core::client::GetOptions;
use crate::error::Result;
use crate::render;

/// Read `args.endpoint` through the cache and print the body.
///
/// # Errors
///
/// Returns the read error.
pub async fn execute(args: &GetArgs, app: &App, output: Output) -> Result<()> {
    let options = options_for(args);
    let params = args.query_params();
    tracing::debug!(endpoint = %args.endpoint, ?options, "get");

    let value = app
        .client
        .get_value(&args.endpoint, params.as_ref(), &options)
        .await?;
    emit(&render::render_value(&value, output.format, output.pretty, output.no_color)?);

    if args.swr {
        // Let the background refresh finish before the process exits.
        let settings = app.client.settings();
        let deadline = tokio::time::Instant::now() + settings.revalidation_delay + settings.request_timeout;
        tokio::time::sleep(settings.revalidation_delay + Duration::from_millis(20)).await;
        while app.client.in_flight() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
    Ok(())
}

fn options_for(args: &GetArgs) -> GetOptions {
    let mut options = GetOptions::new().context(args.context.to_context());
    if let Some(minutes) = args.ttl {
        options = options.ttl_minutes(minutes);
    }
    if args.refresh {
        options = options.force_refresh();
    }
    if args.swr {
        options = options.stale_while_revalidate();
    }
    options
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::args::{Cli, Commands};
    use clap::Parser;

    #[test]
    fn flags_map_to_options() {
        let cli = Cli::try_parse_from([
            "edugate", "get", "/classes", "--ttl", "3", "--refresh", "--user", "U1",
        ])
        .unwrap();
        let Commands::Get(args) = cli.command else {
            panic!("expected get");
        };
        let options = options_for(&args);
        assert_eq!(options.ttl, Some(Duration::from_secs(180)));
        assert!(options.force_refresh);
        assert!(!options.stale_while_revalidate);
        assert_eq!(options.context.user_id.as_deref(), Some("U1"));
    }
}
