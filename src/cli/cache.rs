//! `cache` subcommands.

use serde_json::json;

use super::args::CacheCommand;
use super::{App, Output, emit};
use crate::error::Result;
use crate::render;

/// # Errors
///
/// Returns an error if the cache store fails.
pub fn execute(cmd: &CacheCommand, app: &App, output: Output) -> Result<()> {
    let client = &app.client;
    match cmd {
        CacheCommand::Stats => {
            let stats = client.cache_stats()?;
            emit(&render::render_cache_stats(
                &stats,
                output.format,
                output.pretty,
                output.no_color,
            )?);
        }
        CacheCommand::Clear {
            user,
            institute,
            all,
        } => {
            let (removed, scope) = if *all {
                (client.clear_all_cache()?, "all".to_string())
            } else if let Some(user) = user {
                (client.clear_user_cache(user)?, format!("user {user}"))
            } else if let Some(institute) = institute {
                (client.clear_institute_cache(institute)?, format!("institute {institute}"))
            } else {
                (0, "nothing".to_string())
            };
            emit(&render::render_notice(
                &format!("removed {removed} cached entries ({scope})"),
                &json!({ "removed": removed, "scope": scope }),
                output.format,
                output.pretty,
                output.no_color,
            )?);
        }
        CacheCommand::Prune => {
            let factor = app.config.config.cache.retention_factor;
            let removed = client.store().purge_expired(factor)?;
            tracing::info!(removed, factor, "pruned cache");
            emit(&render::render_notice(
                &format!("pruned {removed} expired entries"),
                &json!({ "removed": removed }),
                output.format,
                output.pretty,
                output.no_color,
            )?);
        }
    }
    Ok(())
}
