//! `auth` subcommands.

use serde_json::json;

use super::args::AuthCommand;
use super::{App, Output, emit};
use crate::error::{ClientError, Result};
use crate::render::{self, AuthStatus};
use crate::storage::session::{SessionStore, token_expiry, token_fingerprint};

/// # Errors
///
/// Returns an error if the session store fails.
pub fn execute(cmd: &AuthCommand, app: &App, output: Output) -> Result<()> {
    let session = app.client.session();
    match cmd {
        AuthCommand::Status => {
            let status = status(session.as_ref(), app.token_storage())?;
            emit(&render::render_auth_status(
                &status,
                output.format,
                output.pretty,
                output.no_color,
            )?);
        }
        AuthCommand::SetToken { token } => {
            let token = token.trim();
            if token.is_empty() {
                return Err(ClientError::Config("token must not be empty".to_string()));
            }
            session.set_access_token(token)?;
            tracing::info!(token = %token_fingerprint(token), "stored access token");
            emit(&render::render_notice(
                &format!("token stored ({})", app.token_storage()),
                &json!({ "stored": true, "fingerprint": token_fingerprint(token) }),
                output.format,
                output.pretty,
                output.no_color,
            )?);
        }
        AuthCommand::Logout { user } => {
            app.client.logout(user.as_deref())?;
            emit(&render::render_notice(
                "signed out",
                &json!({ "signedOut": true }),
                output.format,
                output.pretty,
                output.no_color,
            )?);
        }
    }
    Ok(())
}

/// Snapshot of the stored session.
///
/// # Errors
///
/// Returns an error if the session store cannot be read.
pub fn status(session: &dyn SessionStore, storage: String) -> Result<AuthStatus> {
    let token = session.access_token()?;
    Ok(AuthStatus {
        signed_in: token.is_some(),
        fingerprint: token.as_deref().map(token_fingerprint),
        expires_at: token.as_deref().and_then(token_expiry),
        user: session.cached_user()?,
        storage,
    })
}
