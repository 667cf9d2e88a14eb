//! `send` command.

use reqwest::Method;
use serde_json::Value;

use super::args::SendArgs;
use super::{App, Output, emit};
use crate::core::mutation::{MultipartBody, RequestBody};
use crate::error::{ClientError, Result};
use crate::render;

/// Send a write and print the response body.
///
/// # Errors
///
/// Returns an error for a malformed `--data`/`--form`/`--file` argument or
/// the request error.
pub async fn execute(args: &SendArgs, app: &App, output: Output) -> Result<()> {
    let body = body_for(args)?;
    let method = Method::from(args.method);
    let context = args.context.to_context();

    let before = app.client.metrics().invalidated_entries;
    let value = app
        .client
        .mutate(method.clone(), &args.endpoint, body, &context)
        .await?;
    let invalidated = app.client.metrics().invalidated_entries - before;

    if !output.is_json() {
        eprintln!(
            "{}",
            render::human::render_notice(
                &format!("{method} {} ({invalidated} cached entries invalidated)", args.endpoint),
                output.no_color,
            )
        );
    }
    emit(&render::render_value(&value, output.format, output.pretty, output.no_color)?);
    Ok(())
}

fn body_for(args: &SendArgs) -> Result<RequestBody> {
    if let Some(data) = &args.data {
        let value: Value = serde_json::from_str(data)
            .map_err(|e| ClientError::Config(format!("--data is not valid JSON: {e}")))?;
        return Ok(RequestBody::Json(value));
    }
    if args.form.is_empty() && args.file.is_empty() {
        return Ok(RequestBody::Empty);
    }

    let mut form = MultipartBody::new();
    for pair in &args.form {
        let (name, value) = split_pair(pair, "--form")?;
        form = form.text(name, value);
    }
    for pair in &args.file {
        let (field, path) = split_pair(pair, "--file")?;
        form = form.file(field, path);
    }
    Ok(RequestBody::Multipart(form))
}

fn split_pair<'a>(arg: &'a str, flag: &str) -> Result<(&'a str, &'a str)> {
    arg.split_once('=')
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| ClientError::Config(format!("{flag} expects NAME=VALUE, got '{arg}'")))
}
