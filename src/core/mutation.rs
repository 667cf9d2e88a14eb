//! Writes: POST/PUT/PATCH/DELETE with one 401 retry and cache invalidation.

use std::path::PathBuf;
use std::sync::PoisonError;
use std::sync::atomic::Ordering;

use reqwest::Method;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::client::ApiClient;
use super::context::Context;
use super::http::ApiRequest;
use super::invalidation;
use crate::error::{ClientError, Result};

/// Body of a write.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    #[default]
    Empty,
    /// Serialized as JSON with `Content-Type: application/json`.
    Json(Value),
    /// Sent as `multipart/form-data`; the transport picks the boundary.
    Multipart(MultipartBody),
}

impl From<Value> for RequestBody {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<MultipartBody> for RequestBody {
    fn from(form: MultipartBody) -> Self {
        Self::Multipart(form)
    }
}

impl<T: Into<RequestBody>> From<Option<T>> for RequestBody {
    fn from(body: Option<T>) -> Self {
        body.map_or(Self::Empty, Into::into)
    }
}

/// Where a file part's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSource {
    Bytes(Vec<u8>),
    /// Read when the form is built, so every attempt sends current contents.
    Path(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    pub field: String,
    pub file_name: String,
    pub mime: Option<String>,
    pub source: FileSource,
}

/// A multipart form that can be rebuilt for each attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultipartBody {
    pub text: Vec<(String, String)>,
    pub files: Vec<FilePart>,
}

impl MultipartBody {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.text.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn bytes(
        mut self,
        field: impl Into<String>,
        file_name: impl Into<String>,
        bytes: Vec<u8>,
        mime: Option<&str>,
    ) -> Self {
        self.files.push(FilePart {
            field: field.into(),
            file_name: file_name.into(),
            mime: mime.map(ToString::to_string),
            source: FileSource::Bytes(bytes),
        });
        self
    }

    /// Attach the file at `path`, named after its last component.
    #[must_use]
    pub fn file(mut self, field: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map_or_else(|| "upload".to_string(), |n| n.to_string_lossy().into_owned());
        self.files.push(FilePart {
            field: field.into(),
            file_name,
            mime: None,
            source: FileSource::Path(path),
        });
        self
    }

    /// Build a fresh `reqwest` form.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be read or a MIME type is invalid.
    pub fn to_form(&self) -> Result<Form> {
        let mut form = Form::new();
        for (name, value) in &self.text {
            form = form.text(name.clone(), value.clone());
        }
        for file in &self.files {
            let bytes = match &file.source {
                FileSource::Bytes(bytes) => bytes.clone(),
                FileSource::Path(path) => std::fs::read(path).map_err(|e| {
                    ClientError::Io(format!("reading {}: {e}", path.display()))
                })?,
            };
            let mut part = Part::bytes(bytes).file_name(file.file_name.clone());
            if let Some(mime) = &file.mime {
                part = part
                    .mime_str(mime)
                    .map_err(|e| ClientError::Config(format!("invalid MIME type '{mime}': {e}")))?;
            }
            form = form.part(file.field.clone(), part);
        }
        Ok(form)
    }
}

impl ApiClient {
    /// # Errors
    ///
    /// Returns the request error, or [`ClientError::ParseResponse`] if the
    /// body does not fit `T`.
    pub async fn post<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: impl Into<RequestBody>,
        context: &Context,
    ) -> Result<T> {
        decode(self.mutate(Method::POST, endpoint, body.into(), context).await?)
    }

    /// # Errors
    ///
    /// See [`ApiClient::post`].
    pub async fn put<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: impl Into<RequestBody>,
        context: &Context,
    ) -> Result<T> {
        decode(self.mutate(Method::PUT, endpoint, body.into(), context).await?)
    }

    /// # Errors
    ///
    /// See [`ApiClient::post`].
    pub async fn patch<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: impl Into<RequestBody>,
        context: &Context,
    ) -> Result<T> {
        decode(self.mutate(Method::PATCH, endpoint, body.into(), context).await?)
    }

    /// # Errors
    ///
    /// See [`ApiClient::post`].
    pub async fn delete<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: impl Into<RequestBody>,
        context: &Context,
    ) -> Result<T> {
        decode(self.mutate(Method::DELETE, endpoint, body.into(), context).await?)
    }

    /// Send a write and, on success, invalidate the cache per the rule table.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::AuthRequired`] if the session cannot be
    /// refreshed, or the HTTP error for any other non-2xx.
    pub async fn mutate(
        &self,
        method: Method,
        endpoint: &str,
        body: RequestBody,
        context: &Context,
    ) -> Result<Value> {
        let request = ApiRequest::with_body(method.clone(), endpoint, body);
        let value = self.execute(&request).await?;

        let inner = &self.inner;
        let targets = inner.rules.plan(&method, endpoint, context);
        let mut generation = inner
            .write_generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *generation += 1;
        // Reads started before the write may carry pre-write data.
        let detached = inner.dedupe.detach_all();
        inner.cooldown.reset();
        let removed = invalidation::apply(inner.store.as_ref(), &targets);
        drop(generation);

        inner
            .metrics
            .invalidated_entries
            .fetch_add(removed, Ordering::Relaxed);
        tracing::info!(%method, endpoint, targets = targets.len(), removed, detached, "invalidated cache after write");

        Ok(value)
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| ClientError::ParseResponse(e.to_string()))
}
