//! Shared helpers for integration tests.
#![allow(dead_code)]

pub mod logger;

use serde_json::Value;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A JSON 200 response.
#[must_use]
pub fn json_ok(body: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(body)
}

/// A JSON response with `status`.
#[must_use]
pub fn json_status(status: u16, body: Value) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_json(body)
}

/// Mount `GET path` answering `body`, expected exactly `times` times.
pub async fn mount_get(server: &MockServer, route: &str, body: Value, times: u64) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(json_ok(body))
        .expect(times)
        .mount(server)
        .await;
}

/// Requests the server received for `route`.
pub async fn hits(server: &MockServer, route: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == route)
        .count()
}
