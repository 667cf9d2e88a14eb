//! 401 handling: one shared token refresh, one retry per request, and a
//! clean sign-out when the refresh fails.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::logger::TestLogger;
use common::{hits, json_ok, json_status};
use edugate::storage::{MemorySessionStore, SessionStore};
use edugate::test_utils::{CountingRefresher, RecordingRedirect, TestHarness, fast_settings};
use edugate::{ApiClient, ClientError, GetOptions};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// `GET route` answers 200 for the refreshed token and 401 for anything else.
async fn mount_guarded(server: &MockServer, route: &str, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(route))
        .and(header("authorization", "Bearer refreshed-token"))
        .respond_with(json_ok(body))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(json_status(401, json!({"message": "jwt expired"})))
        .mount(server)
        .await;
}

#[tokio::test]
async fn expired_token_is_refreshed_and_request_retried() {
    let log = TestLogger::new("expired_token_is_refreshed_and_request_retried");
    let server = MockServer::start().await;
    mount_guarded(&server, "/profile", json!({"name": "Ada"})).await;
    let harness = TestHarness::new(&server.uri());
    harness.sign_in("expired-token");

    let profile = harness
        .client
        .get_value("/profile", None, &GetOptions::new())
        .await
        .unwrap();

    assert_eq!(profile, json!({"name": "Ada"}));
    assert_eq!(harness.refresher.calls(), 1);
    assert_eq!(
        harness.session.access_token().unwrap().as_deref(),
        Some("refreshed-token")
    );
    assert_eq!(hits(&server, "/profile").await, 2);
    assert_eq!(harness.redirect.count(), 0);
    log.finish_ok();
}

#[tokio::test]
async fn concurrent_401s_share_one_refresh() {
    let log = TestLogger::new("concurrent_401s_share_one_refresh");
    let server = MockServer::start().await;
    for route in ["/profile", "/classes", "/notices"] {
        mount_guarded(&server, route, json!({"route": route})).await;
    }

    log.phase("setup");
    let session = Arc::new(MemorySessionStore::with_token("expired-token"));
    let refresher = Arc::new(
        CountingRefresher::succeeding(session.clone(), "refreshed-token")
            .with_delay(Duration::from_millis(200)),
    );
    let client = ApiClient::builder(fast_settings(&server.uri()))
        .session(session.clone())
        .refresher(refresher.clone())
        .redirect(Arc::new(RecordingRedirect::default()))
        .build()
        .unwrap();

    log.phase("fan out");
    let options = GetOptions::new();
    let (profile, classes, notices) = tokio::join!(
        client.get_value("/profile", None, &options),
        client.get_value("/classes", None, &options),
        client.get_value("/notices", None, &options),
    );

    assert_eq!(profile.unwrap(), json!({"route": "/profile"}));
    assert_eq!(classes.unwrap(), json!({"route": "/classes"}));
    assert_eq!(notices.unwrap(), json!({"route": "/notices"}));
    assert_eq!(refresher.calls(), 1);
    assert_eq!(client.metrics().token_refreshes, 1);
    log.finish_ok();
}

#[tokio::test]
async fn failed_refresh_clears_session_and_redirects_once() {
    let log = TestLogger::new("failed_refresh_clears_session_and_redirects_once");
    let server = MockServer::start().await;
    for route in ["/profile", "/classes"] {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(json_status(401, json!({})))
            .mount(&server)
            .await;
    }
    let session = Arc::new(MemorySessionStore::with_token("expired-token"));
    let refresher =
        Arc::new(CountingRefresher::failing(session.clone()).with_delay(Duration::from_millis(200)));
    let redirect = Arc::new(RecordingRedirect::default());
    let client = ApiClient::builder(fast_settings(&server.uri()))
        .session(session.clone())
        .refresher(refresher.clone())
        .redirect(redirect.clone())
        .build()
        .unwrap();

    let options = GetOptions::new();
    let (profile, classes) = tokio::join!(
        client.get_value("/profile", None, &options),
        client.get_value("/classes", None, &options),
    );

    for err in [profile.unwrap_err(), classes.unwrap_err()] {
        assert!(matches!(err, ClientError::AuthRequired { .. }), "got {err:?}");
        assert_eq!(err.exit_code() as u8, 2);
    }
    assert_eq!(refresher.calls(), 1);
    assert_eq!(redirect.count(), 1);
    assert_eq!(session.access_token().unwrap(), None);
    log.finish_ok();
}

#[tokio::test]
async fn second_401_after_refresh_is_final() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/admin"))
        .respond_with(json_status(401, json!({"message": "not allowed"})))
        .expect(2)
        .mount(&server)
        .await;
    let harness = TestHarness::new(&server.uri());
    harness.sign_in("expired-token");

    let err = harness
        .client
        .get_value("/admin", None, &GetOptions::new())
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ClientError::AuthRequired {
            reason: "request was still unauthorized after refreshing the session".to_string()
        }
    );
    assert_eq!(harness.refresher.calls(), 1);
    assert_eq!(harness.redirect.count(), 0);
}

#[tokio::test]
async fn forbidden_does_not_trigger_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/salaries"))
        .respond_with(json_status(403, json!({"error": "Forbidden"})))
        .expect(1)
        .mount(&server)
        .await;
    let harness = TestHarness::new(&server.uri());
    harness.sign_in("valid-token");

    let err = harness
        .client
        .get_value("/salaries", None, &GetOptions::new())
        .await
        .unwrap_err();

    assert_eq!(err.payload().message, "Forbidden");
    assert_eq!(harness.refresher.calls(), 0);
}

#[tokio::test]
async fn bearer_token_is_attached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/me"))
        .and(header("authorization", "Bearer token-1"))
        .respond_with(json_ok(json!({"id": "U1"})))
        .expect(1)
        .mount(&server)
        .await;
    let harness = TestHarness::new(&server.uri());
    harness.sign_in("token-1");

    let me = harness
        .client
        .get_value("/me", None, &GetOptions::new())
        .await
        .unwrap();
    assert_eq!(me, json!({"id": "U1"}));
}

#[tokio::test]
async fn http_refresher_sends_cookie_and_stores_new_token() {
    let log = TestLogger::new("http_refresher_sends_cookie_and_stores_new_token");
    let server = MockServer::start().await;

    // Sign-in sets the HTTP-only refresh cookie.
    Mock::given(method("GET"))
        .and(path("/session"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "refresh=r-123; Path=/; HttpOnly")
                .set_body_json(json!({})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(header("cookie", "refresh=r-123"))
        .respond_with(json_ok(json!({
            "data": {"accessToken": "fresh", "user": {"id": "U9"}}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/timetable"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(json_ok(json!({"slots": []})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/timetable"))
        .respond_with(json_status(401, json!({})))
        .mount(&server)
        .await;

    let session = Arc::new(MemorySessionStore::with_token("stale"));
    let client = ApiClient::builder(fast_settings(&server.uri()))
        .session(session.clone())
        .redirect(Arc::new(RecordingRedirect::default()))
        .build()
        .unwrap();

    log.phase("pick up cookie");
    client
        .get_value("/session", None, &GetOptions::new())
        .await
        .unwrap();

    log.phase("refresh on 401");
    let timetable = client
        .get_value("/timetable", None, &GetOptions::new())
        .await
        .unwrap();

    assert_eq!(timetable, json!({"slots": []}));
    assert_eq!(session.access_token().unwrap().as_deref(), Some("fresh"));
    assert_eq!(session.cached_user().unwrap(), Some(json!({"id": "U9"})));
    log.finish_ok();
}

#[tokio::test]
async fn rejected_http_refresh_signs_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(json_status(401, json!({"message": "refresh token expired"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/timetable"))
        .respond_with(json_status(401, json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let session = Arc::new(MemorySessionStore::with_token("stale"));
    let redirect = Arc::new(RecordingRedirect::default());
    let client = ApiClient::builder(fast_settings(&server.uri()))
        .session(session.clone())
        .redirect(redirect.clone())
        .build()
        .unwrap();

    let err = client
        .get_value("/timetable", None, &GetOptions::new())
        .await
        .unwrap_err();

    assert!(err.is_auth());
    assert_eq!(session.access_token().unwrap(), None);
    assert_eq!(redirect.count(), 1);
}
