//! Writes against a mock API: request bodies, error messages and cache
//! invalidation.

mod common;

use std::time::Duration;

use common::logger::TestLogger;
use common::{json_ok, json_status};
use edugate::core::{InvalidationRule, InvalidationRules, InvalidationScope, build_key};
use edugate::storage::{CacheEntry, CacheStore};
use edugate::test_utils::{TestHarness, fast_settings};
use edugate::{Context, GetOptions, MultipartBody, QueryParams, RequestBody};
use reqwest::Method;
use serde_json::{Value, json};
use tempfile::TempDir;
use wiremock::matchers::{body_json, body_string_contains, header, header_regex, method, path};
use wiremock::{Mock, MockServer};

fn seed(harness: &TestHarness, endpoint: &str, params: Option<&QueryParams>, context: &Context) {
    let key = build_key(endpoint, params, context);
    harness
        .store
        .set(CacheEntry::new(key, json!({"seeded": endpoint}), 300, context.clone()))
        .unwrap();
}

fn cached(harness: &TestHarness, endpoint: &str, params: Option<&QueryParams>, context: &Context) -> bool {
    harness
        .store
        .get(&build_key(endpoint, params, context))
        .unwrap()
        .is_some()
}

#[tokio::test]
async fn post_clears_resource_root_and_keeps_other_resources() {
    let log = TestLogger::new("post_clears_resource_root_and_keeps_other_resources");
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/students"))
        .and(body_json(json!({"name": "Ada"})))
        .respond_with(json_status(201, json!({"id": 43, "name": "Ada"})))
        .expect(1)
        .mount(&server)
        .await;
    let harness = TestHarness::new(&server.uri());
    let none = Context::new();
    let page = QueryParams::new().with("page", 2);

    log.phase("seed");
    seed(&harness, "/students", None, &none);
    seed(&harness, "/students", Some(&page), &none);
    seed(&harness, "/students/42", None, &none);
    seed(&harness, "/classes", None, &none);

    log.phase("write");
    let created: Value = harness
        .client
        .post("/students", json!({"name": "Ada"}), &none)
        .await
        .unwrap();

    assert_eq!(created["id"], 43);
    assert!(!cached(&harness, "/students", None, &none));
    assert!(!cached(&harness, "/students", Some(&page), &none));
    assert!(!cached(&harness, "/students/42", None, &none));
    assert!(cached(&harness, "/classes", None, &none));
    assert_eq!(harness.client.metrics().invalidated_entries, 3);
    log.finish_ok();
}

#[tokio::test]
async fn write_clears_entries_sharing_context_tags() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/grades/9"))
        .respond_with(json_ok(json!({"ok": true})))
        .mount(&server)
        .await;
    let harness = TestHarness::new(&server.uri());
    let institute_one = Context::new().with_institute("I1");
    let institute_two = Context::new().with_institute("I2");

    seed(&harness, "/attendance", None, &institute_one);
    seed(&harness, "/attendance", None, &institute_two);

    let _: Value = harness
        .client
        .put("/grades/9", json!({"score": 5}), &institute_one.clone().with_role("teacher"))
        .await
        .unwrap();

    assert!(!cached(&harness, "/attendance", None, &institute_one));
    assert!(cached(&harness, "/attendance", None, &institute_two));
}

#[tokio::test]
async fn failed_write_surfaces_server_message_and_keeps_cache() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/students"))
        .respond_with(json_status(
            422,
            json!({"message": ["name is required", "age must be positive"]}),
        ))
        .expect(1)
        .mount(&server)
        .await;
    let harness = TestHarness::new(&server.uri());
    let none = Context::new();
    seed(&harness, "/students", None, &none);

    let err = harness
        .client
        .post::<Value>("/students", json!({}), &none)
        .await
        .unwrap_err();

    assert_eq!(err.payload().message, "name is required, age must be positive");
    assert_eq!(err.http_status(), Some(422));
    assert!(cached(&harness, "/students", None, &none));
}

#[tokio::test]
async fn writes_are_never_retried_on_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/students/1"))
        .respond_with(json_status(503, json!({})))
        .expect(1)
        .mount(&server)
        .await;
    let harness = TestHarness::new(&server.uri());

    let err = harness
        .client
        .patch::<Value>("/students/1", json!({"name": "Grace"}), &Context::new())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "HTTP 503");
}

#[tokio::test]
async fn multipart_upload_is_sent_as_form_data() {
    let log = TestLogger::new("multipart_upload_is_sent_as_form_data");
    let dir = TempDir::new().unwrap();
    let photo = dir.path().join("ada.png");
    std::fs::write(&photo, b"fake-png-bytes").unwrap();

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/students/42/photo"))
        .and(header_regex("content-type", "^multipart/form-data; boundary="))
        .and(body_string_contains("fake-png-bytes"))
        .and(body_string_contains("Ada Lovelace"))
        .respond_with(json_ok(json!({"uploaded": true})))
        .expect(1)
        .mount(&server)
        .await;
    let harness = TestHarness::new(&server.uri());

    let form = MultipartBody::new()
        .text("caption", "Ada Lovelace")
        .file("photo", &photo);
    let result: Value = harness
        .client
        .post("/students/42/photo", form, &Context::new())
        .await
        .unwrap();
    assert_eq!(result, json!({"uploaded": true}));
    log.finish_ok();
}

#[tokio::test]
async fn write_is_resent_once_after_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/notices"))
        .and(header("authorization", "Bearer refreshed-token"))
        .and(body_json(json!({"title": "Sports day"})))
        .respond_with(json_status(201, json!({"id": 5})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/notices"))
        .respond_with(json_status(401, json!({})))
        .expect(1)
        .mount(&server)
        .await;
    let harness = TestHarness::new(&server.uri());
    harness.sign_in("expired-token");

    let created: Value = harness
        .client
        .post("/notices", json!({"title": "Sports day"}), &Context::new())
        .await
        .unwrap();
    assert_eq!(created, json!({"id": 5}));
    assert_eq!(harness.refresher.calls(), 1);
}

#[tokio::test]
async fn delete_with_empty_body_decodes_to_value() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/students/42"))
        .respond_with(wiremock::ResponseTemplate::new(204))
        .mount(&server)
        .await;
    let harness = TestHarness::new(&server.uri());
    let none = Context::new();
    seed(&harness, "/students/42", None, &none);

    let body: Value = harness
        .client
        .delete("/students/42", RequestBody::Empty, &none)
        .await
        .unwrap();
    assert_eq!(body, json!({}));
    assert!(!cached(&harness, "/students/42", None, &none));
}

#[tokio::test]
async fn custom_rules_clear_related_resources() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/payments"))
        .respond_with(json_ok(json!({"ok": true})))
        .mount(&server)
        .await;
    let rules = InvalidationRules::empty().with_rule(
        InvalidationRule::new("^/payments")
            .unwrap()
            .methods([Method::POST])
            .scope(InvalidationScope::Resource("/invoices".to_string())),
    );
    let harness = TestHarness::with_settings(fast_settings(&server.uri()), rules);
    let none = Context::new();
    seed(&harness, "/invoices", None, &none);
    seed(&harness, "/payments", None, &none);

    let _: Value = harness
        .client
        .post("/payments", json!({"amount": 10}), &none)
        .await
        .unwrap();

    assert!(!cached(&harness, "/invoices", None, &none));
    assert!(cached(&harness, "/payments", None, &none));
}

#[tokio::test]
async fn read_after_write_refetches_instead_of_serving_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/attendance"))
        .respond_with(json_ok(json!({"present": 20})))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/attendance"))
        .respond_with(json_ok(json!({"present": 21})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/attendance"))
        .respond_with(json_status(201, json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;
    let harness = TestHarness::new(&server.uri());
    let institute = Context::new().with_institute("I1");
    let options = GetOptions::new().context(institute.clone());

    let before = harness
        .client
        .get_value("/attendance", None, &options)
        .await
        .unwrap();
    assert_eq!(before, json!({"present": 20}));

    let _: Value = harness
        .client
        .post("/attendance", json!({"student": 7}), &institute)
        .await
        .unwrap();

    // Still inside the first read's cooldown window; the write ends it.
    let after = harness
        .client
        .get_value("/attendance", None, &options)
        .await
        .unwrap();
    assert_eq!(after, json!({"present": 21}));
}

#[tokio::test]
async fn read_in_flight_during_write_is_not_cached() {
    let log = TestLogger::new("read_in_flight_during_write_is_not_cached");
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/students"))
        .respond_with(json_ok(json!({"v": "pre-write"})).set_delay(Duration::from_millis(300)))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/students"))
        .respond_with(json_ok(json!({"v": "post-write"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/students"))
        .respond_with(json_status(201, json!({"id": 1})))
        .expect(1)
        .mount(&server)
        .await;
    let harness = TestHarness::new(&server.uri());
    let institute = Context::new().with_institute("I1");
    let options = GetOptions::new().context(institute.clone());

    log.phase("slow read");
    let client = harness.client.clone();
    let reader_options = options.clone();
    let early = tokio::spawn(async move {
        client.get_value("/students", None, &reader_options).await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    log.phase("write");
    let _: Value = harness
        .client
        .post("/students", json!({"name": "Ada"}), &institute)
        .await
        .unwrap();

    log.phase("reads after write");
    // Does not join the read that started before the write.
    let after = harness
        .client
        .get_value("/students", None, &options)
        .await
        .unwrap();
    assert_eq!(after, json!({"v": "post-write"}));

    // The early caller still gets its own response, which is not cached.
    let early = early.await.unwrap().unwrap();
    assert_eq!(early, json!({"v": "pre-write"}));

    let again = harness
        .client
        .get_value("/students", None, &options)
        .await
        .unwrap();
    assert_eq!(again, json!({"v": "post-write"}));
    assert_eq!(harness.store.len(), 1);
    log.finish_ok();
}
