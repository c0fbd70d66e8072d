// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use bug_catch::{
    clock::FixedClock,
    gate::{VitalsSendState, VITALS_STORAGE_KEY},
    store::{FileStore, KeyValueStore},
    transport::HttpTransport,
    Agent, Config, ErrorObject, EventTarget, ManualVitalsSource, Options, UncaughtEvent,
    VitalsSample,
};
use mockito::{Matcher, Server};
use serde_json::json;
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};

const NOW: i64 = 1_700_000_000_000;

async fn wait_until_matched(mock: &mockito::Mock, transport: &HttpTransport) {
    let waited = timeout(Duration::from_secs(2), async {
        while !mock.matched_async().await {
            transport.wait_idle().await;
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    if waited.is_err() {
        panic!("timed out before the collector received the payload");
    }
}

#[tokio::test]
async fn vitals_are_posted_once_required_set_completes() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/catch/vitals")
        .match_header("Content-Type", "application/json")
        .match_body(Matcher::PartialJson(json!({"fcp": {"value": 250}, "lcp": {"value": 980}})))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let store = Arc::new(FileStore::new(dir.path().join("storage.json")));
    let transport = Arc::new(HttpTransport::default());
    let source = Arc::new(ManualVitalsSource::new());

    let config = Config::new(Options {
        required_vitals: Some(vec!["fcp".to_string(), "lcp".to_string()]),
        ..Options::new(server.url(), "r1")
    })
    .expect("valid config");

    let _agent = Agent::builder(config)
        .vitals_source(source.clone())
        .store(store.clone())
        .transport(transport.clone())
        .clock(Arc::new(FixedClock(NOW)))
        .init();

    source.report(VitalsSample::new("fcp", json!({"value": 250})));
    sleep(Duration::from_millis(50)).await;
    transport.wait_idle().await;
    assert!(!mock.matched_async().await);
    assert!(store.get(VITALS_STORAGE_KEY).expect("readable store").is_none());

    source.report(VitalsSample::new("lcp", json!({"value": 980})));
    wait_until_matched(&mock, &transport).await;
    mock.assert_async().await;

    let raw = store
        .get(VITALS_STORAGE_KEY)
        .expect("readable store")
        .expect("vitals state persisted");
    assert_eq!(
        VitalsSendState::parse(&raw),
        Some(VitalsSendState {
            release: "r1".to_string(),
            last_sent: NOW,
        })
    );
}

#[tokio::test]
async fn persisted_state_suppresses_second_agent() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let path = dir.path().join("storage.json");
    FileStore::new(&path)
        .set(
            VITALS_STORAGE_KEY,
            &json!({"release": "r1", "lastSent": NOW - 5 * 86_400_000}).to_string(),
        )
        .expect("writable store");

    let same_release = Arc::new(ManualVitalsSource::new());
    let _agent = Agent::builder(Config::new(Options::new("http://127.0.0.1:1", "r1")).expect("valid config"))
        .vitals_source(same_release.clone())
        .store(Arc::new(FileStore::new(&path)))
        .clock(Arc::new(FixedClock(NOW)))
        .init();
    assert!(!same_release.is_started());

    let new_release = Arc::new(ManualVitalsSource::new());
    let _agent = Agent::builder(Config::new(Options::new("http://127.0.0.1:1", "r2")).expect("valid config"))
        .vitals_source(new_release.clone())
        .store(Arc::new(FileStore::new(&path)))
        .clock(Arc::new(FixedClock(NOW)))
        .init();
    assert!(new_release.is_started());
}

#[tokio::test]
async fn uncaught_exception_is_posted_to_event_endpoint() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/catch/event")
        .match_header("Content-Type", "application/json")
        .match_body(Matcher::PartialJson(json!({
            "type": "error",
            "release": "r1",
            "data": {
                "type": "error",
                "filename": "app.js",
                "line": 10,
                "column": 5,
                "error": {"name": "TypeError", "message": "x is not a function"}
            }
        })))
        .with_status(202)
        .expect(1)
        .create_async()
        .await;

    let window = Arc::new(EventTarget::new());
    let transport = Arc::new(HttpTransport::default());
    let _agent = Agent::builder(Config::new(Options::new(server.url(), "r1")).expect("valid config"))
        .event_source(window.clone())
        .transport(transport.clone())
        .init();

    window.dispatch(&UncaughtEvent::error(
        "Uncaught TypeError: x is not a function",
        "app.js",
        10,
        5,
        ErrorObject::new("TypeError", "x is not a function"),
    ));

    wait_until_matched(&mock, &transport).await;
    mock.assert_async().await;
}

#[tokio::test]
async fn custom_event_is_posted_with_incident_data() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/catch/event")
        .match_body(Matcher::Json(json!({
            "type": "payment_declined",
            "data": {"amount": 42},
            "incidentData": {"ticket": "INC-7"},
            "release": "r1",
            "location": "https://shop.test/checkout"
        })))
        .with_status(202)
        .expect(1)
        .create_async()
        .await;

    let transport = Arc::new(HttpTransport::default());
    let agent = Agent::builder(
        Config::new(Options {
            capture_device_info: Some(false),
            ..Options::new(server.url(), "r1")
        })
        .expect("valid config"),
    )
    .transport(transport.clone())
    .location(|| "https://shop.test/checkout".to_string())
    .init();

    agent.record_event("payment_declined", json!({"amount": 42}), Some(json!({"ticket": "INC-7"})));

    wait_until_matched(&mock, &transport).await;
    mock.assert_async().await;
}
