//! End-to-end router scenarios against the in-memory backend, covering the
//! concrete examples and quantified invariants spelled out for the ingress
//! side of the messaging gateway: dedup idempotence, status monotonicity,
//! signature rejection, and the stable 4xx diagnostic prefixes every
//! provider integration promises callers.

use std::sync::Arc;

use bytes::Bytes;
use courier::adapters::dk::DkHandler;
use courier::backend::Backend;
use courier::adapters::fba::FbaHandler;
use courier::config::CourierConfig;
use courier::registry::Registry;
use courier::router::{self, AppState};
use courier::sender::{RetryPolicy, Sender};
use courier_backend_memory::InMemoryBackend;
use http_body_util::BodyExt;
use tower::ServiceExt;
use uuid::Uuid;

fn build_app(backend: Arc<InMemoryBackend>) -> axum::Router {
    let registry = Arc::new(
        Registry::builder()
            .register(Arc::new(DkHandler::default()))
            .register(Arc::new(FbaHandler::default()))
            .build(),
    );
    let (sender, sender_handle) = Sender::new(
        backend.clone(),
        registry.clone(),
        reqwest::Client::new(),
        3,
        10,
        RetryPolicy::default(),
        tokio_util::sync::CancellationToken::new(),
    );
    // Never run: this test only exercises the ingress path, but AppState
    // needs a handle to construct.
    drop(sender);

    let state = AppState {
        registry,
        backend,
        config: Arc::new(CourierConfig::default()),
        http: reqwest::Client::new(),
        sender: sender_handle,
    };
    router::build(state)
}

async fn post(app: &axum::Router, path: &str, body: &'static [u8]) -> (axum::http::StatusCode, String) {
    let request = axum::http::Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/x-www-form-urlencoded")
        .body(axum::body::Body::from(Bytes::from_static(body)))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&body).to_string())
}

async fn get(app: &axum::Router, path: &str) -> (axum::http::StatusCode, String) {
    let request = axum::http::Request::builder()
        .method("GET")
        .uri(path)
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&body).to_string())
}

fn seed_dk_channel(backend: &InMemoryBackend) -> Uuid {
    let uuid = Uuid::new_v4();
    backend.seed_channel(courier::model::Channel {
        uuid,
        channel_type: "dk".to_string(),
        name: "demo aggregator".to_string(),
        address: None,
        config: std::collections::HashMap::new(),
        is_active: true,
    });
    uuid
}

fn seed_fba_channel(backend: &InMemoryBackend, secret: &str) -> Uuid {
    let uuid = Uuid::new_v4();
    let mut config = std::collections::HashMap::new();
    config.insert("app_secret".to_string(), serde_json::json!(secret));
    backend.seed_channel(courier::model::Channel {
        uuid,
        channel_type: "fba".to_string(),
        name: "demo page".to_string(),
        address: None,
        config,
        is_active: true,
    });
    uuid
}

fn hmac_sha1_header(secret: &str, body: &[u8]) -> String {
    use hmac::Mac;
    let mut mac = <hmac::Hmac<sha1::Sha1> as hmac::digest::KeyInit>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    let hex: String = mac.finalize().into_bytes().iter().map(|b| format!("{:02x}", b)).collect();
    format!("sha1={hex}")
}

/// Scenario 1: generic form-posted SMS receive.
#[tokio::test]
async fn generic_form_posted_sms_receive() {
    let backend = Arc::new(InMemoryBackend::new());
    let channel_uuid = seed_dk_channel(&backend);
    let app = build_app(backend.clone());

    let path = format!("/c/dk/{channel_uuid}/receive");
    let body = b"text=Msg&short_code=2020&tstamp=2017-10-26T15%3A51%3A32.906335%2B00%3A00&msisdn=254791541111";
    let (status, response_body) = post(&app, &path, body).await;

    assert_eq!(status, axum::http::StatusCode::OK);
    assert!(response_body.contains("Message Accepted"));
    assert!(response_body.contains("tel:+254791541111"));
}

/// Scenario 3: invalid phone number is rejected with the stable diagnostic.
#[tokio::test]
async fn invalid_phone_number_is_rejected() {
    let backend = Arc::new(InMemoryBackend::new());
    let channel_uuid = seed_dk_channel(&backend);
    let app = build_app(backend.clone());

    let path = format!("/c/dk/{channel_uuid}/receive");
    let (status, response_body) = post(&app, &path, b"msisdn=MTN&text=hi").await;

    assert_eq!(status, axum::http::StatusCode::BAD_REQUEST);
    assert_eq!(response_body, "not a possible number");
    assert!(backend.channel_logs().iter().any(|l| l.is_error));
}

/// Scenario 2: a status callback transitions the referenced message.
#[tokio::test]
async fn status_callback_resolves_by_external_id() {
    let backend = Arc::new(InMemoryBackend::new());
    let channel_uuid = seed_dk_channel(&backend);
    let app = build_app(backend.clone());

    // The external id has to resolve to a known message before a status
    // callback addressed by it can land: simulate the Sender having queued
    // the message on this channel and then wired it, recording the
    // provider's own id, the way `sender::process` does after a send.
    let urn = courier::urn::Urn::tel("+254791541111").unwrap();
    let msg = courier::model::MsgOut::new(channel_uuid, urn, "hi");
    let msg_uuid = msg.uuid;
    backend.enqueue_outgoing(msg);
    backend
        .write_status_update(courier::model::StatusUpdate::for_msg(msg_uuid, courier::model::Status::Wired).with_external_id("12345"))
        .await
        .unwrap();

    let path = format!("/c/dk/{channel_uuid}/status?id=12345&status=1");
    let (status, response_body) = get(&app, &path).await;

    assert_eq!(status, axum::http::StatusCode::OK);
    assert!(response_body.contains("\"status\":\"D\""));

    let updates = backend.status_updates_for(msg_uuid);
    assert_eq!(updates.last().unwrap().status.code(), "D");
}

/// Scenario 4 / signature-rejection invariant: a bad signature yields a 400
/// and zero backend writes.
#[tokio::test]
async fn bad_signature_is_rejected_with_zero_writes() {
    let backend = Arc::new(InMemoryBackend::new());
    let channel_uuid = seed_fba_channel(&backend, "shh");
    let app = build_app(backend.clone());

    let body: &[u8] = br#"{"entry":[{"messaging":[{"sender":{"id":"psid-1"},"message":{"mid":"m1","text":"hi"}}]}]}"#;
    let request = axum::http::Request::builder()
        .method("POST")
        .uri(format!("/c/fba/{channel_uuid}/receive"))
        .header("content-type", "application/json")
        .header("X-Hub-Signature", "sha1=deadbeefdeadbeefdeadbeefdeadbeefdeadbeef")
        .body(axum::body::Body::from(Bytes::from_static(body)))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
    let response_body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(String::from_utf8_lossy(&response_body), "invalid request signature");
    assert!(backend.channel_events().is_empty());

    // A correctly signed request for the same payload is accepted, proving
    // the rejection above was about the signature and nothing else.
    let header = hmac_sha1_header("shh", body);
    let request = axum::http::Request::builder()
        .method("POST")
        .uri(format!("/c/fba/{channel_uuid}/receive"))
        .header("content-type", "application/json")
        .header("X-Hub-Signature", header)
        .body(axum::body::Body::from(Bytes::from_static(body)))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);
}

/// Dedup idempotence: the identical webhook delivered twice persists exactly
/// one MsgIn and both calls return 2xx.
#[tokio::test]
async fn duplicate_webhook_is_absorbed_idempotently() {
    let backend = Arc::new(InMemoryBackend::new());
    let channel_uuid = seed_dk_channel(&backend);
    let app = build_app(backend.clone());

    let path = format!("/c/dk/{channel_uuid}/receive");
    let body: &[u8] = b"id=ext-1&text=hi&msisdn=254791541111";

    let (first_status, first_body) = post(&app, &path, body).await;
    let (second_status, second_body) = post(&app, &path, body).await;

    assert_eq!(first_status, axum::http::StatusCode::OK);
    assert_eq!(second_status, axum::http::StatusCode::OK);
    assert!(first_body.contains("Message Accepted"));
    assert!(second_body.contains("ignoring"));
}
