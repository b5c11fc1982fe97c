use alert_dispatcher::db::{AlertStore, StoreError};
use alert_dispatcher::dispatch::{DispatchOptions, Dispatcher};
use alert_dispatcher::model::{AlertId, AlertRecord};
use alert_dispatcher::push::{DeliveryError, Notifier, PushClient};
use async_trait::async_trait;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;

type Received = Arc<Mutex<Vec<Value>>>;

async fn fake_send(
    State(received): State<Received>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if headers.get("authorization").and_then(|h| h.to_str().ok()) != Some("key=test-key") {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "bad key" })));
    }
    received.lock().await.push(payload.clone());
    match payload["to"].as_str().unwrap_or_default() {
        "stale" => (
            StatusCode::OK,
            Json(json!({ "success": 0, "failure": 1, "results": [{ "error": "NotRegistered" }] })),
        ),
        "busy" => (StatusCode::TOO_MANY_REQUESTS, Json(json!({ "error": "quota" }))),
        _ => (
            StatusCode::OK,
            Json(json!({ "success": 1, "failure": 0, "results": [{ "message_id": "0:1" }] })),
        ),
    }
}

/// Start a local push endpoint and return its send URL plus the payloads it receives.
async fn spawn_push_server() -> (Url, Received) {
    let received: Received = Arc::default();
    let app = Router::new()
        .route("/fcm/send", post(fake_send))
        .with_state(received.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let url = Url::parse(&format!("http://{addr}/fcm/send")).unwrap();
    (url, received)
}

#[tokio::test]
async fn delivers_payload_with_server_key() {
    let (url, received) = spawn_push_server().await;
    let client = PushClient::new(url, "test-key".into()).unwrap();

    client.send("good", "Pipeline review", "3 deals need follow-up").await.unwrap();

    let payloads = received.lock().await.clone();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0]["to"], "good");
    assert_eq!(payloads[0]["notification"]["title"], "Pipeline review");
    assert_eq!(payloads[0]["notification"]["body"], "3 deals need follow-up");
}

#[tokio::test]
async fn maps_endpoint_failures() {
    let (url, _received) = spawn_push_server().await;
    let client = PushClient::new(url.clone(), "test-key".into()).unwrap();

    assert!(matches!(
        client.send("stale", "t", "b").await,
        Err(DeliveryError::InvalidToken)
    ));
    assert!(matches!(
        client.send("busy", "t", "b").await,
        Err(DeliveryError::Quota(_))
    ));

    let wrong_key = PushClient::new(url, "other".into()).unwrap();
    assert!(matches!(
        wrong_key.send("good", "t", "b").await,
        Err(DeliveryError::Rejected { status: 401, .. })
    ));
}

#[tokio::test]
async fn unreachable_endpoint_is_a_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let url = Url::parse(&format!("http://{addr}/fcm/send")).unwrap();
    let client = PushClient::new(url, "test-key".into()).unwrap();

    assert!(matches!(
        client.send("good", "t", "b").await,
        Err(DeliveryError::Transport(_))
    ));
}

struct FixedStore {
    records: Vec<AlertRecord>,
    committed: Mutex<Vec<AlertId>>,
}

#[async_trait]
impl AlertStore for FixedStore {
    async fn query_due(&self, _now: DateTime<Utc>) -> Result<Vec<AlertRecord>, StoreError> {
        Ok(self.records.clone())
    }

    async fn commit_marks(&self, ids: &BTreeSet<AlertId>) -> Result<u64, StoreError> {
        self.committed.lock().await.extend(ids.iter().cloned());
        Ok(ids.len() as u64)
    }
}

#[tokio::test]
async fn dispatcher_over_http_push_counts_each_result() {
    let (url, received) = spawn_push_server().await;
    let client = PushClient::new(url, "test-key".into()).unwrap();
    let record = |id: &str, token: &str| AlertRecord {
        id: AlertId::new(id),
        due_at: Utc::now(),
        sent: false,
        device_token: Some(token.to_string()),
        title: "Reminder".into(),
        body: "Submit the monthly report".into(),
    };
    let store = Arc::new(FixedStore {
        records: vec![record("a", "good"), record("b", "stale"), record("c", "busy")],
        committed: Mutex::default(),
    });

    let dispatcher = Dispatcher::new(store.clone(), Arc::new(client), DispatchOptions::default());
    let summary = dispatcher.execute().await.unwrap();

    assert_eq!(summary.delivered, 1);
    assert_eq!(summary.delivery_failed, 2);
    assert_eq!(summary.committed, 3);
    assert_eq!(received.lock().await.len(), 3);
    assert_eq!(store.committed.lock().await.len(), 3);
}
