//! Request fabric against a local axum server.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use common::{CancellationSource, OperationContext, Tenant, TransactionId};
use rest_client::{Backoff, RequestError, RequestOptions, RestClient};
use serde_json::{Value, json};
use uuid::Uuid;

#[derive(Default)]
struct Counters {
    flaky: AtomicU32,
}

async fn echo_headers(headers: HeaderMap) -> Json<Value> {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };
    Json(json!({
        "tenant": get("TENANT_ID"),
        "region": get("REGION"),
        "span": get("SPAN_ID"),
        "transaction": get("TRANSACTION_ID"),
    }))
}

async fn flaky(State(counters): State<Arc<Counters>>) -> Result<Json<Value>, StatusCode> {
    if counters.flaky.fetch_add(1, Ordering::SeqCst) < 2 {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    } else {
        Ok(Json(json!({"ok": true})))
    }
}

async fn slow() -> Json<Value> {
    tokio::time::sleep(Duration::from_secs(2)).await;
    Json(json!({}))
}

async fn accepted(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    (StatusCode::ACCEPTED, Json(json!({"echo": body})))
}

async fn spawn_server() -> (String, Arc<Counters>) {
    let counters = Arc::new(Counters::default());
    let app = Router::new()
        .route("/headers", get(echo_headers))
        .route("/flaky", get(flaky))
        .route("/slow", get(slow))
        .route("/accepted", post(accepted))
        .route("/bad", get(|| async { (StatusCode::BAD_REQUEST, "nope") }))
        .route("/conflict", get(|| async { StatusCode::CONFLICT }))
        .with_state(counters.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), counters)
}

fn ctx() -> OperationContext {
    OperationContext::new(Tenant::new(Uuid::new_v4(), "GMS", 83, 1))
}

fn fast_retries(retries: u32) -> RequestOptions {
    RequestOptions::new()
        .retries(retries)
        .backoff(Backoff::new(Duration::from_millis(1), Duration::from_millis(5)))
}

#[tokio::test]
async fn tenant_and_span_headers_are_propagated() {
    let (url, _) = spawn_server().await;
    let client = RestClient::new(url);
    let tx = TransactionId::new();
    let ctx = ctx().with_transaction(tx);

    let body: Value = client
        .get(&ctx, "/headers", &RequestOptions::new())
        .await
        .unwrap();

    assert_eq!(body["tenant"], ctx.tenant().id().to_string());
    assert_eq!(body["region"], "GMS");
    assert_eq!(body["span"], ctx.span_id().as_str());
    assert_eq!(body["transaction"], tx.to_string());
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let (url, counters) = spawn_server().await;
    let client = RestClient::new(url);

    let body: Value = client.get(&ctx(), "/flaky", &fast_retries(3)).await.unwrap();
    assert_eq!(body["ok"], true);
    assert_eq!(counters.flaky.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn single_attempt_by_default() {
    let (url, counters) = spawn_server().await;
    let client = RestClient::new(url);

    let err = client
        .get::<Value>(&ctx(), "/flaky", &RequestOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::Status { status: 503, .. }));
    assert_eq!(counters.flaky.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn status_codes_map_to_errors() {
    let (url, _) = spawn_server().await;
    let client = RestClient::new(url);
    let ctx = ctx();

    let bad = client.get::<Value>(&ctx, "/bad", &fast_retries(3)).await.unwrap_err();
    assert!(matches!(bad, RequestError::BadRequest(body) if body == "nope"));

    let missing = client.get::<Value>(&ctx, "/missing", &fast_retries(3)).await.unwrap_err();
    assert!(matches!(missing, RequestError::NotFound));

    let conflict = client.get::<Value>(&ctx, "/conflict", &fast_retries(3)).await.unwrap_err();
    assert!(matches!(conflict, RequestError::Status { status: 409, .. }));
}

#[tokio::test]
async fn accepted_response_is_decoded() {
    let (url, _) = spawn_server().await;
    let client = RestClient::new(url);

    let body: Value = client
        .post(&ctx(), "/accepted", &json!({"a": 1}), &RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(body["echo"]["a"], 1);
}

#[tokio::test]
async fn each_attempt_has_its_own_deadline() {
    let (url, _) = spawn_server().await;
    let client = RestClient::new(url);

    let err = client
        .get::<Value>(&ctx(), "/slow", &fast_retries(2).timeout(Duration::from_millis(50)))
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::Timeout(_)));
}

#[tokio::test]
async fn cancellation_aborts_the_call() {
    let (url, _) = spawn_server().await;
    let client = RestClient::new(url);
    let source = CancellationSource::new();
    let ctx = ctx().with_cancellation(source.token());

    let call = tokio::spawn(async move {
        client
            .get::<Value>(&ctx, "/slow", &RequestOptions::new().timeout(Duration::from_secs(5)))
            .await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    source.cancel();

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, RequestError::Cancelled));
}
