use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use chat_relay::config::{AppConfig, MeteringConfig, UpstreamConfig};
use chat_relay::routing::dispatch::dispatch_request;
use chat_relay::state::AppState;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;

const ENTRY_WAIT: Duration = Duration::from_secs(5);

fn delta(content: &str) -> String {
    let payload = json!({
        "id": "chatcmpl_mock",
        "object": "chat.completion.chunk",
        "choices": [{"index": 0, "delta": {"content": content}, "finish_reason": null}]
    });
    format!("data: {payload}\n\n")
}

async fn spawn(app: Router) -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server");
    let addr = listener.local_addr().expect("local addr");
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (addr, server)
}

async fn spawn_event_stream_upstream(body: String) -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(move || {
            let body = body.clone();
            async move {
                (
                    [(header::CONTENT_TYPE, "text/event-stream")],
                    body,
                )
                    .into_response()
            }
        }),
    );
    spawn(app).await
}

async fn record_entry(
    State(entries): State<mpsc::UnboundedSender<Value>>,
    Json(entry): Json<Value>,
) -> Json<Value> {
    let _ = entries.send(entry);
    Json(json!({"ok": true}))
}

async fn spawn_collector() -> (
    SocketAddr,
    mpsc::UnboundedReceiver<Value>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let app = Router::new()
        .route("/api/entry", post(record_entry))
        .with_state(tx);
    let (addr, server) = spawn(app).await;
    (addr, rx, server)
}

fn build_state(upstream: &str, stat_url: Option<String>) -> Arc<AppState> {
    let config = AppConfig {
        upstream: UpstreamConfig {
            base_url: upstream.to_string(),
            api_key: Some("upstream-secret".to_string()),
            ..UpstreamConfig::default()
        },
        metering: MeteringConfig {
            stat_url,
            ..MeteringConfig::default()
        },
        ..AppConfig::default()
    };
    Arc::new(AppState::from_config(config).expect("state"))
}

fn chat_request(path: &str, access_code: &str, messages: &[&str]) -> Request<Body> {
    let messages: Vec<Value> = messages
        .iter()
        .map(|content| json!({"role": "user", "content": content}))
        .collect();
    let body = serde_json::to_vec(&json!({
        "model": "gpt-4o-mini",
        "stream": true,
        "messages": messages,
    }))
    .expect("serialize request");
    Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .header("access-code", access_code)
        .body(Body::from(body))
        .expect("build request")
}

async fn dispatch(state: Arc<AppState>, request: Request<Body>) -> Response {
    dispatch_request(state, Arc::<str>::from(""), request)
        .await
        .expect("dispatch")
}

/// Read the body until it ends or fails.
async fn read_stream(response: Response) -> (String, bool) {
    let mut stream = response.into_body().into_data_stream();
    let mut text = Vec::new();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => text.extend_from_slice(&bytes),
            Err(_) => return (String::from_utf8(text).expect("utf8"), true),
        }
    }
    (String::from_utf8(text).expect("utf8"), false)
}

async fn next_entry(entries: &mut mpsc::UnboundedReceiver<Value>) -> Value {
    tokio::time::timeout(ENTRY_WAIT, entries.recv())
        .await
        .expect("collector entry in time")
        .expect("collector open")
}

/// Collect `count` entries, then make sure nothing else arrives.
async fn exact_entries(entries: &mut mpsc::UnboundedReceiver<Value>, count: usize) -> Vec<Value> {
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(next_entry(entries).await);
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(entries.try_recv().is_err(), "unexpected extra usage entry");
    out
}

fn entry_of<'a>(entries: &'a [Value], direction: &str) -> &'a Value {
    entries
        .iter()
        .find(|entry| entry["type"] == direction)
        .unwrap_or_else(|| panic!("missing {direction} entry in {entries:?}"))
}

#[tokio::test]
async fn test_stream_is_relayed_and_metered_both_ways() {
    let mut upstream_body = delta("Hel");
    upstream_body.push_str(": keep-alive\n\n");
    upstream_body.push_str(&delta("lo"));
    upstream_body.push_str(&delta(" wörld"));
    upstream_body.push_str("data: [DONE]\n\n");
    let (upstream_addr, upstream) = spawn_event_stream_upstream(upstream_body).await;
    let (collector_addr, mut entries, collector) = spawn_collector().await;

    let state = build_state(
        &format!("http://{upstream_addr}"),
        Some(format!("http://{collector_addr}/")),
    );
    let response = dispatch(state, chat_request("/api/chat-stream", "team-a", &["ab", "cde"])).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()),
        Some("text/plain; charset=utf-8")
    );
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).and_then(|v| v.to_str().ok()),
        Some("no-cache")
    );

    let (text, failed) = read_stream(response).await;
    assert_eq!(text, "Hello wörld");
    assert!(!failed);

    let entries = exact_entries(&mut entries, 2).await;
    let request_entry = entry_of(&entries, "req");
    assert_eq!(request_entry["amount"], 5);
    assert_eq!(request_entry["code"], "team-a");
    let response_entry = entry_of(&entries, "res");
    assert_eq!(response_entry["amount"], 11);
    assert_eq!(response_entry["code"], "team-a");

    upstream.abort();
    collector.abort();
}

#[tokio::test]
async fn test_chat_completions_alias_uses_same_handler() {
    let mut upstream_body = delta("pong");
    upstream_body.push_str("data: [DONE]\n\n");
    let (upstream_addr, upstream) = spawn_event_stream_upstream(upstream_body).await;

    let state = build_state(&format!("http://{upstream_addr}"), None);
    let response = dispatch(state, chat_request("/v1/chat/completions", "", &["ping"])).await;
    let (text, failed) = read_stream(response).await;
    assert_eq!(text, "pong");
    assert!(!failed);

    upstream.abort();
}

#[tokio::test]
async fn test_non_stream_error_is_redacted_diagnostic() {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|| async {
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({
                    "error": {
                        "message": "Incorrect API key provided: sk-leaked-123. You can find your API key at https://platform.openai.com/account/api-keys.",
                        "type": "invalid_request_error",
                        "code": "invalid_api_key"
                    }
                })),
            )
        }),
    );
    let (upstream_addr, upstream) = spawn(app).await;
    let (collector_addr, mut entries, collector) = spawn_collector().await;

    let state = build_state(
        &format!("http://{upstream_addr}"),
        Some(format!("http://{collector_addr}")),
    );
    let response = dispatch(state, chat_request("/api/chat-stream", "team-b", &["hello"])).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let text = String::from_utf8(body.to_vec()).expect("utf8");
    assert!(text.starts_with("```json\n"));
    assert!(text.ends_with("\n```"));
    assert!(!text.contains("sk-leaked-123"));
    assert!(text.contains("provided: ***. You can find"));

    let entries = exact_entries(&mut entries, 1).await;
    assert_eq!(entries[0]["type"], "req");
    assert_eq!(entries[0]["amount"], 5);

    upstream.abort();
    collector.abort();
}

#[tokio::test]
async fn test_malformed_record_ends_stream_abnormally() {
    let mut upstream_body = delta("ok");
    upstream_body.push_str("data: {\"choices\": \n\n");
    upstream_body.push_str(&delta("never"));
    upstream_body.push_str("data: [DONE]\n\n");
    let (upstream_addr, upstream) = spawn_event_stream_upstream(upstream_body).await;
    let (collector_addr, mut entries, collector) = spawn_collector().await;

    let state = build_state(
        &format!("http://{upstream_addr}"),
        Some(format!("http://{collector_addr}")),
    );
    let response = dispatch(state, chat_request("/api/chat-stream", "team-c", &[""])).await;
    let (text, failed) = read_stream(response).await;
    assert_eq!(text, "ok");
    assert!(failed);

    let entries = exact_entries(&mut entries, 2).await;
    assert_eq!(entry_of(&entries, "req")["amount"], 0);
    assert_eq!(entry_of(&entries, "res")["amount"], 2);

    upstream.abort();
    collector.abort();
}

#[tokio::test]
async fn test_unreachable_upstream_still_meters_request() {
    let (collector_addr, mut entries, collector) = spawn_collector().await;
    let state = build_state("http://127.0.0.1:1", Some(format!("http://{collector_addr}")));

    let response = dispatch(state, chat_request("/api/chat-stream", "team-d", &["ab", "cde"])).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let text = String::from_utf8(body.to_vec()).expect("utf8");
    assert!(text.starts_with("```json\n"));
    assert!(text.contains("\"error\": \"transport\""));

    let entries = exact_entries(&mut entries, 1).await;
    assert_eq!(entries[0]["type"], "req");
    assert_eq!(entries[0]["amount"], 5);
    assert_eq!(entries[0]["code"], "team-d");

    collector.abort();
}

#[tokio::test]
async fn test_no_collector_calls_without_stat_url() {
    let mut upstream_body = delta("quiet");
    upstream_body.push_str("data: [DONE]\n\n");
    let (upstream_addr, upstream) = spawn_event_stream_upstream(upstream_body).await;
    let (_collector_addr, mut entries, collector) = spawn_collector().await;

    let state = build_state(&format!("http://{upstream_addr}"), None);
    let response = dispatch(state, chat_request("/api/chat-stream", "team-e", &["x"])).await;
    let (text, failed) = read_stream(response).await;
    assert_eq!(text, "quiet");
    assert!(!failed);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(entries.try_recv().is_err());

    upstream.abort();
    collector.abort();
}

#[tokio::test]
async fn test_configured_key_replaces_caller_authorization() {
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<Option<String>>();
    let app = Router::new()
        .route(
            "/v1/chat/completions",
            post(
                |State(seen): State<mpsc::UnboundedSender<Option<String>>>, headers: HeaderMap| async move {
                    let auth = headers
                        .get(header::AUTHORIZATION)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_owned);
                    let _ = seen.send(auth);
                    ([(header::CONTENT_TYPE, "text/event-stream")], "data: [DONE]\n\n")
                },
            ),
        )
        .with_state(seen_tx);
    let (upstream_addr, upstream) = spawn(app).await;

    let state = build_state(&format!("http://{upstream_addr}"), None);
    let mut request = chat_request("/api/chat-stream", "", &["x"]);
    request.headers_mut().insert(
        header::AUTHORIZATION,
        "Bearer caller-key".parse().expect("header"),
    );
    let response = dispatch(state, request).await;
    let (text, failed) = read_stream(response).await;
    assert_eq!(text, "");
    assert!(!failed);
    assert_eq!(
        seen_rx.recv().await.expect("seen").as_deref(),
        Some("Bearer upstream-secret")
    );

    upstream.abort();
}

#[tokio::test]
async fn test_health_and_unknown_routes() {
    let state = build_state("http://127.0.0.1:1", None);

    let health = dispatch(
        Arc::clone(&state),
        Request::builder()
            .method("GET")
            .uri("/")
            .body(Body::empty())
            .expect("request"),
    )
    .await;
    assert_eq!(health.status(), StatusCode::OK);
    let body = axum::body::to_bytes(health.into_body(), usize::MAX)
        .await
        .expect("body");
    let payload: Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(payload["config"]["metering_enabled"], false);
    assert!(!String::from_utf8_lossy(&body).contains("upstream-secret"));

    let missing = dispatch(
        Arc::clone(&state),
        Request::builder()
            .method("POST")
            .uri("/api/unknown")
            .body(Body::empty())
            .expect("request"),
    )
    .await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let wrong_method = dispatch(
        state,
        Request::builder()
            .method("GET")
            .uri("/api/chat-stream")
            .body(Body::empty())
            .expect("request"),
    )
    .await;
    assert_eq!(wrong_method.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let state = build_state("http://127.0.0.1:1", None);
    let request = Request::builder()
        .method("POST")
        .uri("/api/chat-stream")
        .body(Body::from(vec![b'a'; 2 * 1024 * 1024 + 1]))
        .expect("request");
    let response = dispatch(state, request).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}
