use std::convert::Infallible;
use std::env;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use http::{header, HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use tokio::net::TcpListener;

const DEFAULT_UPSTREAM_PORT: u16 = 19_001;

/// What `POST /v1/chat/completions` answers with.
#[derive(Copy, Clone)]
enum MockScenario {
    Stream,
    AuthError,
    Malformed,
    Truncated,
}

struct MockState {
    scenario: MockScenario,
    chat_requests: AtomicU64,
    usage_entries: AtomicU64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let port = env_u16("UPSTREAM_PORT", DEFAULT_UPSTREAM_PORT);
    let state = Arc::new(MockState {
        scenario: parse_scenario(),
        chat_requests: AtomicU64::new(0),
        usage_entries: AtomicU64::new(0),
    });

    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .unwrap_or_else(|err| panic!("failed to bind mock upstream on 127.0.0.1:{port}: {err}"));
    println!("mock chat upstream and usage collector on http://127.0.0.1:{port}");

    let conn_builder = AutoBuilder::new(TokioExecutor::new());
    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok((stream, remote_addr)) => (stream, remote_addr),
            Err(err) => {
                eprintln!("accept error: {err}");
                continue;
            }
        };
        let io = TokioIo::new(stream);
        let conn_builder = conn_builder.clone();
        let service_state = Arc::clone(&state);
        let service = service_fn(move |request: Request<Incoming>| {
            let state_ref = Arc::clone(&service_state);
            async move { Ok::<_, Infallible>(handle_request(request, &state_ref).await) }
        });

        tokio::spawn(async move {
            if let Err(err) = conn_builder.serve_connection(io, service).await {
                eprintln!("mock upstream connection error from {remote_addr}: {err}");
            }
        });
    }
}

fn env_u16(name: &str, default: u16) -> u16 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(default)
}

fn parse_scenario() -> MockScenario {
    match env::var("MOCK_SCENARIO").as_deref() {
        Ok("auth_error") => MockScenario::AuthError,
        Ok("malformed") => MockScenario::Malformed,
        Ok("truncated") => MockScenario::Truncated,
        Ok("stream") | Err(_) => MockScenario::Stream,
        Ok(other) => {
            eprintln!("unknown MOCK_SCENARIO '{other}', fallback to stream");
            MockScenario::Stream
        }
    }
}

async fn handle_request(request: Request<Incoming>, state: &MockState) -> Response<Full<Bytes>> {
    let (parts, body) = request.into_parts();
    let body = read_body(body).await;

    let path = parts.uri.path();
    if parts.method == Method::GET && path == "/_mock/stats" {
        return stats_response(state);
    }
    if parts.method != Method::POST {
        return simple_response_static(
            StatusCode::METHOD_NOT_ALLOWED,
            "application/json",
            br#"{"error":"method_not_allowed"}"#,
        );
    }

    match path {
        "/api/entry" => {
            let seen = state.usage_entries.fetch_add(1, Ordering::Relaxed) + 1;
            println!("usage entry #{seen}: {}", String::from_utf8_lossy(&body));
            simple_response_static(StatusCode::OK, "application/json", br#"{"ok":true}"#)
        }
        "/v1/chat/completions" | "/chat/completions" => {
            state.chat_requests.fetch_add(1, Ordering::Relaxed);
            chat_response(state.scenario)
        }
        _ => simple_response_static(
            StatusCode::NOT_FOUND,
            "application/json",
            br#"{"error":"not_found"}"#,
        ),
    }
}

async fn read_body(body: Incoming) -> Bytes {
    match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => Bytes::new(),
    }
}

fn stats_response(state: &MockState) -> Response<Full<Bytes>> {
    let chat = state.chat_requests.load(Ordering::Relaxed);
    let usage = state.usage_entries.load(Ordering::Relaxed);
    let body = format!("{{\"chat_requests\":{chat},\"usage_entries\":{usage}}}");
    simple_response(StatusCode::OK, "application/json", Bytes::from(body.into_bytes()))
}

fn chat_response(scenario: MockScenario) -> Response<Full<Bytes>> {
    let (status, content_type, body) = match scenario {
        MockScenario::Stream => (StatusCode::OK, "text/event-stream", CHAT_STREAM_TEXT),
        MockScenario::Malformed => (StatusCode::OK, "text/event-stream", CHAT_STREAM_MALFORMED),
        MockScenario::Truncated => (StatusCode::OK, "text/event-stream", CHAT_STREAM_TRUNCATED),
        MockScenario::AuthError => (StatusCode::UNAUTHORIZED, "application/json", CHAT_AUTH_ERROR),
    };
    let mut response = simple_response_static(status, content_type, body);
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

fn simple_response(
    status: StatusCode,
    content_type: &'static str,
    body: Bytes,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn simple_response_static(
    status: StatusCode,
    content_type: &'static str,
    body: &'static [u8],
) -> Response<Full<Bytes>> {
    simple_response(status, content_type, Bytes::from_static(body))
}

const CHAT_STREAM_TEXT: &[u8] = b"data: {\"id\":\"chatcmpl-mock\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m1\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"},\"finish_reason\":null}]}\n\n: keep-alive\n\ndata: {\"id\":\"chatcmpl-mock\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hello\"},\"finish_reason\":null}]}\n\ndata: {\"id\":\"chatcmpl-mock\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\", w\xc3\xb6rld\"},\"finish_reason\":null}]}\n\ndata: {\"id\":\"chatcmpl-mock\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m1\",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\ndata: [DONE]\n\n";
const CHAT_STREAM_MALFORMED: &[u8] = b"data: {\"id\":\"chatcmpl-mock\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"partial\"},\"finish_reason\":null}]}\n\ndata: {\"choices\": oops}\n\ndata: [DONE]\n\n";
const CHAT_STREAM_TRUNCATED: &[u8] = b"data: {\"id\":\"chatcmpl-mock\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"cut\"},\"finish_reason\":null}]}\n\n";
const CHAT_AUTH_ERROR: &[u8] = br#"{"error":{"message":"Incorrect API key provided: sk-mock-0000. You can find your API key at https://platform.openai.com/account/api-keys.","type":"invalid_request_error","param":null,"code":"invalid_api_key"}}"#;
