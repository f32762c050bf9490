use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use chat_relay::config::{load_config, AppConfig};
use chat_relay::observability::init_tracing;
use chat_relay::routing::dispatch::{dispatch_request, normalize_base_path};
use chat_relay::state::AppState;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;

fn main() {
    let config_path = std::env::var("CHAT_RELAY_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
    let config = load_config(&config_path).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration from {config_path}: {e}");
        eprintln!("Please copy 'config.example.yaml' to 'config.yaml' and modify as needed.");
        std::process::exit(1);
    });

    init_tracing(&config.features.log_level);
    let runtime = build_runtime(&config);

    runtime.block_on(async move {
        run(config).await;
    });
}

fn build_runtime(config: &AppConfig) -> tokio::runtime::Runtime {
    let worker_threads = config.server.runtime_worker_threads;
    let mut runtime_builder = if worker_threads == Some(1) {
        tokio::runtime::Builder::new_current_thread()
    } else {
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        if let Some(threads) = worker_threads {
            builder.worker_threads(threads);
        }
        builder
    };
    runtime_builder.enable_io();
    runtime_builder.enable_time();
    runtime_builder.build().unwrap_or_else(|e| {
        eprintln!("Failed to initialize Tokio runtime: {e}");
        std::process::exit(1);
    })
}

async fn run(config: AppConfig) {
    let host = config.server.host.clone();
    let port = config.server.port;
    let base_path = normalize_base_path(&config.server.base_path);

    let state = match AppState::from_config(config) {
        Ok(state) => Arc::new(state),
        Err(err) => {
            eprintln!("Failed to initialize relay: {err}");
            std::process::exit(1);
        }
    };
    let dispatch_base_path = Arc::<str>::from(base_path.clone());

    tracing::info!(
        upstream = state.relay.upstream().chat_url().as_str(),
        metering_enabled = state.relay.metering().is_enabled(),
        "chat-relay starting on {}:{} with base_path='{}'",
        host,
        port,
        base_path
    );

    let listener = tokio::net::TcpListener::bind(format!("{host}:{port}"))
        .await
        .unwrap_or_else(|err| {
            eprintln!("Failed to bind to {host}:{port}: {err}");
            std::process::exit(1);
        });

    tracing::info!("chat-relay is ready to accept connections");
    serve_accept_loop(
        listener,
        AutoBuilder::new(TokioExecutor::new()),
        state,
        dispatch_base_path,
    )
    .await;
}

async fn serve_accept_loop(
    listener: tokio::net::TcpListener,
    conn_builder: AutoBuilder<TokioExecutor>,
    dispatch_state: Arc<AppState>,
    dispatch_base_path: Arc<str>,
) {
    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok((stream, remote_addr)) => (stream, remote_addr),
            Err(err) => {
                tracing::warn!("accept error: {err}");
                continue;
            }
        };

        if let Err(err) = stream.set_nodelay(true) {
            tracing::debug!("failed to enable TCP_NODELAY for {remote_addr}: {err}");
        }

        let io = TokioIo::new(stream);
        let conn_builder = conn_builder.clone();
        let request_state = Arc::clone(&dispatch_state);
        let request_base_path = Arc::clone(&dispatch_base_path);
        let hyper_service = service_fn(move |request: Request<Incoming>| {
            dispatch_request(
                Arc::clone(&request_state),
                Arc::clone(&request_base_path),
                request.map(Body::new),
            )
        });

        tokio::spawn(async move {
            if let Err(err) = conn_builder.serve_connection(io, hyper_service).await {
                tracing::debug!("failed to serve connection from {remote_addr}: {err:#}");
            }
        });
    }
}
