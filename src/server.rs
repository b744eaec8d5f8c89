use crate::config::Config;
use crate::constants::{DURATION_HEADER, NOTHING_TO_INGEST};
use crate::error::{GatewayError, Result};
use crate::gateway::Gateway;
use crate::ingest::{self, dispatch, IngestPath, Mode};
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::{HeaderValue, Method, Request, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use hyper::Server;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub fast_workers: usize,
}

impl AppState {
    pub fn new(gateway: Arc<Gateway>, fast_workers: usize) -> Self {
        Self {
            gateway,
            fast_workers,
        }
    }

    fn fast_mode(&self) -> Mode {
        Mode::Concurrent {
            workers: self.fast_workers,
        }
    }
}

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "datalake-gateway",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn metrics_endpoint() -> impl IntoResponse {
    match crate::metrics::render() {
        Some(body) => (StatusCode::OK, body).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}

fn timed(route: &'static str, started: Instant, mut response: Response) -> Response {
    let elapsed = started.elapsed();
    crate::metrics::gateway::request_duration(route, elapsed.as_secs_f64());
    if let Ok(value) = HeaderValue::from_str(&elapsed.as_millis().to_string()) {
        response.headers_mut().insert(DURATION_HEADER, value);
    }
    info!(route, status = response.status().as_u16(), elapsed_ms = elapsed.as_millis() as u64, "ingest request");
    response
}

async fn ingest_csv(State(state): State<AppState>, req: Request<Body>) -> Response {
    let started = Instant::now();
    crate::metrics::gateway::request("/ingest/csv");
    let result = async {
        let files = dispatch::collect_files(req, &state).await?;
        ingest::ingest_files(&state.gateway, files, Mode::Sequential).await
    }
    .await;
    let response = match result {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(e) => e.into_response(),
    };
    timed("/ingest/csv", started, response)
}

async fn ingest_blob(State(state): State<AppState>, req: Request<Body>) -> Response {
    let started = Instant::now();
    crate::metrics::gateway::request("/ingest/blob");
    let result = async {
        let body = dispatch::read_body(req, &state).await?;
        ingest::ingest_blobs(&state.gateway, body, Mode::Sequential).await
    }
    .await;
    let response = match result {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(e) => e.into_response(),
    };
    timed("/ingest/blob", started, response)
}

/// Client errors are reported inside the nested key; anything else fails
/// the whole request.
fn nested<T: serde::Serialize>(key: &str, result: Result<T>) -> Result<(StatusCode, Value)> {
    match result {
        Ok(body) => Ok((StatusCode::OK, json!({ key: serde_json::to_value(body)? }))),
        Err(e) if e.status().is_client_error() => {
            Ok((e.status(), json!({ key: { "error": e.to_string() } })))
        }
        Err(e) => Err(e),
    }
}

async fn dispatch_ingest(state: &AppState, req: Request<Body>, mode: Mode) -> Result<(StatusCode, Value)> {
    match IngestPath::from_headers(req.headers()) {
        IngestPath::Files => {
            let files = dispatch::collect_files(req, state).await?;
            if files.is_empty() {
                return Err(GatewayError::BadRequest(NOTHING_TO_INGEST.to_string()));
            }
            nested("csv", ingest::ingest_files(&state.gateway, files, mode).await)
        }
        IngestPath::Blobs => {
            let body = dispatch::read_body(req, state).await?;
            nested("blobs", ingest::ingest_blobs(&state.gateway, body, mode).await)
        }
        IngestPath::Unsupported => Err(GatewayError::BadRequest(NOTHING_TO_INGEST.to_string())),
    }
}

async fn ingest_any(State(state): State<AppState>, req: Request<Body>) -> Response {
    let started = Instant::now();
    crate::metrics::gateway::request("/ingest");
    let response = match dispatch_ingest(&state, req, Mode::Sequential).await {
        Ok((status, body)) => (status, Json(body)).into_response(),
        Err(e) => e.into_response(),
    };
    timed("/ingest", started, response)
}

/// Same contract as `/ingest`; files are parsed and staged concurrently.
async fn ingest_fast(State(state): State<AppState>, req: Request<Body>) -> Response {
    let started = Instant::now();
    crate::metrics::gateway::request("/ingest/fast");
    let mode = state.fast_mode();
    let response = match dispatch_ingest(&state, req, mode).await {
        Ok((status, body)) => (status, Json(body)).into_response(),
        Err(e) => e.into_response(),
    };
    timed("/ingest/fast", started, response)
}

/// Create the HTTP router with all routes
pub fn create_server(state: AppState, max_body_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/ingest", post(ingest_any))
        .route("/ingest/csv", post(ingest_csv))
        .route("/ingest/blob", post(ingest_blob))
        .route("/ingest/fast", post(ingest_fast))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Start the HTTP server described by `config`
pub async fn start_server(config: &Config) -> anyhow::Result<()> {
    let gateway = Arc::new(Gateway::open(&config.gateway.data_root)?);
    let state = AppState::new(gateway, config.gateway.fast_workers);
    let app = create_server(state, config.server.max_body_bytes);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("HTTP server running on http://{}", addr);
    info!("Ingest endpoints: /ingest, /ingest/csv, /ingest/blob, /ingest/fast");

    Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for shutdown signal: {}", e);
    }
    info!("shutdown signal received");
}
