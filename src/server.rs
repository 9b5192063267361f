//! HTTP search server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/search` | Parse the query, retrieve and rank listings |
//! | `POST` | `/search/stream` | Same, as a Server-Sent Events progress stream |
//! | `POST` | `/intent` | Parse a query into an intent without searching |
//! | `GET`  | `/health` | Health check (version, chat provider and whether it answers) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `store_error` (500), `timeout` (504).
//! Requests that run past `[server].request_timeout_secs` are abandoned,
//! dropping any in-flight provider or store call.
//!
//! Streaming requests report failures as a terminal `error` event instead.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser clients can
//! call the API directly.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use propsearch_core::intent::{FallbackReason, Intent};

use crate::config::Config;
use crate::events::{EventFrame, SearchPipeline};
use crate::llm::ChatProvider;
use crate::search::{split_outcome, SearchError, SearchRequest, SearchResponse};

const SSE_KEEP_ALIVE: Duration = Duration::from_secs(15);
const LLM_HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pipeline: SearchPipeline,
    config: Arc<Config>,
}

impl AppState {
    pub fn new(pipeline: SearchPipeline, config: Config) -> Self {
        Self {
            pipeline,
            config: Arc::new(config),
        }
    }
}

/// Starts the HTTP server on `[server].bind`.
///
/// Runs until the process is terminated. Returns an error if the database
/// cannot be opened, the chat provider is misconfigured, or binding fails.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pipeline = SearchPipeline::open(config).await?;
    let listener = TcpListener::bind(&config.server.bind).await?;
    println!("Search server listening on http://{}", listener.local_addr()?);
    serve(listener, AppState::new(pipeline, config.clone())).await
}

/// Serve `state` on an already-bound listener.
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    info!(addr = %listener.local_addr()?, "Serving search API");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/search", post(handle_search))
        .route("/search/stream", post(handle_search_stream))
        .route("/intent", post(handle_intent))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<SearchError> for AppError {
    fn from(e: SearchError) -> Self {
        match &e {
            SearchError::BadRequest(_) => bad_request(e.to_string()),
            SearchError::Store(_) => {
                error!(error = %e, "Search failed");
                store_error(e.to_string())
            }
            SearchError::Timeout(_) => timeout(e.to_string()),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(e: JsonRejection) -> Self {
        bad_request(e.body_text())
    }
}

/// Constructs a 400 Bad Request error.
fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

/// Constructs a 500 error for listing store failures.
fn store_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "store_error".to_string(),
        message: message.into(),
    }
}

/// Constructs a 504 error for requests that ran past their deadline.
fn timeout(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::GATEWAY_TIMEOUT,
        code: "timeout".to_string(),
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    llm: LlmStatus,
}

#[derive(Serialize)]
struct LlmStatus {
    enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reachable: Option<bool>,
}

/// Reports the configured chat provider and whether it answers a health
/// check. Search keeps working without it, so the server stays `ok`.
async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let provider = state.pipeline.intents.provider();
    let reachable = match provider {
        Some(p) => Some(provider_reachable(p.as_ref()).await),
        None => None,
    };
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        llm: LlmStatus {
            enabled: provider.is_some(),
            provider: provider.map(|p| p.name().to_string()),
            model: provider.map(|p| p.model().to_string()),
            reachable,
        },
    })
}

async fn provider_reachable(provider: &dyn ChatProvider) -> bool {
    match tokio::time::timeout(LLM_HEALTH_TIMEOUT, provider.health_check()).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(provider = provider.name(), error = %e, "Chat provider health check failed");
            false
        }
        Err(_) => {
            warn!(provider = provider.name(), "Chat provider health check timed out");
            false
        }
    }
}

// ============ POST /search ============

async fn handle_search(
    State(state): State<AppState>,
    body: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, AppError> {
    let Json(req) = body?;
    let resp = state
        .pipeline
        .search(&req, state.config.server.request_timeout())
        .await?;
    Ok(Json(resp))
}

// ============ POST /search/stream ============

/// Streams progress events. Each SSE frame carries the event name in
/// `event:` and the JSON payload in `data:`. Closing the connection cancels
/// the request.
async fn handle_search_stream(
    State(state): State<AppState>,
    body: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let Json(req) = body?;
    let events = state
        .pipeline
        .stream(req, state.config.server.request_timeout());

    let stream = stream::unfold(events, |mut events| async move {
        let frame = events.next().await?;
        Some((Ok(sse_event(&frame)), events))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(SSE_KEEP_ALIVE)))
}

fn sse_event(frame: &EventFrame) -> Event {
    Event::default()
        .event(frame.name())
        .data(frame.payload().to_string())
}

// ============ POST /intent ============

#[derive(Deserialize)]
struct IntentRequest {
    query: String,
}

#[derive(Serialize)]
struct IntentResponse {
    intent: Intent,
    fallback: Option<FallbackReason>,
}

async fn handle_intent(
    State(state): State<AppState>,
    body: Result<Json<IntentRequest>, JsonRejection>,
) -> Result<Json<IntentResponse>, AppError> {
    let Json(req) = body?;
    let query = req.query.trim();
    if query.is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let deadline = state.config.server.request_timeout();
    let outcome = tokio::time::timeout(deadline, state.pipeline.intents.parse(query))
        .await
        .map_err(|_| AppError::from(SearchError::Timeout(deadline)))?;
    let (intent, fallback) = split_outcome(outcome);
    Ok(Json(IntentResponse { intent, fallback }))
}
