//! HTTP query surface
//!
//! Thin JSON layer over `FlowQueryEngine`. Intended to sit behind a
//! reverse proxy; no auth or TLS here.
//!
//! - `GET /api/flows/search`
//! - `GET /api/flows/aggregate`
//! - `GET /api/flows/aggregate/by-address`
//! - `GET /api/health`

use crate::query::{
    AddressAggregationBucket, AggregateRequest, AggregationBucket, FlowQueryEngine, QueryError,
    SearchRequest, SearchResult,
};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

type SharedEngine = Arc<FlowQueryEngine>;

/// Error body: `{"error": "..."}`
#[derive(Debug)]
pub enum ApiError {
    Query(QueryError),
    Internal(String),
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        ApiError::Query(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Query(err) if err.is_input_error() => (StatusCode::BAD_REQUEST, err.to_string()),
            ApiError::Query(err) => {
                log::error!("❌ Query failed: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            ApiError::Internal(message) => {
                log::error!("❌ Query task failed: {}", message);
                (StatusCode::INTERNAL_SERVER_ERROR, message)
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub fn router(engine: SharedEngine) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/flows/search", get(search_flows))
        .route("/api/flows/aggregate", get(aggregate_flows))
        .route("/api/flows/aggregate/by-address", get(aggregate_flows_by_address))
        .with_state(engine)
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(
    addr: SocketAddr,
    engine: SharedEngine,
    shutdown: F,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    F: Future<Output = ()> + Send + 'static,
{
    log::info!("🌐 Listening for query traffic on {}", addr);
    axum::Server::bind(&addr)
        .serve(router(engine).into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Shutdown trigger for `serve`: resolves when `signal` fires.
///
/// If the signal handler cannot be installed the error is logged and the
/// future never resolves, so the server keeps running.
pub async fn shutdown_on<F>(signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => log::info!("⚠️  Received CTRL+C, shutting down..."),
        Err(err) => {
            log::error!("❌ Failed to listen for CTRL+C: {}", err);
            std::future::pending::<()>().await;
        }
    }
}

/// Run a query on the blocking pool; SQLite calls must not stall the
/// async workers.
async fn run_query<T, F>(engine: SharedEngine, query: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&FlowQueryEngine) -> Result<T, QueryError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || query(&engine))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(ApiError::from)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn search_flows(
    State(engine): State<SharedEngine>,
    Query(request): Query<SearchRequest>,
) -> Result<Json<SearchResult>, ApiError> {
    run_query(engine, move |engine| engine.search(&request))
        .await
        .map(Json)
}

async fn aggregate_flows(
    State(engine): State<SharedEngine>,
    Query(request): Query<AggregateRequest>,
) -> Result<Json<Vec<AggregationBucket>>, ApiError> {
    run_query(engine, move |engine| engine.aggregate(&request))
        .await
        .map(Json)
}

async fn aggregate_flows_by_address(
    State(engine): State<SharedEngine>,
    Query(request): Query<AggregateRequest>,
) -> Result<Json<Vec<AddressAggregationBucket>>, ApiError> {
    run_query(engine, move |engine| engine.aggregate_by_address(&request))
        .await
        .map(Json)
}
