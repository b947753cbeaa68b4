use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;

use super::{client_error, pool_error, ApiError};
use crate::models::{SearchParams, SearchResponse};
use crate::query::parse_query;
use crate::state::AppState;

/// GET /api/v1/search?q= - Search the first configured backend
pub async fn search_default(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, ApiError> {
    run_search(&state, "", &params.q).await.map(Json)
}

/// GET /api/v1/search/{backend}?q= - Search one backend
pub async fn search_backend(
    State(state): State<AppState>,
    Path(backend): Path<String>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, ApiError> {
    run_search(&state, &backend, &params.q).await.map(Json)
}

pub async fn run_search(
    state: &AppState,
    backend: &str,
    q: &str,
) -> Result<SearchResponse, ApiError> {
    if q.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Query is required".to_string()));
    }
    let query = parse_query(q).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    let (id, pool) = state.backends.resolve(backend).map_err(pool_error)?;
    let timeout = state.config.query_timeout();

    let mut client = tokio::time::timeout(timeout, pool.check_out())
        .await
        .map_err(|_| timed_out(id))?
        .map_err(pool_error)?;
    let outcome = tokio::time::timeout(timeout, client.search(&query)).await;
    // a client abandoned mid-query is busy, so the pool closes and replaces it
    pool.check_in(client);

    let outcome = outcome.map_err(|_| timed_out(id))?.map_err(client_error)?;
    tracing::info!(
        "Search {:?} on {}: {} results ({})",
        query.line,
        id,
        outcome.results.len(),
        outcome.stats.why
    );
    Ok(SearchResponse {
        info: outcome.stats,
        results: outcome.results,
        search_type: "normal".to_string(),
    })
}

fn timed_out(backend: &str) -> ApiError {
    tracing::warn!("Search on {backend} timed out");
    (
        StatusCode::GATEWAY_TIMEOUT,
        format!("backend {backend} did not answer in time"),
    )
}
