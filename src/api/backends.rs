use axum::extract::State;
use axum::Json;

use crate::models::BackendSummary;
use crate::state::AppState;

/// GET /api/v1/backends - What every backend last advertised
pub async fn list_backends(State(state): State<AppState>) -> Json<Vec<BackendSummary>> {
    let summaries = state
        .backends
        .iter()
        .map(|(id, pool)| BackendSummary {
            id: id.to_string(),
            addr: pool.address().to_string(),
            info: pool.info(),
            pool: pool.stats(),
        })
        .collect();
    Json(summaries)
}
