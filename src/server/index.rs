//! Index sync routes

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::error;

use super::search::error_response;
use super::state::ServerState;

#[derive(Deserialize)]
struct IndexParams {
    tenant_id: String,
}

#[derive(Serialize)]
struct IndexQueued {
    case_id: String,
    backends: Vec<String>,
}

/// POST /index/{case_id} - Queue a stored case for sync into the retrieval backends
async fn reindex_case(
    State(state): State<ServerState>,
    Path(case_id): Path<String>,
    Query(params): Query<IndexParams>,
) -> Response {
    let Some(syncer) = &state.index_syncer else {
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "No index backends configured",
        );
    };

    let case = match state.case_store.get_case(&params.tenant_id, &case_id) {
        Ok(Some(case)) => case,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            error!("Failed to load case {}: {:#}", case_id, e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if !syncer.enqueue_case(&case) {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "Index sync queue is full");
    }

    (
        StatusCode::ACCEPTED,
        Json(IndexQueued {
            case_id,
            backends: syncer.backends().to_vec(),
        }),
    )
        .into_response()
}

pub fn make_index_routes(state: ServerState) -> Router {
    Router::new()
        .route("/index/{case_id}", post(reindex_case))
        .with_state(state)
}
