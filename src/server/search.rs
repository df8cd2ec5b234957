//! Search API routes

use crate::case_store::CaseFilters;
use crate::search::SearchQuery;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::state::{GuardedOrchestrator, ServerState};

const DEFAULT_PAGE_SIZE: usize = 20;

#[derive(Deserialize)]
struct SearchBody {
    pub query: String,
    pub tenant_id: String,

    pub category_id: Option<String>,
    pub case_type: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,

    /// 1-based page number (default: 1)
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

#[derive(Serialize)]
pub(super) struct ErrorBody {
    pub error: String,
}

pub(super) fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

async fn search(
    State(orchestrator): State<GuardedOrchestrator>,
    Json(body): Json<SearchBody>,
) -> Response {
    let query = SearchQuery::new(body.query, body.tenant_id)
        .with_filters(CaseFilters {
            category_id: body.category_id,
            case_type: body.case_type,
            tags: body.tags,
        })
        .with_page(
            body.page.unwrap_or(1),
            body.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        );

    match orchestrator.search(&query).await {
        Ok(page) => {
            debug!(
                total = page.total,
                reranked_by = page.reranked_by,
                "Search served"
            );
            Json(page).into_response()
        }
        // Every SearchError is a rejected request
        Err(e) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

pub fn make_search_routes(state: ServerState) -> Router {
    Router::new()
        .route("/search", post(search))
        .with_state(state)
}
