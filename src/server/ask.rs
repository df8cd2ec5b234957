//! Question answering routes

use crate::agent::workflow::{Entity, EntityRelation, GraphState, SourceRef, WorkflowStep};
use crate::case_store::CaseFilters;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::time::Duration;
use tracing::{error, info};

use super::search::error_response;
use super::state::ServerState;

#[derive(Deserialize)]
struct AskBody {
    pub question: String,
    pub tenant_id: String,
    pub user_id: Option<String>,

    pub category_id: Option<String>,
    pub case_type: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Query string of the streaming endpoint. Tags are comma separated.
#[derive(Deserialize)]
struct AskStreamParams {
    question: String,
    tenant_id: String,
    user_id: Option<String>,
    category_id: Option<String>,
    case_type: Option<String>,
    tags: Option<String>,
}

#[derive(Serialize)]
struct GraphContext {
    entities: Vec<Entity>,
    relations: Vec<EntityRelation>,
}

#[derive(Serialize)]
struct AskResponse {
    answer: String,
    sources: Vec<SourceRef>,
    confidence: f64,
    low_confidence: bool,
    graph_context: GraphContext,
    cycles: u32,
}

impl From<GraphState> for AskResponse {
    fn from(state: GraphState) -> Self {
        Self {
            answer: state.answer.unwrap_or_default(),
            sources: state.sources,
            confidence: state.confidence.unwrap_or(0.0),
            low_confidence: state.low_confidence,
            graph_context: GraphContext {
                entities: state.graph_entities,
                relations: state.entity_relations,
            },
            cycles: state.cycle_count,
        }
    }
}

fn initial_state(
    question: String,
    tenant_id: String,
    user_id: Option<String>,
    filters: CaseFilters,
) -> Result<GraphState, Response> {
    if question.trim().is_empty() {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "Question must not be empty",
        ));
    }
    if tenant_id.trim().is_empty() {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "Tenant id must not be empty",
        ));
    }

    let mut state = GraphState::new(question, tenant_id).with_filters(filters);
    if let Some(user_id) = user_id {
        state = state.with_user(user_id);
    }
    Ok(state)
}

async fn ask(State(state): State<ServerState>, Json(body): Json<AskBody>) -> Response {
    let filters = CaseFilters {
        category_id: body.category_id,
        case_type: body.case_type,
        tags: body.tags,
    };
    let initial = match initial_state(body.question, body.tenant_id, body.user_id, filters) {
        Ok(initial) => initial,
        Err(response) => return response,
    };

    let run_id = initial.run_id.clone();
    let run = match state.executor.run(initial).await {
        Ok(run) => run,
        Err(e) => {
            error!(run_id = %run_id, error = %e, "Workflow aborted");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    let final_state = run.final_state;
    if final_state.step == WorkflowStep::Error {
        let message = final_state
            .error
            .unwrap_or_else(|| "Workflow failed".to_string());
        return error_response(StatusCode::BAD_GATEWAY, message);
    }

    info!(
        run_id = %run_id,
        confidence = final_state.confidence.unwrap_or(0.0),
        cycles = final_state.cycle_count,
        "Question answered"
    );
    Json(AskResponse::from(final_state)).into_response()
}

fn parse_tags(tags: Option<String>) -> Vec<String> {
    tags.map(|t| {
        t.split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect()
    })
    .unwrap_or_default()
}

async fn ask_stream(
    State(state): State<ServerState>,
    Query(params): Query<AskStreamParams>,
) -> Response {
    let filters = CaseFilters {
        category_id: params.category_id,
        case_type: params.case_type,
        tags: parse_tags(params.tags),
    };
    let initial = match initial_state(params.question, params.tenant_id, params.user_id, filters)
    {
        Ok(initial) => initial,
        Err(response) => return response,
    };

    // Dropping the SSE body drops the stream, which cancels the producer
    let answer_stream = state.emitter.stream(initial);
    let events = stream::unfold(answer_stream, |mut answer_stream| async move {
        let event = answer_stream.recv().await?;
        let json = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        Some((Ok::<_, Infallible>(Event::default().data(json)), answer_stream))
    });

    Sse::new(events)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response()
}

pub fn make_ask_routes(state: ServerState) -> Router {
    Router::new()
        .route("/ask", post(ask))
        .route("/ask/stream", get(ask_stream))
        .with_state(state)
}
