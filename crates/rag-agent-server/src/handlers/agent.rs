use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::services::agent::{
    AgentError, AgentOrchestrator, ConverseRequest, ConverseResponse, SearchResponse,
    SessionKey, SessionStatus, ToolReport, Turn,
};
use crate::state::AppState;
use crate::utils::{ApiError, ApiResponse};

const DEFAULT_SEARCH_RESULTS: usize = 5;
const MAX_SEARCH_RESULTS: usize = 50;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub knowledge_base_id: String,
    pub message: String,
    pub model_type: Option<String>,
    #[serde(default = "default_true")]
    pub use_reasoning: bool,
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub history: Vec<Turn>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub knowledge_base_id: String,
    pub query: String,
    pub model_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub knowledge_base_id: String,
    pub query: String,
    pub max_results: Option<usize>,
    pub model_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SummaryRequest {
    pub knowledge_base_id: String,
    pub model_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ModelQuery {
    pub model_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub knowledge_base_id: String,
    pub model_type: String,
    pub turns: Vec<Turn>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct ClearMemoryResponse {
    pub knowledge_base_id: String,
    pub model_type: String,
    /// Whether a cached session existed for the key
    pub cleared: bool,
}

#[derive(Debug, Serialize)]
pub struct ClearCacheResponse {
    pub entries_cleared: usize,
}

fn require_text(field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::BadRequest(format!("{} must not be empty", field)));
    }
    Ok(())
}

async fn ensure_knowledge_base(state: &AppState, knowledge_base_id: &str) -> Result<(), ApiError> {
    if knowledge_base_id.trim().is_empty() {
        return Err(AgentError::InvalidKnowledgeBase("knowledge base id must not be empty".into()).into());
    }
    if !state.knowledge_bases.exists(knowledge_base_id).await? {
        return Err(AgentError::InvalidKnowledgeBase(format!(
            "knowledge base {} not found",
            knowledge_base_id
        ))
        .into());
    }
    Ok(())
}

pub async fn chat_handler(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<ApiResponse<ConverseResponse>, ApiError> {
    let Json(request) = payload?;
    require_text("message", &request.message)?;
    ensure_knowledge_base(&state, &request.knowledge_base_id).await?;
    let model_type = state.model_type(request.model_type);
    state.orchestrator.ensure_model(&model_type)?;

    info!(
        "Chat request for kb {} (reasoning: {})",
        request.knowledge_base_id, request.use_reasoning
    );

    let response = state
        .orchestrator
        .converse(ConverseRequest {
            model_type,
            knowledge_base_id: request.knowledge_base_id,
            message: request.message,
            use_reasoning: request.use_reasoning,
            conversation_id: request.conversation_id,
            history: request.history,
        })
        .await?;

    Ok(ApiResponse::ok(response))
}

pub async fn analyze_handler(
    State(state): State<AppState>,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Result<ApiResponse<ToolReport>, ApiError> {
    let Json(request) = payload?;
    require_text("query", &request.query)?;
    ensure_knowledge_base(&state, &request.knowledge_base_id).await?;

    let model_type = state.model_type(request.model_type);
    state.orchestrator.ensure_model(&model_type)?;
    let report = state
        .orchestrator
        .analyze(&request.knowledge_base_id, &request.query, &model_type)
        .await?;

    Ok(ApiResponse::ok(report))
}

pub async fn search_handler(
    State(state): State<AppState>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<ApiResponse<SearchResponse>, ApiError> {
    let Json(request) = payload?;
    require_text("query", &request.query)?;
    ensure_knowledge_base(&state, &request.knowledge_base_id).await?;

    let max_results = request
        .max_results
        .unwrap_or(DEFAULT_SEARCH_RESULTS)
        .clamp(1, MAX_SEARCH_RESULTS);
    let model_type = state.model_type(request.model_type);
    state.orchestrator.ensure_model(&model_type)?;

    let response = state
        .orchestrator
        .search(&request.knowledge_base_id, &request.query, max_results, &model_type)
        .await?;

    Ok(ApiResponse::ok(response))
}

pub async fn summary_handler(
    State(state): State<AppState>,
    payload: Result<Json<SummaryRequest>, JsonRejection>,
) -> Result<ApiResponse<ToolReport>, ApiError> {
    let Json(request) = payload?;
    ensure_knowledge_base(&state, &request.knowledge_base_id).await?;

    let model_type = state.model_type(request.model_type);
    state.orchestrator.ensure_model(&model_type)?;
    let report = state
        .orchestrator
        .summarize(&request.knowledge_base_id, &model_type)
        .await?;

    Ok(ApiResponse::ok(report))
}

pub async fn history_handler(
    State(state): State<AppState>,
    Path(knowledge_base_id): Path<String>,
    Query(query): Query<ModelQuery>,
) -> ApiResponse<HistoryResponse> {
    let key = SessionKey::new(knowledge_base_id, state.model_type(query.model_type));
    let turns = state.orchestrator.history(&key);

    ApiResponse::ok(HistoryResponse {
        total: turns.len(),
        turns,
        knowledge_base_id: key.knowledge_base_id,
        model_type: key.model_type,
    })
}

pub async fn clear_memory_handler(
    State(state): State<AppState>,
    Path(knowledge_base_id): Path<String>,
    Query(query): Query<ModelQuery>,
) -> Result<ApiResponse<ClearMemoryResponse>, ApiError> {
    ensure_knowledge_base(&state, &knowledge_base_id).await?;

    let key = SessionKey::new(knowledge_base_id, state.model_type(query.model_type));
    let cleared = state.orchestrator.clear_memory(&key);
    info!("Memory clear for {} (cached: {})", key, cleared);

    Ok(ApiResponse::ok(ClearMemoryResponse {
        knowledge_base_id: key.knowledge_base_id,
        model_type: key.model_type,
        cleared,
    }))
}

pub async fn clear_cache_handler(
    State(orchestrator): State<Arc<AgentOrchestrator>>,
) -> ApiResponse<ClearCacheResponse> {
    let entries_cleared = orchestrator.clear_cache();
    ApiResponse::ok(ClearCacheResponse { entries_cleared })
}

pub async fn status_handler(
    State(state): State<AppState>,
    Path(knowledge_base_id): Path<String>,
    Query(query): Query<ModelQuery>,
) -> ApiResponse<SessionStatus> {
    let key = SessionKey::new(knowledge_base_id, state.model_type(query.model_type));
    ApiResponse::ok(state.orchestrator.status(&key))
}
