use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post},
    Router,
};
use std::time::Duration;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::warn;

use crate::handlers;
use crate::services::agent::AgentError;
use crate::state::AppState;
use crate::utils::ApiError;

pub fn build_router(state: AppState, cors_allowed_origins: &[String], request_timeout: Duration) -> Router {
    let agent_routes = Router::new()
        .route("/chat", post(handlers::agent::chat_handler))
        .route("/analyze", post(handlers::agent::analyze_handler))
        .route("/search", post(handlers::agent::search_handler))
        .route("/summary", post(handlers::agent::summary_handler))
        .route("/history/{kb_id}", get(handlers::agent::history_handler))
        .route("/memory/{kb_id}", delete(handlers::agent::clear_memory_handler))
        .route("/cache", delete(handlers::agent::clear_cache_handler))
        .route("/status/{kb_id}", get(handlers::agent::status_handler));

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/health/ready", get(handlers::health::readiness_check))
        .nest("/api/agent", agent_routes)
        .with_state(state)
        .layer(cors_layer(cors_allowed_origins))
        // Outer bound; the orchestrator enforces its own budget per path
        .layer(middleware::from_fn_with_state(
            request_timeout * 2,
            request_deadline,
        ))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
}

/// Answers with the `Timeout` error envelope once `limit` elapses
async fn request_deadline(
    State(limit): State<Duration>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    tokio::time::timeout(limit, next.run(request))
        .await
        .map_err(|_| AgentError::Timeout(limit).into())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {:?}", o);
                None
            }
        })
        .collect();

    if parsed.is_empty() {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(parsed)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
