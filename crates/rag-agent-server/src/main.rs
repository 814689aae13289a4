use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use rag_agent_server::config::Settings;
use rag_agent_server::database::{DbPool, PgVectorStore};
use rag_agent_server::logging;
use rag_agent_server::router::build_router;
use rag_agent_server::services::agent::{
    AgentOrchestrator, DefaultSessionFactory, RetrievalAdapter, SessionCache,
};
use rag_agent_server::services::{EmbeddingService, LlmModels};
use rag_agent_server::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::load()?;

    // Initialize logging; the guard flushes file output on exit
    let _log_guard = logging::init_tracing(&settings.logging)?;
    info!("Starting RAG agent server v{}", env!("CARGO_PKG_VERSION"));

    // Initialize database pool
    let db_pool = DbPool::new(&settings.database).await?;
    let store = Arc::new(PgVectorStore::new(db_pool.clone()));

    // Initialize collaborators
    let embedder = Arc::new(EmbeddingService::new(&settings.embedding)?);
    let models = Arc::new(LlmModels::from_config(&settings.llm)?);
    info!("Model types available: {:?}", models.model_types());

    let factory = DefaultSessionFactory::new(
        models.clone(),
        embedder.clone(),
        store.clone(),
        settings.session_config(),
    )
    .with_default_quality(settings.retrieval.default_quality_score);

    let cache = Arc::new(SessionCache::new(Arc::new(factory), settings.cache_config()));
    cache.spawn_sweeper(Duration::from_secs(settings.agent.sweep_interval_seconds.max(1)));

    let fast_path_retrieval = RetrievalAdapter::new(embedder, store.clone())
        .with_default_quality(settings.retrieval.default_quality_score);

    let orchestrator = Arc::new(AgentOrchestrator::new(
        cache.clone(),
        models,
        fast_path_retrieval,
        settings.orchestrator_config(),
    ));

    let state = AppState::new(orchestrator, store, settings.llm.default_model.clone())
        .with_db_pool(db_pool.clone());

    let app = build_router(
        state,
        &settings.server.cors_allowed_origins,
        Duration::from_secs(settings.agent.request_timeout_seconds),
    );

    // Server address
    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Draining cached sessions");
    let drained = cache
        .shutdown(Duration::from_secs(settings.agent.drain_timeout_seconds))
        .await;
    db_pool.close().await;
    info!("Shutdown complete ({} sessions released)", drained);

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
