use axum::extract::FromRef;
use std::sync::Arc;

use crate::database::DbPool;
use crate::services::agent::{AgentOrchestrator, KnowledgeBaseRegistry};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<AgentOrchestrator>,
    pub knowledge_bases: Arc<dyn KnowledgeBaseRegistry>,
    /// Model type used when a request does not name one
    pub default_model_type: String,
    /// Probed by the readiness check; absent when running without a database
    pub db_pool: Option<DbPool>,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<AgentOrchestrator>,
        knowledge_bases: Arc<dyn KnowledgeBaseRegistry>,
        default_model_type: impl Into<String>,
    ) -> Self {
        Self {
            orchestrator,
            knowledge_bases,
            default_model_type: default_model_type.into(),
            db_pool: None,
        }
    }

    pub fn with_db_pool(mut self, pool: DbPool) -> Self {
        self.db_pool = Some(pool);
        self
    }

    pub fn model_type(&self, requested: Option<String>) -> String {
        requested
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.default_model_type.clone())
    }
}

impl FromRef<AppState> for Arc<AgentOrchestrator> {
    fn from_ref(state: &AppState) -> Self {
        state.orchestrator.clone()
    }
}
