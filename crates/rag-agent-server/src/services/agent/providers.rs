//! Boundary capabilities consumed by the orchestration core.
//!
//! Concrete implementations live in `services::llm_service`,
//! `services::embedding_service` and `database::vector_store`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::AgentResult;

/// Text -> vector capability of the language-model collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> AgentResult<Vec<f32>>;
}

/// Completion capability of the language-model collaborator
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// `context` is passed as system context when present.
    async fn complete(&self, prompt: &str, context: Option<&str>) -> AgentResult<String>;
}

/// Resolves a model type (e.g. "qwen") to a language-model handle
pub trait ModelRegistry: Send + Sync {
    fn resolve(&self, model_type: &str) -> AgentResult<Arc<dyn LlmProvider>>;
}

/// Raw hit returned by the vector-similarity collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorHit {
    pub id: String,
    pub score: f32,
    pub payload: serde_json::Value,
}

/// Vector-similarity collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VectorSearch: Send + Sync {
    async fn search(
        &self,
        collection_id: &str,
        vector: &[f32],
        limit: usize,
    ) -> AgentResult<Vec<VectorHit>>;
}

/// Knowledge-base metadata lookup used by the web layer before calling the orchestrator
#[async_trait]
pub trait KnowledgeBaseRegistry: Send + Sync {
    async fn exists(&self, knowledge_base_id: &str) -> AgentResult<bool>;
}
