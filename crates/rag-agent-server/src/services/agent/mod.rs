//! Retrieval-augmented agent: tools, reasoning sessions, the session cache
//! and the orchestrator the handlers talk to.

pub mod cache;
pub mod error;
pub mod memory;
pub mod orchestrator;
pub mod policy;
pub mod prompts;
pub mod providers;
pub mod retrieval;
pub mod session;
pub mod tools;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{SessionCache, SessionCacheConfig, SessionLease};
pub use error::{AgentError, AgentResult};
pub use memory::{ConversationMemory, Role, Turn};
pub use orchestrator::{AgentOrchestrator, OrchestratorConfig};
pub use policy::{DefaultSelectionPolicy, ToolSelectionPolicy};
pub use providers::{
    EmbeddingProvider, KnowledgeBaseRegistry, LlmProvider, ModelRegistry, VectorHit, VectorSearch,
};
pub use retrieval::{RetrievalAdapter, RetrievedChunk};
pub use session::{
    AnswerWithTrace, AskOutcome, DefaultSessionFactory, ReasoningSession, SessionConfig,
    SessionFactory, ToolInvocation,
};
pub use tools::{Snippet, Tool, ToolKind, ToolSet};
pub use types::{
    CacheStatistics, ConverseRequest, ConverseResponse, SearchResponse, SessionKey, SessionStatus,
    ToolReport,
};
