use std::time::Duration;
use thiserror::Error;

/// Failure taxonomy of the orchestration core.
///
/// `ToolExecutionFailed` never leaves a reasoning session; `ReasoningExhausted`
/// and `Timeout` are recovered by the fast path inside the orchestrator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    #[error("Retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Tool {tool} failed: {reason}")]
    ToolExecutionFailed { tool: String, reason: String },

    #[error("Reasoning exhausted after {attempts} failed tool invocations")]
    ReasoningExhausted { attempts: usize },

    #[error("Invalid knowledge base: {0}")]
    InvalidKnowledgeBase(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

impl AgentError {
    /// Stable machine-readable code for response envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            AgentError::RetrievalUnavailable(_) => "RetrievalUnavailable",
            AgentError::ModelUnavailable(_) => "ModelUnavailable",
            AgentError::ToolExecutionFailed { .. } => "ToolExecutionFailed",
            AgentError::ReasoningExhausted { .. } => "ReasoningExhausted",
            AgentError::InvalidKnowledgeBase(_) => "InvalidKnowledgeBase",
            AgentError::Timeout(_) => "Timeout",
        }
    }

    pub(crate) fn tool_failed(tool: &str, reason: impl Into<String>) -> Self {
        AgentError::ToolExecutionFailed {
            tool: tool.to_string(),
            reason: reason.into(),
        }
    }
}

pub type AgentResult<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_and_messages() {
        let err = AgentError::tool_failed("knowledge_search", "no passages");
        assert_eq!(err.code(), "ToolExecutionFailed");
        assert_eq!(err.to_string(), "Tool knowledge_search failed: no passages");

        let err = AgentError::Timeout(Duration::from_secs(2));
        assert_eq!(err.code(), "Timeout");
        assert_eq!(err.to_string(), "Timed out after 2s");
    }
}
