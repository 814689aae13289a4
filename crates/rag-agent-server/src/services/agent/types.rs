use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::memory::Turn;
use super::session::ToolInvocation;
use super::tools::Snippet;

/// Cache key: (knowledge base, model type). Exact, case-sensitive match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub knowledge_base_id: String,
    pub model_type: String,
}

impl SessionKey {
    pub fn new(knowledge_base_id: impl Into<String>, model_type: impl Into<String>) -> Self {
        Self {
            knowledge_base_id: knowledge_base_id.into(),
            model_type: model_type.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.knowledge_base_id, self.model_type)
    }
}

/// Process-wide cache counters, reset only by a full clear
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStatistics {
    pub total_entries: usize,
    pub total_hits: u64,
    pub total_misses: u64,
}

impl CacheStatistics {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.total_hits + self.total_misses;
        if lookups == 0 {
            0.0
        } else {
            self.total_hits as f64 / lookups as f64
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConverseRequest {
    pub knowledge_base_id: String,
    pub message: String,
    pub model_type: String,
    #[serde(default = "default_use_reasoning")]
    pub use_reasoning: bool,
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Recent turns supplied by the caller for the fast path
    #[serde(default)]
    pub history: Vec<Turn>,
}

fn default_use_reasoning() -> bool {
    true
}

#[derive(Debug, Clone, Serialize)]
pub struct ConverseResponse {
    pub answer: String,
    /// Answered through the fast path after the reasoning loop gave up
    pub degraded: bool,
    pub agent_mode: bool,
    pub tools_used: Vec<String>,
    /// Tool trace, only attached on failure paths
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<ToolInvocation>,
    pub conversation_id: String,
    pub processing_time_ms: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub knowledge_base_id: String,
    pub model_type: String,
    pub cache_key: String,
    pub exists: bool,
    pub memory_size: usize,
    pub cache_hit_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_secs: Option<u64>,
}

/// Output of a single tool run on behalf of the caller (analyze, summarize)
#[derive(Debug, Clone, Serialize)]
pub struct ToolReport {
    pub knowledge_base_id: String,
    pub tool: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    pub result: String,
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub knowledge_base_id: String,
    pub query: String,
    pub results: Vec<Snippet>,
    pub total_results: usize,
    pub processing_time_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_key_is_case_sensitive() {
        let a = SessionKey::new("kb1", "qwen");
        let b = SessionKey::new("KB1", "qwen");
        assert_ne!(a, b);
        assert_eq!(a.to_string(), "kb1:qwen");
    }

    #[test]
    fn test_hit_rate() {
        assert_eq!(CacheStatistics::default().hit_rate(), 0.0);
        let stats = CacheStatistics {
            total_entries: 1,
            total_hits: 3,
            total_misses: 1,
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_converse_request_defaults() {
        let req: ConverseRequest = serde_json::from_str(
            r#"{"knowledge_base_id":"kb1","message":"hi","model_type":"qwen"}"#,
        )
        .unwrap();
        assert!(req.use_reasoning);
        assert!(req.history.is_empty());
        assert!(req.conversation_id.is_none());
    }
}
