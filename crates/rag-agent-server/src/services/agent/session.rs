//! Reasoning session: one per (knowledge base, model type).
//!
//! `ask` drives a bounded tool loop:
//! Start -> ToolSelection -> ToolExecuting -> (ToolSelection | Finalizing) -> Done | Aborted

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{timeout_at, Instant as Deadline};
use tracing::{debug, info, warn};

use super::error::{AgentError, AgentResult};
use super::memory::{ConversationMemory, Turn};
use super::policy::{DefaultSelectionPolicy, ToolSelectionPolicy};
use super::prompts;
use super::providers::{EmbeddingProvider, LlmProvider, ModelRegistry, VectorSearch};
use super::retrieval::RetrievalAdapter;
use super::tools::{ToolKind, ToolSet};
use super::types::SessionKey;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Hard cap on tool invocations per `ask`
    pub max_iterations: usize,
    pub memory_max_turns: usize,
    /// Turns of memory fed into the final composition prompt
    pub history_window: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            memory_max_turns: 20,
            history_window: 6,
        }
    }
}

/// One tool call made during a reasoning loop. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInvocation {
    #[serde(skip)]
    pub kind: ToolKind,
    pub tool_name: &'static str,
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl ToolInvocation {
    pub fn new(
        kind: ToolKind,
        query: impl Into<String>,
        outcome: Result<String, String>,
        duration_ms: u64,
    ) -> Self {
        let (result, error) = match outcome {
            Ok(output) => (Some(output), None),
            Err(e) => (None, Some(e)),
        };
        Self {
            kind,
            tool_name: kind.name(),
            query: query.into(),
            result,
            error,
            duration_ms,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.result.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnswerWithTrace {
    pub answer: String,
    /// Distinct tools that produced output, in first-use order
    pub tools_used: Vec<String>,
    pub iterations: usize,
    pub trace: Vec<ToolInvocation>,
}

/// Classified result of one `ask`
#[derive(Debug, Clone)]
pub enum AskOutcome {
    Answered(AnswerWithTrace),
    /// Every tool invocation failed; nothing usable was gathered
    Exhausted { trace: Vec<ToolInvocation> },
    /// The caller's budget ran out; in-flight work was abandoned
    TimedOut {
        trace: Vec<ToolInvocation>,
        after: Duration,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    ToolSelection,
    ToolExecuting(ToolKind),
    Finalizing,
}

pub struct ReasoningSession {
    key: SessionKey,
    llm: Arc<dyn LlmProvider>,
    tools: ToolSet,
    policy: Arc<dyn ToolSelectionPolicy>,
    memory: Mutex<ConversationMemory>,
    config: SessionConfig,
}

impl ReasoningSession {
    pub fn new(
        key: SessionKey,
        llm: Arc<dyn LlmProvider>,
        tools: ToolSet,
        policy: Arc<dyn ToolSelectionPolicy>,
        config: SessionConfig,
    ) -> Self {
        Self {
            memory: Mutex::new(ConversationMemory::new(config.memory_max_turns)),
            key,
            llm,
            tools,
            policy,
            config,
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    pub fn memory_size(&self) -> usize {
        self.memory.lock().len()
    }

    pub fn history(&self) -> Vec<Turn> {
        self.memory.lock().snapshot()
    }

    pub fn clear_memory(&self) {
        self.memory.lock().clear();
        info!("Conversation memory cleared for {}", self.key);
    }

    /// Answers `query` through the tool loop.
    ///
    /// `Err` is only returned for failures outside the loop itself (the final
    /// composition call); tool failures are absorbed into the trace.
    pub async fn ask(&self, query: &str, budget: Option<Duration>) -> AgentResult<AskOutcome> {
        let started = Instant::now();
        let deadline = budget.map(|b| Deadline::now() + b);
        let mut trace: Vec<ToolInvocation> = Vec::new();
        let mut state = LoopState::ToolSelection;

        debug!(key = %self.key, "Reasoning loop started");

        loop {
            state = match state {
                LoopState::ToolSelection => {
                    if trace.len() >= self.config.max_iterations {
                        debug!(key = %self.key, "Iteration cap {} reached", self.config.max_iterations);
                        LoopState::Finalizing
                    } else {
                        match self.policy.select(query, &trace) {
                            Some(kind) => LoopState::ToolExecuting(kind),
                            None => LoopState::Finalizing,
                        }
                    }
                }

                LoopState::ToolExecuting(kind) => {
                    let tool = self.tools.get(kind);
                    let tool_start = Instant::now();
                    let result = match deadline {
                        Some(d) => match timeout_at(d, tool.run(query)).await {
                            Ok(r) => r,
                            Err(_) => return Ok(self.timed_out(trace, started)),
                        },
                        None => tool.run(query).await,
                    };
                    let duration_ms = tool_start.elapsed().as_millis() as u64;

                    let outcome = match result {
                        Ok(output) => {
                            debug!(key = %self.key, tool = kind.name(), duration_ms, "Tool succeeded");
                            Ok(output)
                        }
                        Err(e) => {
                            let failure = match e {
                                AgentError::ToolExecutionFailed { .. } => e,
                                other => AgentError::tool_failed(kind.name(), other.to_string()),
                            };
                            warn!(key = %self.key, tool = kind.name(), duration_ms, "{}", failure);
                            Err(failure.to_string())
                        }
                    };
                    trace.push(ToolInvocation::new(kind, query, outcome, duration_ms));
                    LoopState::ToolSelection
                }

                LoopState::Finalizing => break,
            };
        }

        let findings: Vec<(String, String)> = trace
            .iter()
            .filter_map(|inv| inv.result.clone().map(|r| (inv.tool_name.to_string(), r)))
            .collect();

        if findings.is_empty() {
            warn!(
                key = %self.key,
                attempts = trace.len(),
                "Reasoning aborted: every tool invocation failed"
            );
            return Ok(AskOutcome::Exhausted { trace });
        }

        // Memory is only locked for the snapshot, never across the model call
        let history = self.memory.lock().recent(self.config.history_window);
        let prompt = prompts::compose_prompt(query, &findings, &history);

        let answer = match deadline {
            Some(d) => match timeout_at(d, self.llm.complete(&prompt, None)).await {
                Ok(r) => r?,
                Err(_) => return Ok(self.timed_out(trace, started)),
            },
            None => self.llm.complete(&prompt, None).await?,
        };

        self.memory.lock().record_exchange(query, &answer);

        let mut tools_used: Vec<String> = Vec::new();
        for (name, _) in &findings {
            if !tools_used.contains(name) {
                tools_used.push(name.clone());
            }
        }

        info!(
            key = %self.key,
            iterations = trace.len(),
            tools = ?tools_used,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Reasoning loop answered"
        );

        Ok(AskOutcome::Answered(AnswerWithTrace {
            answer,
            tools_used,
            iterations: trace.len(),
            trace,
        }))
    }

    fn timed_out(&self, trace: Vec<ToolInvocation>, started: Instant) -> AskOutcome {
        let after = started.elapsed();
        warn!(key = %self.key, ?after, "Reasoning loop timed out");
        AskOutcome::TimedOut { trace, after }
    }
}

/// Builds sessions for the cache
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn build(&self, key: &SessionKey) -> AgentResult<ReasoningSession>;
}

/// Wires a session from the shared collaborators
pub struct DefaultSessionFactory {
    models: Arc<dyn ModelRegistry>,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorSearch>,
    policy: Arc<dyn ToolSelectionPolicy>,
    config: SessionConfig,
    default_quality: f32,
}

impl DefaultSessionFactory {
    pub fn new(
        models: Arc<dyn ModelRegistry>,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorSearch>,
        config: SessionConfig,
    ) -> Self {
        Self {
            models,
            embedder,
            store,
            policy: Arc::new(DefaultSelectionPolicy),
            config,
            default_quality: super::retrieval::DEFAULT_QUALITY_SCORE,
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn ToolSelectionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_default_quality(mut self, quality: f32) -> Self {
        self.default_quality = quality;
        self
    }
}

#[async_trait]
impl SessionFactory for DefaultSessionFactory {
    async fn build(&self, key: &SessionKey) -> AgentResult<ReasoningSession> {
        let llm = self.models.resolve(&key.model_type)?;
        let retrieval = Arc::new(
            RetrievalAdapter::new(self.embedder.clone(), self.store.clone())
                .with_default_quality(self.default_quality),
        );
        let tools = ToolSet::new(&key.knowledge_base_id, retrieval, llm.clone());

        info!("Built reasoning session {}", key);
        Ok(ReasoningSession::new(
            key.clone(),
            llm,
            tools,
            self.policy.clone(),
            self.config.clone(),
        ))
    }
}
