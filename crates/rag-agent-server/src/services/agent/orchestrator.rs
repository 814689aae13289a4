//! Entry point used by the HTTP handlers.
//!
//! Chooses between the single-shot fast path and a cached reasoning session,
//! and answers through the fast path (flagged `degraded`) when the reasoning
//! loop gives up.

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::cache::{SessionCache, SessionLease};
use super::error::{AgentError, AgentResult};
use super::memory::Turn;
use super::prompts;
use super::providers::ModelRegistry;
use super::retrieval::RetrievalAdapter;
use super::session::{AskOutcome, ToolInvocation};
use super::tools::ToolKind;
use super::types::{
    CacheStatistics, ConverseRequest, ConverseResponse, SearchResponse, SessionKey, SessionStatus,
    ToolReport,
};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Budget for one reasoning loop, and separately for one fast path run
    pub request_timeout: Duration,
    pub fast_path_top_k: usize,
    /// Caller-supplied turns included in the fast path prompt
    pub fast_path_history_turns: usize,
    pub max_context_chars: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            fast_path_top_k: 5,
            fast_path_history_turns: 6,
            max_context_chars: 8000,
        }
    }
}

pub struct AgentOrchestrator {
    cache: Arc<SessionCache>,
    models: Arc<dyn ModelRegistry>,
    retrieval: RetrievalAdapter,
    config: OrchestratorConfig,
}

impl AgentOrchestrator {
    pub fn new(
        cache: Arc<SessionCache>,
        models: Arc<dyn ModelRegistry>,
        retrieval: RetrievalAdapter,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            cache,
            models,
            retrieval,
            config,
        }
    }

    pub fn cache(&self) -> &Arc<SessionCache> {
        &self.cache
    }

    pub async fn converse(&self, request: ConverseRequest) -> AgentResult<ConverseResponse> {
        let started = Instant::now();
        ensure_knowledge_base(&request.knowledge_base_id)?;
        self.ensure_model(&request.model_type)?;

        let conversation_id = request
            .conversation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        if !request.use_reasoning {
            let answer = self.fast_path(&request).await?;
            info!(
                kb = %request.knowledge_base_id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Answered through fast path"
            );
            return Ok(ConverseResponse {
                answer,
                degraded: false,
                agent_mode: false,
                tools_used: Vec::new(),
                trace: Vec::new(),
                conversation_id,
                processing_time_ms: started.elapsed().as_millis() as u64,
                timestamp: Utc::now(),
            });
        }

        let key = SessionKey::new(&request.knowledge_base_id, &request.model_type);
        let trace: Vec<ToolInvocation> = match self.reason(&key, &request.message).await {
            Ok(AskOutcome::Answered(answered)) => {
                return Ok(ConverseResponse {
                    answer: answered.answer,
                    degraded: false,
                    agent_mode: true,
                    tools_used: answered.tools_used,
                    trace: Vec::new(),
                    conversation_id,
                    processing_time_ms: started.elapsed().as_millis() as u64,
                    timestamp: Utc::now(),
                });
            }
            Ok(AskOutcome::Exhausted { trace }) => {
                let exhausted = AgentError::ReasoningExhausted {
                    attempts: trace.len(),
                };
                warn!(key = %key, "{}, falling back to fast path", exhausted);
                trace
            }
            Ok(AskOutcome::TimedOut { trace, after }) => {
                warn!(key = %key, "{}, falling back to fast path", AgentError::Timeout(after));
                trace
            }
            Err(e) => {
                warn!(key = %key, "Reasoning failed: {}, falling back to fast path", e);
                Vec::new()
            }
        };

        match self.fast_path(&request).await {
            Ok(answer) => Ok(ConverseResponse {
                answer,
                degraded: true,
                agent_mode: true,
                tools_used: Vec::new(),
                trace,
                conversation_id,
                processing_time_ms: started.elapsed().as_millis() as u64,
                timestamp: Utc::now(),
            }),
            Err(e) => {
                error!(key = %key, "Fast path fallback failed: {}", e);
                Err(e)
            }
        }
    }

    async fn reason(&self, key: &SessionKey, message: &str) -> AgentResult<AskOutcome> {
        let session = self.cache.get_or_create(key).await?;
        session.ask(message, Some(self.config.request_timeout)).await
    }

    /// One retrieval plus one completion, no session and no memory.
    async fn fast_path(&self, request: &ConverseRequest) -> AgentResult<String> {
        let llm = self.models.resolve(&request.model_type)?;
        let skip = request
            .history
            .len()
            .saturating_sub(self.config.fast_path_history_turns);
        let history = &request.history[skip..];

        self.within(async {
            let chunks = self
                .retrieval
                .retrieve(
                    &request.knowledge_base_id,
                    &request.message,
                    self.config.fast_path_top_k,
                )
                .await?;
            debug!(
                kb = %request.knowledge_base_id,
                chunks = chunks.len(),
                "Fast path context retrieved"
            );

            let context = prompts::passages_context(&chunks, self.config.max_context_chars);
            let prompt = prompts::fast_path_prompt(&request.message, &context, history);
            llm.complete(&prompt, None).await
        })
        .await
    }

    pub async fn analyze(
        &self,
        knowledge_base_id: &str,
        query: &str,
        model_type: &str,
    ) -> AgentResult<ToolReport> {
        self.run_tool(knowledge_base_id, model_type, ToolKind::DeepAnalysis, Some(query))
            .await
    }

    pub async fn summarize(
        &self,
        knowledge_base_id: &str,
        model_type: &str,
    ) -> AgentResult<ToolReport> {
        self.run_tool(knowledge_base_id, model_type, ToolKind::Summary, None)
            .await
    }

    pub async fn search(
        &self,
        knowledge_base_id: &str,
        query: &str,
        max_results: usize,
        model_type: &str,
    ) -> AgentResult<SearchResponse> {
        let started = Instant::now();
        let session = self.lease(knowledge_base_id, model_type).await?;

        let results = self
            .within(session.tools().knowledge_search().search(query, max_results))
            .await?;

        Ok(SearchResponse {
            knowledge_base_id: knowledge_base_id.to_string(),
            query: query.to_string(),
            total_results: results.len(),
            results,
            processing_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn run_tool(
        &self,
        knowledge_base_id: &str,
        model_type: &str,
        kind: ToolKind,
        query: Option<&str>,
    ) -> AgentResult<ToolReport> {
        let started = Instant::now();
        let session = self.lease(knowledge_base_id, model_type).await?;

        let result = self
            .within(session.tools().get(kind).run(query.unwrap_or_default()))
            .await?;

        info!(
            key = %session.key(),
            tool = kind.name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Tool run finished"
        );

        Ok(ToolReport {
            knowledge_base_id: knowledge_base_id.to_string(),
            tool: kind.name().to_string(),
            query: query.map(str::to_string),
            result,
            processing_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Rejects model types with no backend before any session slot is taken
    pub fn ensure_model(&self, model_type: &str) -> AgentResult<()> {
        self.models.resolve(model_type).map(|_| ())
    }

    async fn lease(&self, knowledge_base_id: &str, model_type: &str) -> AgentResult<SessionLease> {
        ensure_knowledge_base(knowledge_base_id)?;
        self.ensure_model(model_type)?;
        self.cache
            .get_or_create(&SessionKey::new(knowledge_base_id, model_type))
            .await
    }

    async fn within<T>(&self, work: impl Future<Output = AgentResult<T>>) -> AgentResult<T> {
        let budget = self.config.request_timeout;
        tokio::time::timeout(budget, work)
            .await
            .map_err(|_| AgentError::Timeout(budget))?
    }

    /// Conversation memory of a cached session; empty when none is cached
    pub fn history(&self, key: &SessionKey) -> Vec<Turn> {
        self.cache
            .peek(key)
            .map(|entry| entry.session.history())
            .unwrap_or_default()
    }

    /// Clears the memory of a cached session without evicting it.
    /// Returns whether a session was cached for `key`.
    pub fn clear_memory(&self, key: &SessionKey) -> bool {
        match self.cache.peek(key) {
            Some(entry) => {
                entry.session.clear_memory();
                true
            }
            None => {
                debug!("No cached session {}, nothing to clear", key);
                false
            }
        }
    }

    pub fn clear_cache(&self) -> usize {
        self.cache.clear_all()
    }

    pub fn cache_stats(&self) -> CacheStatistics {
        self.cache.stats()
    }

    pub fn status(&self, key: &SessionKey) -> SessionStatus {
        let entry = self.cache.peek(key);
        SessionStatus {
            knowledge_base_id: key.knowledge_base_id.clone(),
            model_type: key.model_type.clone(),
            cache_key: key.to_string(),
            exists: entry.is_some(),
            memory_size: entry.as_ref().map_or(0, |e| e.session.memory_size()),
            cache_hit_rate: self.cache.hit_rate(),
            tools_count: entry.as_ref().map(|e| e.session.tools().len()),
            hit_count: entry.as_ref().map(|e| e.hit_count),
            age_secs: entry.as_ref().map(|e| e.age.as_secs()),
        }
    }
}

fn ensure_knowledge_base(knowledge_base_id: &str) -> AgentResult<()> {
    if knowledge_base_id.trim().is_empty() {
        return Err(AgentError::InvalidKnowledgeBase(
            "knowledge base id must not be empty".to_string(),
        ));
    }
    Ok(())
}
