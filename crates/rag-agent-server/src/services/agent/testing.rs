//! Scripted collaborators shared by the agent unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::error::{AgentError, AgentResult};
use super::providers::{EmbeddingProvider, LlmProvider, ModelRegistry, VectorHit, VectorSearch};
use super::session::{DefaultSessionFactory, ReasoningSession, SessionConfig, SessionFactory};
use super::types::SessionKey;

pub(crate) fn hits(n: usize) -> Vec<VectorHit> {
    (0..n)
        .map(|i| VectorHit {
            id: format!("chunk-{}", i),
            score: 0.95 - i as f32 * 0.05,
            payload: json!({ "text": format!("passage {}", i), "document_title": "Handbook" }),
        })
        .collect()
}

enum StoreMode {
    Hits(Vec<VectorHit>),
    Fail,
    SucceedThenFail(Vec<VectorHit>, usize),
    FailThenSucceed(Vec<VectorHit>, usize),
}

pub(crate) struct FakeStore {
    mode: StoreMode,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl FakeStore {
    pub(crate) fn with_hits(hits: Vec<VectorHit>) -> Self {
        Self::from_mode(StoreMode::Hits(hits))
    }

    pub(crate) fn failing() -> Self {
        Self::from_mode(StoreMode::Fail)
    }

    /// The first `successes` searches return `hits`, later ones fail
    pub(crate) fn succeed_then_fail(hits: Vec<VectorHit>, successes: usize) -> Self {
        Self::from_mode(StoreMode::SucceedThenFail(hits, successes))
    }

    /// The first `failures` searches fail, later ones return `hits`
    pub(crate) fn fail_then_succeed(hits: Vec<VectorHit>, failures: usize) -> Self {
        Self::from_mode(StoreMode::FailThenSucceed(hits, failures))
    }

    fn from_mode(mode: StoreMode) -> Self {
        Self {
            mode,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorSearch for FakeStore {
    async fn search(
        &self,
        _collection_id: &str,
        _vector: &[f32],
        limit: usize,
    ) -> AgentResult<Vec<VectorHit>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let unavailable = || AgentError::RetrievalUnavailable("vector store offline".into());

        match &self.mode {
            StoreMode::Hits(hits) => Ok(hits.iter().take(limit).cloned().collect()),
            StoreMode::Fail => Err(unavailable()),
            StoreMode::SucceedThenFail(hits, successes) if call < *successes => {
                Ok(hits.iter().take(limit).cloned().collect())
            }
            StoreMode::SucceedThenFail(..) => Err(unavailable()),
            StoreMode::FailThenSucceed(_, failures) if call < *failures => Err(unavailable()),
            StoreMode::FailThenSucceed(hits, _) => Ok(hits.iter().take(limit).cloned().collect()),
        }
    }
}

pub(crate) struct FakeEmbedder;

#[async_trait]
impl EmbeddingProvider for FakeEmbedder {
    async fn embed(&self, _text: &str) -> AgentResult<Vec<f32>> {
        Ok(vec![0.1; 4])
    }
}

pub(crate) struct FakeLlm {
    answer: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl FakeLlm {
    pub(crate) fn answering(answer: &str) -> Self {
        Self {
            answer: Some(answer.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            answer: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl LlmProvider for FakeLlm {
    async fn complete(&self, prompt: &str, _context: Option<&str>) -> AgentResult<String> {
        self.prompts.lock().push(prompt.to_string());
        self.answer
            .clone()
            .ok_or_else(|| AgentError::ModelUnavailable("llama-server unreachable".into()))
    }
}

pub(crate) struct FakeModels {
    llm: Arc<FakeLlm>,
}

impl ModelRegistry for FakeModels {
    fn resolve(&self, model_type: &str) -> AgentResult<Arc<dyn LlmProvider>> {
        if model_type == "missing" {
            return Err(AgentError::ModelUnavailable(format!("unknown model type {}", model_type)));
        }
        Ok(self.llm.clone())
    }
}

/// Collaborators wired together the way production wires them
pub(crate) struct Harness {
    pub store: Arc<FakeStore>,
    pub llm: Arc<FakeLlm>,
}

impl Harness {
    pub(crate) fn new(store: FakeStore, llm: FakeLlm) -> Self {
        Self {
            store: Arc::new(store),
            llm: Arc::new(llm),
        }
    }

    pub(crate) fn models(&self) -> Arc<dyn ModelRegistry> {
        Arc::new(FakeModels {
            llm: self.llm.clone(),
        })
    }

    pub(crate) fn embedder(&self) -> Arc<dyn EmbeddingProvider> {
        Arc::new(FakeEmbedder)
    }

    pub(crate) fn factory(&self, config: SessionConfig) -> DefaultSessionFactory {
        DefaultSessionFactory::new(self.models(), self.embedder(), self.store.clone(), config)
    }

    pub(crate) async fn session(&self, knowledge_base_id: &str, config: SessionConfig) -> ReasoningSession {
        self.factory(config)
            .build(&SessionKey::new(knowledge_base_id, "qwen"))
            .await
            .expect("session builds")
    }
}

/// Counts constructions and can stall them to widen race windows
pub(crate) struct CountingFactory {
    inner: DefaultSessionFactory,
    builds: AtomicUsize,
    build_delay: Option<Duration>,
    fail_first: AtomicUsize,
}

impl CountingFactory {
    pub(crate) fn new(inner: DefaultSessionFactory) -> Self {
        Self {
            inner,
            builds: AtomicUsize::new(0),
            build_delay: None,
            fail_first: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_build_delay(mut self, delay: Duration) -> Self {
        self.build_delay = Some(delay);
        self
    }

    /// The first `n` builds fail with `ModelUnavailable`
    pub(crate) fn failing_first(self, n: usize) -> Self {
        self.fail_first.store(n, Ordering::SeqCst);
        self
    }

    pub(crate) fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionFactory for CountingFactory {
    async fn build(&self, key: &SessionKey) -> AgentResult<ReasoningSession> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.build_delay {
            tokio::time::sleep(delay).await;
        }
        let should_fail = self
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(AgentError::ModelUnavailable("model warming up".into()));
        }
        self.inner.build(key).await
    }
}
