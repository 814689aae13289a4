//! The three reasoning tools. Each one is bound to a single knowledge base and
//! shares the retrieval adapter owned by its session.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use unicode_segmentation::UnicodeSegmentation;

use super::error::{AgentError, AgentResult};
use super::prompts;
use super::providers::LlmProvider;
use super::retrieval::{RetrievalAdapter, RetrievedChunk, DEFAULT_TOP_K};

const ANALYSIS_TOP_K: usize = 3;
const SUMMARY_TOP_K: usize = 8;
const SNIPPET_PREVIEW_GRAPHEMES: usize = 300;
/// The search operation over-fetches so filtering empty passages still fills the page
const SEARCH_OVERFETCH_FACTOR: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    DeepAnalysis,
    KnowledgeSearch,
    Summary,
}

impl ToolKind {
    pub const ALL: [ToolKind; 3] = [
        ToolKind::DeepAnalysis,
        ToolKind::KnowledgeSearch,
        ToolKind::Summary,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::DeepAnalysis => "document_analyzer",
            ToolKind::KnowledgeSearch => "knowledge_search",
            ToolKind::Summary => "document_summary",
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn kind(&self) -> ToolKind;

    fn name(&self) -> &'static str {
        self.kind().name()
    }

    async fn run(&self, query: &str) -> AgentResult<String>;
}

/// Retrieves the top passages and asks the model for an analysis
pub struct DeepAnalysisTool {
    knowledge_base_id: String,
    retrieval: Arc<RetrievalAdapter>,
    llm: Arc<dyn LlmProvider>,
}

impl DeepAnalysisTool {
    pub fn new(
        knowledge_base_id: impl Into<String>,
        retrieval: Arc<RetrievalAdapter>,
        llm: Arc<dyn LlmProvider>,
    ) -> Self {
        Self {
            knowledge_base_id: knowledge_base_id.into(),
            retrieval,
            llm,
        }
    }
}

#[async_trait]
impl Tool for DeepAnalysisTool {
    fn kind(&self) -> ToolKind {
        ToolKind::DeepAnalysis
    }

    async fn run(&self, query: &str) -> AgentResult<String> {
        let chunks = self
            .retrieval
            .retrieve(&self.knowledge_base_id, query, ANALYSIS_TOP_K)
            .await?;
        if chunks.is_empty() {
            return Err(AgentError::tool_failed(self.name(), "no relevant passages"));
        }

        let context = join_texts(&chunks);
        self.llm
            .complete(&prompts::analyze_prompt(&context, query), None)
            .await
    }
}

/// One ranked search result
#[derive(Debug, Clone, Serialize)]
pub struct Snippet {
    pub rank: usize,
    pub id: String,
    pub title: Option<String>,
    pub preview: String,
    pub similarity_score: f32,
    pub quality_score: f32,
}

/// Pure retrieval formatting, no model call
pub struct KnowledgeSearchTool {
    knowledge_base_id: String,
    retrieval: Arc<RetrievalAdapter>,
}

impl KnowledgeSearchTool {
    pub fn new(knowledge_base_id: impl Into<String>, retrieval: Arc<RetrievalAdapter>) -> Self {
        Self {
            knowledge_base_id: knowledge_base_id.into(),
            retrieval,
        }
    }

    /// Up to `max_results` non-empty passages, similarity-sorted
    pub async fn search(&self, query: &str, max_results: usize) -> AgentResult<Vec<Snippet>> {
        let max_results = max_results.max(1);
        let chunks = self
            .retrieval
            .retrieve_filtered(
                &self.knowledge_base_id,
                query,
                max_results * SEARCH_OVERFETCH_FACTOR,
                max_results,
            )
            .await?;

        Ok(Self::snippets(chunks))
    }

    fn snippets(chunks: Vec<RetrievedChunk>) -> Vec<Snippet> {
        chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| Snippet {
                rank: i + 1,
                title: chunk.title().map(str::to_string),
                preview: preview(&chunk.text),
                id: chunk.id,
                similarity_score: chunk.similarity_score,
                quality_score: chunk.quality_score,
            })
            .collect()
    }

    pub fn format_snippets(snippets: &[Snippet]) -> String {
        snippets
            .iter()
            .map(|s| {
                format!(
                    "Result {} (similarity {:.3}{}):\n{}",
                    s.rank,
                    s.similarity_score,
                    s.title
                        .as_deref()
                        .map(|t| format!(", {}", t))
                        .unwrap_or_default(),
                    s.preview
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[async_trait]
impl Tool for KnowledgeSearchTool {
    fn kind(&self) -> ToolKind {
        ToolKind::KnowledgeSearch
    }

    async fn run(&self, query: &str) -> AgentResult<String> {
        let chunks = self
            .retrieval
            .retrieve(&self.knowledge_base_id, query, DEFAULT_TOP_K)
            .await?;
        let snippets = Self::snippets(chunks);
        if snippets.is_empty() {
            return Err(AgentError::tool_failed(self.name(), "no matching passages"));
        }
        Ok(Self::format_snippets(&snippets))
    }
}

/// Summarizes the knowledge base from a fixed canonical query
pub struct SummaryTool {
    knowledge_base_id: String,
    retrieval: Arc<RetrievalAdapter>,
    llm: Arc<dyn LlmProvider>,
}

impl SummaryTool {
    pub fn new(
        knowledge_base_id: impl Into<String>,
        retrieval: Arc<RetrievalAdapter>,
        llm: Arc<dyn LlmProvider>,
    ) -> Self {
        Self {
            knowledge_base_id: knowledge_base_id.into(),
            retrieval,
            llm,
        }
    }
}

#[async_trait]
impl Tool for SummaryTool {
    fn kind(&self) -> ToolKind {
        ToolKind::Summary
    }

    async fn run(&self, _query: &str) -> AgentResult<String> {
        let chunks = self
            .retrieval
            .retrieve(
                &self.knowledge_base_id,
                prompts::SUMMARY_CANONICAL_QUERY,
                SUMMARY_TOP_K,
            )
            .await?;
        if chunks.is_empty() {
            return Err(AgentError::tool_failed(self.name(), "no document content"));
        }

        let content = join_texts(&chunks);
        self.llm
            .complete(&prompts::summarize_prompt(&content), None)
            .await
    }
}

/// The tools of one session
pub struct ToolSet {
    deep_analysis: DeepAnalysisTool,
    knowledge_search: KnowledgeSearchTool,
    summary: SummaryTool,
}

impl ToolSet {
    pub fn new(
        knowledge_base_id: &str,
        retrieval: Arc<RetrievalAdapter>,
        llm: Arc<dyn LlmProvider>,
    ) -> Self {
        debug!("Building tool set for knowledge base {}", knowledge_base_id);
        Self {
            deep_analysis: DeepAnalysisTool::new(knowledge_base_id, retrieval.clone(), llm.clone()),
            knowledge_search: KnowledgeSearchTool::new(knowledge_base_id, retrieval.clone()),
            summary: SummaryTool::new(knowledge_base_id, retrieval, llm),
        }
    }

    pub fn get(&self, kind: ToolKind) -> &dyn Tool {
        match kind {
            ToolKind::DeepAnalysis => &self.deep_analysis,
            ToolKind::KnowledgeSearch => &self.knowledge_search,
            ToolKind::Summary => &self.summary,
        }
    }

    pub fn knowledge_search(&self) -> &KnowledgeSearchTool {
        &self.knowledge_search
    }

    pub fn len(&self) -> usize {
        ToolKind::ALL.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

fn join_texts(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn preview(text: &str) -> String {
    let mut graphemes = text.graphemes(true);
    let head: String = graphemes.by_ref().take(SNIPPET_PREVIEW_GRAPHEMES).collect();
    if graphemes.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}
