use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use super::error::{AgentError, AgentResult};
use super::providers::{EmbeddingProvider, VectorHit, VectorSearch};

pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_QUALITY_SCORE: f32 = 0.5;

/// Payload keys that may carry the passage text, in lookup order
const TEXT_KEYS: [&str; 3] = ["text", "content", "page_content"];

/// A passage returned by the retrieval adapter
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub id: String,
    pub text: String,
    /// In [0, 1]
    pub similarity_score: f32,
    /// In [0, 1]
    pub quality_score: f32,
    pub source_metadata: Map<String, Value>,
}

impl RetrievedChunk {
    /// Document title from the source metadata, if the indexer stored one
    pub fn title(&self) -> Option<&str> {
        ["document_title", "title", "source"]
            .iter()
            .find_map(|k| self.source_metadata.get(*k).and_then(Value::as_str))
    }
}

/// Wraps the vector collaborator: text query in, ranked non-empty passages out.
pub struct RetrievalAdapter {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorSearch>,
    default_quality: f32,
}

impl RetrievalAdapter {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, store: Arc<dyn VectorSearch>) -> Self {
        Self {
            embedder,
            store,
            default_quality: DEFAULT_QUALITY_SCORE,
        }
    }

    pub fn with_default_quality(mut self, quality: f32) -> Self {
        self.default_quality = quality.clamp(0.0, 1.0);
        self
    }

    /// Collection that holds the passages of a knowledge base
    pub fn collection_for(knowledge_base_id: &str) -> String {
        format!("kb_{}", knowledge_base_id)
    }

    pub async fn retrieve(
        &self,
        knowledge_base_id: &str,
        query: &str,
        top_k: usize,
    ) -> AgentResult<Vec<RetrievedChunk>> {
        self.retrieve_filtered(knowledge_base_id, query, top_k, top_k)
            .await
    }

    /// Requests `top_k` hits, drops empty passages, ranks, then keeps at most `take`.
    pub async fn retrieve_filtered(
        &self,
        knowledge_base_id: &str,
        query: &str,
        top_k: usize,
        take: usize,
    ) -> AgentResult<Vec<RetrievedChunk>> {
        let start = Instant::now();
        let collection = Self::collection_for(knowledge_base_id);

        let vector = self.embedder.embed(query).await?;

        let hits = self
            .store
            .search(&collection, &vector, top_k)
            .await
            .map_err(|e| match e {
                AgentError::RetrievalUnavailable(_) => e,
                other => AgentError::RetrievalUnavailable(other.to_string()),
            })?;
        let hit_count = hits.len();

        let mut chunks: Vec<RetrievedChunk> = hits
            .into_iter()
            .filter_map(|hit| materialize(hit, self.default_quality))
            .collect();
        rank_chunks(&mut chunks);
        chunks.truncate(take);

        debug!(
            collection = %collection,
            hits = hit_count,
            kept = chunks.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Retrieval finished"
        );

        Ok(chunks)
    }
}

/// Similarity desc, then quality desc. The sort is stable, so remaining ties
/// keep the collaborator's order.
pub fn rank_chunks(chunks: &mut [RetrievedChunk]) {
    chunks.sort_by(|a, b| {
        b.similarity_score
            .total_cmp(&a.similarity_score)
            .then_with(|| b.quality_score.total_cmp(&a.quality_score))
    });
}

fn materialize(hit: VectorHit, default_quality: f32) -> Option<RetrievedChunk> {
    let VectorHit { id, score, payload } = hit;
    let mut fields = match payload {
        Value::Object(map) => map,
        _ => return None,
    };

    let text = TEXT_KEYS
        .iter()
        .find_map(|k| fields.get(*k).and_then(Value::as_str).map(str::to_string))?;
    if text.trim().is_empty() {
        return None;
    }
    for key in TEXT_KEYS {
        fields.remove(key);
    }

    // LangChain-style payloads nest everything under "metadata"
    let source_metadata = match fields.remove("metadata") {
        Some(Value::Object(nested)) if fields.is_empty() => nested,
        Some(Value::Object(nested)) => {
            fields.extend(nested);
            fields
        }
        Some(other) => {
            fields.insert("metadata".to_string(), other);
            fields
        }
        None => fields,
    };

    let quality_score = source_metadata
        .get("quality_score")
        .and_then(Value::as_f64)
        .map(|q| q as f32)
        .filter(|q| q.is_finite())
        .map(|q| q.clamp(0.0, 1.0))
        .unwrap_or(default_quality);

    let similarity_score = if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    };

    Some(RetrievedChunk {
        id,
        text,
        similarity_score,
        quality_score,
        source_metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::agent::providers::{MockEmbeddingProvider, MockVectorSearch};
    use serde_json::json;

    fn hit(id: &str, score: f32, payload: Value) -> VectorHit {
        VectorHit {
            id: id.to_string(),
            score,
            payload,
        }
    }

    fn adapter_with(hits: Vec<VectorHit>) -> RetrievalAdapter {
        let mut embedder = MockEmbeddingProvider::new();
        embedder.expect_embed().returning(|_| Ok(vec![0.1, 0.2, 0.3]));

        let mut store = MockVectorSearch::new();
        store
            .expect_search()
            .withf(|collection, vector, _| collection == "kb_kb1" && vector.len() == 3)
            .returning(move |_, _, limit| Ok(hits.iter().take(limit).cloned().collect()));

        RetrievalAdapter::new(Arc::new(embedder), Arc::new(store))
    }

    #[tokio::test]
    async fn test_empty_text_never_materialized() {
        let adapter = adapter_with(vec![
            hit("a", 0.9, json!({"text": "   "})),
            hit("b", 0.8, json!({"text": "budget"})),
            hit("c", 0.7, json!({"content": ""})),
            hit("d", 0.6, json!({"title": "no text at all"})),
        ]);

        let chunks = adapter.retrieve("kb1", "budget", 5).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id, "b");
    }

    #[tokio::test]
    async fn test_ordering_similarity_then_quality_then_collaborator_order() {
        let adapter = adapter_with(vec![
            hit("low", 0.2, json!({"text": "x"})),
            hit("tie-first", 0.8, json!({"text": "x"})),
            hit("tie-better-quality", 0.8, json!({"text": "x", "quality_score": 0.9})),
            hit("tie-second", 0.8, json!({"text": "x"})),
            hit("top", 0.95, json!({"text": "x"})),
        ]);

        let chunks = adapter.retrieve("kb1", "q", 5).await.unwrap();
        let ids: Vec<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["top", "tie-better-quality", "tie-first", "tie-second", "low"]
        );
    }

    #[tokio::test]
    async fn test_quality_defaults_and_metadata() {
        let adapter = adapter_with(vec![hit(
            "a",
            1.7,
            json!({"page_content": "hello", "metadata": {"document_title": "Report"}}),
        )]);

        let chunks = adapter.retrieve("kb1", "q", 5).await.unwrap();
        assert_eq!(chunks[0].quality_score, DEFAULT_QUALITY_SCORE);
        assert_eq!(chunks[0].similarity_score, 1.0);
        assert_eq!(chunks[0].title(), Some("Report"));
        assert!(!chunks[0].source_metadata.contains_key("page_content"));
    }

    #[tokio::test]
    async fn test_filter_then_take() {
        let mut hits = Vec::new();
        for i in 0..8 {
            let text = if i == 1 || i == 4 { "" } else { "passage" };
            hits.push(hit(&format!("h{}", i), 0.9 - i as f32 * 0.05, json!({ "text": text })));
        }
        let adapter = adapter_with(hits);

        let chunks = adapter.retrieve_filtered("kb1", "q", 8, 5).await.unwrap();
        let ids: Vec<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["h0", "h2", "h3", "h5", "h6"]);
    }

    #[tokio::test]
    async fn test_store_failure_is_retrieval_unavailable() {
        let mut embedder = MockEmbeddingProvider::new();
        embedder.expect_embed().returning(|_| Ok(vec![1.0]));
        let mut store = MockVectorSearch::new();
        store
            .expect_search()
            .returning(|_, _, _| Err(AgentError::ModelUnavailable("socket closed".into())));

        let adapter = RetrievalAdapter::new(Arc::new(embedder), Arc::new(store));
        let err = adapter.retrieve("kb1", "q", 5).await.unwrap_err();
        assert!(matches!(err, AgentError::RetrievalUnavailable(_)));
    }

    #[tokio::test]
    async fn test_embedding_failure_is_model_unavailable() {
        let mut embedder = MockEmbeddingProvider::new();
        embedder
            .expect_embed()
            .returning(|_| Err(AgentError::ModelUnavailable("embedding server down".into())));
        let mut store = MockVectorSearch::new();
        store.expect_search().never();

        let adapter = RetrievalAdapter::new(Arc::new(embedder), Arc::new(store));
        let err = adapter.retrieve("kb1", "q", 5).await.unwrap_err();
        assert!(matches!(err, AgentError::ModelUnavailable(_)));
    }
}
