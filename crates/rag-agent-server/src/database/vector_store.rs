use async_trait::async_trait;
use pgvector::Vector;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{ChunkRow, DbPool};
use crate::services::agent::{
    AgentError, AgentResult, KnowledgeBaseRegistry, VectorHit, VectorSearch,
};

const COLLECTION_PREFIX: &str = "kb_";

/// pgvector-backed passage store.
///
/// Collections map to knowledge bases: `kb_{id}` reads the rows of
/// `kb_chunks` whose `knowledge_base_id` is `id`.
#[derive(Clone)]
pub struct PgVectorStore {
    pool: DbPool,
}

impl PgVectorStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

fn knowledge_base_of(collection_id: &str) -> &str {
    collection_id
        .strip_prefix(COLLECTION_PREFIX)
        .unwrap_or(collection_id)
}

fn row_to_hit(row: ChunkRow) -> VectorHit {
    let mut payload = Map::new();
    payload.insert("text".to_string(), Value::String(row.content));
    if let Some(quality) = row.quality_score {
        payload.insert("quality_score".to_string(), json!(quality));
    }
    if let Some(metadata @ Value::Object(_)) = row.metadata {
        payload.insert("metadata".to_string(), metadata);
    }

    VectorHit {
        id: row.id,
        score: row.similarity,
        payload: Value::Object(payload),
    }
}

#[async_trait]
impl VectorSearch for PgVectorStore {
    async fn search(
        &self,
        collection_id: &str,
        vector: &[f32],
        limit: usize,
    ) -> AgentResult<Vec<VectorHit>> {
        let knowledge_base_id = knowledge_base_of(collection_id);

        let rows = sqlx::query_as::<_, ChunkRow>(
            r#"SELECT
                id::text AS id,
                content,
                metadata,
                quality_score,
                (1 - (embedding <=> $1))::float4 AS similarity
               FROM kb_chunks
               WHERE knowledge_base_id = $2
               ORDER BY embedding <=> $1
               LIMIT $3"#,
        )
        .bind(Vector::from(vector.to_vec()))
        .bind(knowledge_base_id)
        .bind(limit as i64)
        .persistent(false)
        .fetch_all(self.pool.get_pool())
        .await
        .map_err(|e| AgentError::RetrievalUnavailable(format!("vector search failed: {}", e)))?;

        debug!(
            "Found {} chunks in {} (limit {})",
            rows.len(),
            collection_id,
            limit
        );

        Ok(rows.into_iter().map(row_to_hit).collect())
    }
}

#[async_trait]
impl KnowledgeBaseRegistry for PgVectorStore {
    async fn exists(&self, knowledge_base_id: &str) -> AgentResult<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM knowledge_bases WHERE id = $1)",
        )
        .bind(knowledge_base_id)
        .fetch_one(self.pool.get_pool())
        .await
        .map_err(|e| AgentError::RetrievalUnavailable(format!("knowledge base lookup failed: {}", e)))
    }
}
