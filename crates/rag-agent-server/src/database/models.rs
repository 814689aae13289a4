use serde_json::Value;
use sqlx::FromRow;

/// One row of a similarity search over `kb_chunks`
#[derive(Debug, Clone, FromRow)]
pub struct ChunkRow {
    pub id: String,
    pub content: String,
    pub metadata: Option<Value>,
    pub quality_score: Option<f32>,
    pub similarity: f32,
}
