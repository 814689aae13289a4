use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::services::agent::{AgentError, AgentResult, EmbeddingProvider};

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    content: &'a str,
    // Sent as well for OpenAI-style servers
    input: &'a str,
}

#[derive(Clone)]
pub struct EmbeddingService {
    client: Client,
    base_url: String,
    dimension: usize,
}

impl EmbeddingService {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create embedding HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            dimension: config.dimension,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_internal(&self, text: &str) -> Result<Vec<f32>> {
        debug!("Generating embedding for {} chars", text.len());

        let response = self
            .client
            .post(format!("{}/embedding", self.base_url))
            .json(&EmbeddingRequest {
                content: text,
                input: text,
            })
            .send()
            .await
            .context("Failed to connect to embedding server")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Embedding API error ({}): {}", status, body);
        }

        let json_value: Value = response
            .json()
            .await
            .context("Failed to parse embedding response as JSON")?;

        let embedding = parse_embedding(&json_value)?;

        if embedding.len() != self.dimension {
            anyhow::bail!(
                "Embedding dimension mismatch: expected {}, got {}",
                self.dimension,
                embedding.len()
            );
        }

        Ok(embedding)
    }
}

/// Accepts the response shapes served by llama.cpp and OpenAI-compatible servers:
/// `{"embedding": [...]}`, `{"data": [{"embedding": [...]}]}`,
/// `[{"embedding": [...]}]` and a bare `[...]`.
fn parse_embedding(value: &Value) -> Result<Vec<f32>> {
    let floats = |arr: &Vec<Value>| -> Vec<f32> {
        arr.iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect()
    };

    let embedding = match value {
        Value::Array(arr) => match arr.first() {
            None => anyhow::bail!("Empty array returned from embedding server"),
            // Batched llama.cpp output: [[...]]
            Some(Value::Array(inner)) => floats(inner),
            Some(first) => match first.get("embedding") {
                Some(Value::Array(inner)) => floats(inner),
                _ => floats(arr),
            },
        },
        Value::Object(map) => match (map.get("embedding"), map.get("data")) {
            (Some(Value::Array(arr)), _) => floats(arr),
            (_, Some(Value::Array(data))) => match data.first().and_then(|d| d.get("embedding")) {
                Some(Value::Array(arr)) => floats(arr),
                _ => anyhow::bail!("Unrecognized embedding response format: {}", value),
            },
            _ => anyhow::bail!("Unrecognized embedding response format: {}", value),
        },
        _ => anyhow::bail!("Unrecognized embedding response format: {}", value),
    };

    if embedding.is_empty() {
        anyhow::bail!("Generated embedding is empty");
    }
    Ok(embedding)
}

#[async_trait]
impl EmbeddingProvider for EmbeddingService {
    async fn embed(&self, text: &str) -> AgentResult<Vec<f32>> {
        self.embed_internal(text)
            .await
            .map_err(|e| AgentError::ModelUnavailable(format!("embedding: {:#}", e)))
    }
}
