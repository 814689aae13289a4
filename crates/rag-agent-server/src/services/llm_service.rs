use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::LlmConfig;
use crate::services::agent::{AgentError, AgentResult, LlmProvider, ModelRegistry};

const SYSTEM_PROMPT: &str =
    "You are a knowledge base assistant. Ground every answer in the material you are given.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: usize,
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct Message {
    content: String,
}

/// OpenAI-compatible `/v1/chat/completions` client bound to one model
#[derive(Clone)]
pub struct LlmService {
    client: Client,
    config: LlmConfig,
    model: String,
}

impl LlmService {
    pub fn new(client: Client, config: LlmConfig, model: impl Into<String>) -> Self {
        Self {
            client,
            config,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Builds the message list: optional context goes into a system message
    /// ahead of the prompt.
    pub fn build_messages(prompt: &str, context: Option<&str>) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(SYSTEM_PROMPT)];
        if let Some(ctx) = context.filter(|c| !c.trim().is_empty()) {
            messages.push(ChatMessage::system(format!("Reference material:\n{}", ctx)));
        }
        messages.push(ChatMessage::user(prompt));
        messages
    }

    /// Generate completion without streaming (wait for full response)
    pub async fn generate_chat(&self, messages: Vec<ChatMessage>) -> Result<String> {
        debug!(
            "Starting chat generation with {} messages on {}",
            messages.len(),
            self.model
        );
        let start = Instant::now();

        let request = ChatCompletionRequest {
            model: &self.model,
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.config.base_url))
            .json(&request)
            .send()
            .await
            .context("Failed to call LLM API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("LLM API error: {} - {}", status, body);
        }

        let chat_response: ChatCompletionResponse = response
            .json()
            .await
            .context("Failed to parse LLM response")?;

        let content = chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .context("No choices returned from LLM")?;

        debug!(
            "LLM answered {} chars in {}ms",
            content.len(),
            start.elapsed().as_millis()
        );
        Ok(content)
    }
}

#[async_trait]
impl LlmProvider for LlmService {
    async fn complete(&self, prompt: &str, context: Option<&str>) -> AgentResult<String> {
        self.generate_chat(Self::build_messages(prompt, context))
            .await
            .map_err(|e| AgentError::ModelUnavailable(format!("{:#}", e)))
    }
}

/// Resolves client-facing model types (`qwen`, ...) to configured backends
pub struct LlmModels {
    services: HashMap<String, Arc<LlmService>>,
}

impl LlmModels {
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create LLM HTTP client")?;

        let mut services: HashMap<String, Arc<LlmService>> = config
            .models
            .iter()
            .map(|(model_type, model)| {
                (
                    model_type.clone(),
                    Arc::new(LlmService::new(client.clone(), config.clone(), model.clone())),
                )
            })
            .collect();

        // The default type always resolves, even without an explicit mapping
        services
            .entry(config.default_model.clone())
            .or_insert_with(|| {
                Arc::new(LlmService::new(
                    client.clone(),
                    config.clone(),
                    config.default_model.clone(),
                ))
            });

        Ok(Self { services })
    }

    pub fn model_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.services.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl ModelRegistry for LlmModels {
    fn resolve(&self, model_type: &str) -> AgentResult<Arc<dyn LlmProvider>> {
        self.services
            .get(model_type)
            .map(|service| service.clone() as Arc<dyn LlmProvider>)
            .ok_or_else(|| {
                AgentError::ModelUnavailable(format!("Unknown model type: {}", model_type))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_messages_places_context_first() {
        let messages = LlmService::build_messages("What changed?", Some("release notes"));
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].role, "system");
        assert!(messages[1].content.contains("release notes"));
        assert_eq!(messages[2].content, "What changed?");

        let bare = LlmService::build_messages("hi", Some("   "));
        assert_eq!(bare.len(), 2);
    }

    #[test]
    fn test_registry_resolves_configured_types() {
        let mut config = LlmConfig::default();
        config.models.insert("llama".to_string(), "llama-3.1-8b".to_string());
        let models = LlmModels::from_config(&config).unwrap();

        assert_eq!(models.model_types(), vec!["llama", "qwen"]);
        assert!(models.resolve("llama").is_ok());
        let err = models.resolve("gpt").err().unwrap();
        assert_eq!(err.code(), "ModelUnavailable");
    }
}
