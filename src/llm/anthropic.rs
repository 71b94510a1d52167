use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use super::{status_to_error, transport_error, ChatProvider, Completion, CompletionOptions};
use crate::error::{MentorError, MentorResult};
use crate::types::{ChatMessage, ChatRole, TokenUsage};

pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.anthropic.com".into(),
        }
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }

    /// System messages ride in the top-level `system` field; the rest keep
    /// their roles.
    fn build_body(&self, messages: &[ChatMessage], options: &CompletionOptions) -> serde_json::Value {
        let system: String = messages
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .map(|m| m.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let api_messages: Vec<serde_json::Value> = messages
            .iter()
            .filter(|m| m.role != ChatRole::System)
            .map(|m| json!({"role": m.role.to_string(), "content": m.text}))
            .collect();

        let mut body = json!({
            "model": options.model,
            "max_tokens": options.max_tokens,
            "messages": api_messages,
            "temperature": options.temperature,
        });
        if !system.is_empty() {
            body["system"] = json!(system);
        }
        body
    }
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> MentorResult<Completion> {
        let url = format!("{}/v1/messages", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&self.build_body(messages, options))
            .send()
            .await
            .map_err(|e| transport_error("anthropic", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_to_error("anthropic", status.as_u16(), &body));
        }

        let body: serde_json::Value = response.json().await?;
        let content = body["content"][0]["text"]
            .as_str()
            .ok_or_else(|| {
                MentorError::LlmFatal("anthropic: response missing text content".into())
            })?
            .to_string();
        let usage = TokenUsage::new(
            body["usage"]["input_tokens"].as_u64().unwrap_or(0) as usize,
            body["usage"]["output_tokens"].as_u64().unwrap_or(0) as usize,
        );
        Ok(Completion { content, usage })
    }
}
