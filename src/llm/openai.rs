use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use super::{status_to_error, transport_error, ChatProvider, Completion, CompletionOptions};
use crate::error::{MentorError, MentorResult};
use crate::types::{ChatMessage, TokenUsage};

pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".into(),
        }
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }

    fn build_body(&self, messages: &[ChatMessage], options: &CompletionOptions) -> serde_json::Value {
        let api_messages: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| json!({"role": m.role.to_string(), "content": m.text}))
            .collect();
        json!({
            "model": options.model,
            "messages": api_messages,
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
        })
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> MentorResult<Completion> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.build_body(messages, options))
            .send()
            .await
            .map_err(|e| transport_error("openai", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_to_error("openai", status.as_u16(), &body));
        }

        let body: serde_json::Value = response.json().await?;
        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                MentorError::LlmFatal("openai: response missing message content".into())
            })?
            .to_string();
        let usage = TokenUsage::new(
            body["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as usize,
            body["usage"]["completion_tokens"].as_u64().unwrap_or(0) as usize,
        );
        Ok(Completion { content, usage })
    }
}
