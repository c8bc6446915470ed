use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::models::{ChatMessage, ChatResponse};

/// A chat-capable language model collaborator. Implementations must be safe
/// for concurrent use: the orchestrator shares one `Arc<dyn LlmClient>` across
/// every in-flight request and every parallel sub-query task within a request.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse>;
}

/// Ollama-compatible chat completion client.
pub struct OllamaLlmClient {
    endpoint: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaLlmClient {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LlmClient for OllamaLlmClient {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse> {
        #[derive(Deserialize)]
        struct OllamaChatResponse {
            message: OllamaMessage,
            #[serde(default)]
            prompt_eval_count: usize,
            #[serde(default)]
            eval_count: usize,
        }

        #[derive(Deserialize)]
        struct OllamaMessage {
            content: String,
        }

        let response = self
            .client
            .post(format!("{}/api/chat", self.endpoint))
            .json(&json!({
                "model": self.model,
                "messages": messages,
                "stream": false,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("Ollama API error: {}", response.status()));
        }

        let result: OllamaChatResponse = response.json().await?;
        Ok(ChatResponse {
            content: result.message.content,
            total_tokens: result.prompt_eval_count + result.eval_count,
        })
    }
}

/// OpenAI-compatible chat completion client.
pub struct OpenAiLlmClient {
    endpoint: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiLlmClient {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiLlmClient {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse> {
        #[derive(Deserialize)]
        struct OpenAiResponse {
            choices: Vec<OpenAiChoice>,
            usage: OpenAiUsage,
        }

        #[derive(Deserialize)]
        struct OpenAiChoice {
            message: OpenAiMessage,
        }

        #[derive(Deserialize)]
        struct OpenAiMessage {
            content: String,
        }

        #[derive(Deserialize, Default)]
        struct OpenAiUsage {
            #[serde(default)]
            total_tokens: usize,
        }

        let response = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({
                "model": self.model,
                "messages": messages,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("OpenAI API error: {}", response.status()));
        }

        let result: OpenAiResponse = response.json().await?;
        let content = result
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No response from OpenAI"))?
            .message
            .content;

        Ok(ChatResponse { content, total_tokens: result.usage.total_tokens })
    }
}

/// Anthropic-compatible chat completion client.
pub struct AnthropicLlmClient {
    endpoint: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicLlmClient {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LlmClient for AnthropicLlmClient {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse> {
        #[derive(Deserialize)]
        struct AnthropicResponse {
            content: Vec<AnthropicContent>,
            usage: AnthropicUsage,
        }

        #[derive(Deserialize)]
        struct AnthropicContent {
            text: String,
        }

        #[derive(Deserialize, Default)]
        struct AnthropicUsage {
            #[serde(default)]
            input_tokens: usize,
            #[serde(default)]
            output_tokens: usize,
        }

        let response = self
            .client
            .post(format!("{}/messages", self.endpoint))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&json!({
                "model": self.model,
                "messages": messages,
                "max_tokens": 1024,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("Anthropic API error: {}", response.status()));
        }

        let result: AnthropicResponse = response.json().await?;
        let content = result
            .content
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No response from Anthropic"))?
            .text;

        Ok(ChatResponse {
            content,
            total_tokens: result.usage.input_tokens + result.usage.output_tokens,
        })
    }
}

/// Deterministic mock client for tests: returns the first configured response
/// whose key is a substring of the prompt, falling back to a default reply.
pub struct MockLlmClient {
    predefined: Vec<(String, String)>,
    default_reply: String,
    tokens_per_call: usize,
}

impl MockLlmClient {
    pub fn new(default_reply: impl Into<String>) -> Self {
        Self { predefined: Vec::new(), default_reply: default_reply.into(), tokens_per_call: 10 }
    }

    pub fn with_response(mut self, prompt_substring: impl Into<String>, reply: impl Into<String>) -> Self {
        self.predefined.push((prompt_substring.into(), reply.into()));
        self
    }

    pub fn with_tokens_per_call(mut self, tokens: usize) -> Self {
        self.tokens_per_call = tokens;
        self
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse> {
        let prompt = messages.first().map(|m| m.content.as_str()).unwrap_or("");
        let content = self
            .predefined
            .iter()
            .find(|(key, _)| prompt.contains(key.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| self.default_reply.clone());

        Ok(ChatResponse { content, total_tokens: self.tokens_per_call })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_client_matches_predefined_response_by_substring() {
        let client = MockLlmClient::new("default")
            .with_response("sub-questions", "[\"q1\", \"q2\"]");

        let reply = client
            .chat(&[ChatMessage::user("please break into sub-questions: explain rust")])
            .await
            .unwrap();

        assert_eq!(reply.content, "[\"q1\", \"q2\"]");
        assert_eq!(reply.total_tokens, 10);
    }

    #[tokio::test]
    async fn mock_client_falls_back_to_default() {
        let client = MockLlmClient::new("fallback reply");
        let reply = client.chat(&[ChatMessage::user("anything")]).await.unwrap();
        assert_eq!(reply.content, "fallback reply");
    }
}
