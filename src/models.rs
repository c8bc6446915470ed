use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One message in a chat-style LLM request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }
}

/// Response from an [`crate::llm::LlmClient`] call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    pub total_tokens: usize,
}

/// A single passage returned from a vector store search, carrying whatever the
/// store knows about where it came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub embedding: Option<Vec<f32>>,
    pub text: String,
    pub reference: String,
    pub metadata: Value,
    pub score: f32,
}

impl RetrievalResult {
    /// The text to feed into a summarization prompt: the `wider_text` metadata
    /// field when present (text-window splitting), otherwise the literal chunk text.
    pub fn display_text(&self, prefer_wider: bool) -> String {
        if prefer_wider {
            if let Some(wider) = self.metadata.get("wider_text").and_then(|v| v.as_str()) {
                return wider.to_string();
            }
        }
        self.text.clone()
    }
}

/// A chunk of text awaiting insertion into a vector store collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub reference: String,
    pub metadata: Value,
    pub embedding: Option<Vec<f32>>,
}

/// Name and description of a vector store collection, as returned by `list_collections`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub collection_name: String,
    pub description: String,
}

/// Removes duplicate results by exact text equality, keeping the first occurrence.
pub fn dedupe(results: Vec<RetrievalResult>) -> Vec<RetrievalResult> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(results.len());
    for result in results {
        if seen.insert(result.text.clone()) {
            out.push(result);
        }
    }
    out
}

/// Response body for `POST /query`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub result: String,
    pub consume_token: usize,
}

/// Request body for `POST /set-provider-config`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetProviderConfigRequest {
    pub feature: String,
    pub provider: String,
    #[serde(default)]
    pub config: Value,
}
