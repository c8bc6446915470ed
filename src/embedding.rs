use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::json;

/// Embeds text into fixed-dimension vectors for similarity search.
/// Implementations must be safe for concurrent use.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Default batches one call per text; implementations backed by a batch
    /// embedding endpoint should override this.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed_query(text).await?);
        }
        Ok(out)
    }

    /// Stable for the process lifetime.
    fn dimension(&self) -> usize;
}

/// HTTP embedding client speaking a simple `{"texts": [...]} -> [[f32]]` contract,
/// the same shape the teacher's `PostgresVectorRetriever::get_embeddings` used.
pub struct HttpEmbeddingClient {
    endpoint: String,
    model: String,
    dimension: usize,
    client: reqwest::Client,
}

impl HttpEmbeddingClient {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            dimension,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_documents(std::slice::from_ref(&text.to_string())).await?;
        vectors.pop().ok_or_else(|| anyhow!("embedding service returned no vector"))
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let response = self
            .client
            .post(format!("{}/embed", self.endpoint))
            .json(&json!({
                "texts": texts,
                "model": self.model,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("embedding service error: {}", response.status()));
        }

        let embeddings: Vec<Vec<f32>> = response.json().await?;
        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Deterministic mock embedding client for tests: derives a repeatable vector
/// from the text length so distinct texts get distinct (but stable) vectors.
pub struct MockEmbeddingClient {
    dimension: usize,
}

impl MockEmbeddingClient {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl EmbeddingClient for MockEmbeddingClient {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let seed = text.len() as f32 + text.bytes().map(|b| b as f32).sum::<f32>();
        Ok((0..self.dimension).map(|i| (seed + i as f32).sin()).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_client_reports_configured_dimension() {
        let client = MockEmbeddingClient::new(8);
        let vector = client.embed_query("hello world").await.unwrap();
        assert_eq!(vector.len(), 8);
        assert_eq!(client.dimension(), 8);
    }

    #[tokio::test]
    async fn mock_client_is_deterministic() {
        let client = MockEmbeddingClient::new(8);
        let a = client.embed_query("same text").await.unwrap();
        let b = client.embed_query("same text").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn embed_documents_default_impl_embeds_each_text() {
        let client = MockEmbeddingClient::new(4);
        let texts = vec!["a".to_string(), "b".to_string()];
        let vectors = client.embed_documents(&texts).await.unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0].len(), 4);
    }
}
