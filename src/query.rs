use std::sync::Arc;

use anyhow::Result;

use crate::agent_router::{AgentRouter, Searcher};
use crate::chain_searcher::ChainSearcher;
use crate::config::{Config, FEATURE_EMBEDDING, FEATURE_LLM, FEATURE_VECTOR_DB};
use crate::deep_searcher::DeepSearcher;
use crate::embedding::{EmbeddingClient, HttpEmbeddingClient};
use crate::llm::{AnthropicLlmClient, LlmClient, OllamaLlmClient, OpenAiLlmClient};
use crate::models::RetrievalResult;
use crate::naive_searcher::NaiveSearcher;
use crate::vector_store::{PostgresVectorStore, VectorStore, WeaviateVectorStore};

/// Default bound on reflection/follow-up hops when a caller doesn't pass one
/// explicitly, matching the reference implementation's module-level default.
pub const DEFAULT_MAX_ITER: usize = 3;

/// Wires together the configured collaborators and the agent router. This is
/// the single entry point embedders, the HTTP façade, and the CLI all share.
pub struct Orchestrator {
    router: AgentRouter,
}

impl Orchestrator {
    pub fn new(router: AgentRouter) -> Self {
        Self { router }
    }

    pub async fn from_config(config: &Config) -> Result<Self> {
        let llm = build_llm_client(config)?;
        let embedding = build_embedding_client(config)?;
        let vector_store = build_vector_store(config).await?;

        let deep = Arc::new(DeepSearcher::new(llm.clone(), embedding.clone(), vector_store.clone()));
        let chain = Arc::new(ChainSearcher::new(llm.clone(), embedding.clone(), vector_store.clone()));
        let naive = Arc::new(NaiveSearcher::new(llm.clone(), embedding.clone(), vector_store));

        let agents: Vec<Arc<dyn Searcher>> = vec![deep, chain, naive];
        let router = AgentRouter::new(llm, agents);

        Ok(Self::new(router))
    }

    /// Retrieve-only: returns deduplicated chunks and the tokens spent, with
    /// no final summarization call.
    pub async fn retrieve(&self, original_query: &str, max_iter: Option<usize>) -> Result<(Vec<RetrievalResult>, usize)> {
        self.router.retrieve(original_query, max_iter.unwrap_or(DEFAULT_MAX_ITER)).await
    }

    /// Full pipeline: routes to an agent, retrieves, and summarizes into a
    /// final natural-language answer.
    pub async fn query(&self, original_query: &str, max_iter: Option<usize>) -> Result<(String, Vec<RetrievalResult>, usize)> {
        self.router.query(original_query, max_iter.unwrap_or(DEFAULT_MAX_ITER)).await
    }
}

fn build_llm_client(config: &Config) -> Result<Arc<dyn LlmClient>> {
    let provider = config.provider(FEATURE_LLM)?;
    let endpoint = provider.get_str("endpoint").unwrap_or_else(|| "http://localhost:11434".to_string());
    let model = provider.get_str("model").unwrap_or_else(|| "llama3.2".to_string());
    let api_key = provider.get_str("api_key").unwrap_or_default();

    let client: Arc<dyn LlmClient> = match provider.provider.as_str() {
        "openai" => Arc::new(OpenAiLlmClient::new(endpoint, model, api_key)),
        "anthropic" => Arc::new(AnthropicLlmClient::new(endpoint, model, api_key)),
        _ => Arc::new(OllamaLlmClient::new(endpoint, model)),
    };
    Ok(client)
}

fn build_embedding_client(config: &Config) -> Result<Arc<dyn EmbeddingClient>> {
    let provider = config.provider(FEATURE_EMBEDDING)?;
    let endpoint = provider.get_str("endpoint").unwrap_or_else(|| "http://localhost:8001".to_string());
    let model = provider.get_str("model").unwrap_or_else(|| "e5-base-v2".to_string());
    let dimension = provider.get_usize("dimension").unwrap_or(768);
    Ok(Arc::new(HttpEmbeddingClient::new(endpoint, model, dimension)))
}

async fn build_vector_store(config: &Config) -> Result<Arc<dyn VectorStore>> {
    let provider = config.provider(FEATURE_VECTOR_DB)?;
    let endpoint = provider.get_str("endpoint").unwrap_or_else(|| "postgresql://localhost/deepsearcher".to_string());
    let default_collection = provider.get_str("default_collection").unwrap_or_else(|| "default".to_string());

    let store: Arc<dyn VectorStore> = if provider.provider == "weaviate" {
        Arc::new(WeaviateVectorStore::new(endpoint, default_collection))
    } else {
        Arc::new(PostgresVectorStore::new(&endpoint, default_collection).await?)
    };
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_router::AgentRouter as RealAgentRouter;
    use crate::embedding::MockEmbeddingClient;
    use crate::llm::MockLlmClient;
    use crate::models::CollectionInfo;
    use crate::vector_store::MockVectorStore;

    fn orchestrator() -> Orchestrator {
        let llm = Arc::new(MockLlmClient::new("agent index: 3"));
        let embedding = Arc::new(MockEmbeddingClient::new(8));
        let store = Arc::new(MockVectorStore::new(
            vec![CollectionInfo { collection_name: "docs".to_string(), description: "the only one".to_string() }],
            "docs",
        ));

        let deep = Arc::new(DeepSearcher::new(llm.clone(), embedding.clone(), store.clone()));
        let chain = Arc::new(ChainSearcher::new(llm.clone(), embedding.clone(), store.clone()));
        let naive = Arc::new(NaiveSearcher::new(llm.clone(), embedding.clone(), store));

        let agents: Vec<Arc<dyn Searcher>> = vec![deep, chain, naive];
        let router = RealAgentRouter::new(llm, agents);

        Orchestrator::new(router)
    }

    #[tokio::test]
    async fn retrieve_routes_through_selected_agent() {
        let orchestrator = orchestrator();
        let (hits, _tokens) = orchestrator.retrieve("what is X?", Some(1)).await.unwrap();
        assert!(!hits.is_empty());
    }
}
