use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::agent_router::Searcher;
use crate::collection_router::CollectionRouter;
use crate::embedding::EmbeddingClient;
use crate::llm::LlmClient;
use crate::models::{dedupe, ChatMessage, RetrievalResult};
use crate::vector_store::VectorStore;

const SUMMARY_PROMPT: &str = r#"Given the following documents, answer the question.

Question: {query}

Documents:
{documents}

Answer:"#;

/// Single-pass baseline: route once, embed once, fetch a flat top-k spread
/// evenly across the selected collections, then summarize in one LLM call.
/// Grounded in the reference implementation's `NaiveRAG` agent.
pub struct NaiveSearcher {
    llm: Arc<dyn LlmClient>,
    embedding: Arc<dyn EmbeddingClient>,
    vector_store: Arc<dyn VectorStore>,
    route_collection: bool,
    text_window_splitter: bool,
    top_k: usize,
}

impl NaiveSearcher {
    pub fn new(llm: Arc<dyn LlmClient>, embedding: Arc<dyn EmbeddingClient>, vector_store: Arc<dyn VectorStore>) -> Self {
        Self {
            llm,
            embedding,
            vector_store,
            route_collection: true,
            text_window_splitter: true,
            top_k: 10,
        }
    }

    fn collection_router(&self) -> CollectionRouter {
        CollectionRouter::new(self.llm.clone(), self.vector_store.clone())
    }

    fn format_retrieved_results(&self, results: &[RetrievalResult]) -> String {
        results
            .iter()
            .enumerate()
            .map(|(i, r)| format!("<doc_{i}>\n{}\n</doc_{i}>\n", r.display_text(self.text_window_splitter)))
            .collect::<Vec<_>>()
            .join("")
    }

    pub async fn retrieve_with_tokens(&self, original_query: &str) -> Result<(Vec<RetrievalResult>, usize)> {
        info!("naive search: {}", original_query);

        let (selected_collections, routing_tokens) = if self.route_collection {
            self.collection_router().route(original_query, self.embedding.dimension()).await?
        } else {
            (self.collection_router().all_collections(self.embedding.dimension()).await?, 0)
        };

        if selected_collections.is_empty() {
            return Ok((vec![], routing_tokens));
        }

        // Mirrors the Python `top_k // len(selected_collections)` floor division,
        // with a floor of one hit per collection so a single large top_k still
        // spreads across every routed collection.
        let per_collection_k = (self.top_k / selected_collections.len()).max(1);

        let query_vector = self.embedding.embed_query(original_query).await?;

        let mut all_hits = Vec::new();
        for collection in &selected_collections {
            let hits = self.vector_store.search(collection, &query_vector, per_collection_k).await?;
            all_hits.extend(hits);
        }

        Ok((dedupe(all_hits), routing_tokens))
    }
}

#[async_trait]
impl Searcher for NaiveSearcher {
    fn description(&self) -> &str {
        "This agent is suitable for simple, single-hop questions that can be answered from a single retrieval pass."
    }

    async fn retrieve(&self, query: &str, _max_iter: usize) -> Result<(Vec<RetrievalResult>, usize)> {
        self.retrieve_with_tokens(query).await
    }

    async fn query(&self, query: &str, max_iter: usize) -> Result<(String, Vec<RetrievalResult>, usize)> {
        let (hits, retrieval_tokens) = self.retrieve(query, max_iter).await?;

        let prompt = SUMMARY_PROMPT.replace("{query}", query).replace("{documents}", &self.format_retrieved_results(&hits));

        let response = self.llm.chat(&[ChatMessage::user(prompt)]).await?;

        Ok((response.content, hits, retrieval_tokens + response.total_tokens))
    }
}
