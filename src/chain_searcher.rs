use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::agent_router::Searcher;
use crate::collection_router::CollectionRouter;
use crate::embedding::EmbeddingClient;
use crate::llm::LlmClient;
use crate::models::{dedupe, ChatMessage, RetrievalResult};
use crate::reply::coerce_index_list;
use crate::vector_store::VectorStore;

const REFLECT_PROMPT: &str = r#"Given the original query and the previous queries and answers, generate a new simple follow-up question that would help gather more information to answer the original query.

Original Query: {query}

Previous queries and answers:
{intermediate_context}

Follow-up question:"#;

const RETRIEVE_ANSWER_PROMPT: &str = r#"Given the following documents, generate an appropriate answer to the question. Only use information present in the documents.

Question: {query}

Documents:
{documents}

Answer:"#;

const SUPPORTED_DOCS_PROMPT: &str = r#"Given the following documents, select the ones that are support the Q-A pair below. Return a list of the supporting document indices (0-based).

Question: {query}
Answer: {answer}

Documents:
{documents}

Supporting document indices:"#;

const CHECK_ENOUGH_INFO_PROMPT: &str = r#"Given the following intermediate queries and answers, judge whether you have enough information to answer the original query. Answer Yes or No.

Original Query: {query}

Intermediate queries and answers:
{intermediate_context}
"#;

const FINAL_SUMMARY_PROMPT: &str = r#"Given the following intermediate queries and answers, generate a final answer for the original query.

Original Query: {query}

Intermediate queries and answers:
{intermediate_context}
"#;

/// Serial follow-up searcher: each hop asks one new question, answers it from
/// freshly retrieved chunks, and checks whether enough has been gathered.
/// Grounded in the reference implementation's `ChainOfRAG` agent.
pub struct ChainSearcher {
    llm: Arc<dyn LlmClient>,
    embedding: Arc<dyn EmbeddingClient>,
    vector_store: Arc<dyn VectorStore>,
    route_collection: bool,
    text_window_splitter: bool,
    early_stopping: bool,
    top_k: usize,
}

pub struct ChainSearchMeta {
    pub intermediate_context: Vec<(String, String)>,
}

impl ChainSearcher {
    pub fn new(llm: Arc<dyn LlmClient>, embedding: Arc<dyn EmbeddingClient>, vector_store: Arc<dyn VectorStore>) -> Self {
        Self {
            llm,
            embedding,
            vector_store,
            route_collection: true,
            text_window_splitter: true,
            early_stopping: true,
            top_k: 10,
        }
    }

    fn collection_router(&self) -> CollectionRouter {
        CollectionRouter::new(self.llm.clone(), self.vector_store.clone())
    }

    fn format_intermediate_context(context: &[(String, String)]) -> String {
        if context.is_empty() {
            return "None yet.".to_string();
        }
        context
            .iter()
            .enumerate()
            .map(|(i, (q, a))| format!("Query {i}: {q}\nAnswer {i}: {a}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn format_retrieved_results(&self, results: &[RetrievalResult]) -> String {
        results
            .iter()
            .enumerate()
            .map(|(i, r)| format!("<doc_{i}>\n{}\n</doc_{i}>\n", r.display_text(self.text_window_splitter)))
            .collect::<Vec<_>>()
            .join("")
    }

    async fn reflect_get_subquery(&self, query: &str, intermediate_context: &[(String, String)]) -> Result<(String, usize)> {
        let prompt = REFLECT_PROMPT
            .replace("{query}", query)
            .replace("{intermediate_context}", &Self::format_intermediate_context(intermediate_context));

        let response = self.llm.chat(&[ChatMessage::user(prompt)]).await?;
        Ok((response.content.trim().to_string(), response.total_tokens))
    }

    async fn retrieve_and_answer(&self, query: &str) -> Result<(String, Vec<RetrievalResult>, usize)> {
        let mut consumed_tokens = 0;

        let selected_collections = if self.route_collection {
            let (names, tokens) = self.collection_router().route(query, self.embedding.dimension()).await?;
            consumed_tokens += tokens;
            names
        } else {
            self.collection_router().all_collections(self.embedding.dimension()).await?
        };

        let query_vector = self.embedding.embed_query(query).await?;
        let mut all_hits = Vec::new();
        for collection in selected_collections {
            let hits = self.vector_store.search(&collection, &query_vector, self.top_k).await?;
            all_hits.extend(hits);
        }
        let all_hits = dedupe(all_hits);

        let prompt = RETRIEVE_ANSWER_PROMPT
            .replace("{query}", query)
            .replace("{documents}", &self.format_retrieved_results(&all_hits));

        let response = self.llm.chat(&[ChatMessage::user(prompt)]).await?;
        consumed_tokens += response.total_tokens;

        Ok((response.content, all_hits, consumed_tokens))
    }

    async fn get_supported_docs(
        &self,
        results: &[RetrievalResult],
        query: &str,
        answer: &str,
    ) -> Result<(Vec<RetrievalResult>, usize)> {
        if results.is_empty() {
            return Ok((vec![], 0));
        }

        let prompt = SUPPORTED_DOCS_PROMPT
            .replace("{query}", query)
            .replace("{answer}", answer)
            .replace("{documents}", &self.format_retrieved_results(results));

        let response = self.llm.chat(&[ChatMessage::user(prompt)]).await?;
        let indices = coerce_index_list(&response.content).unwrap_or_else(|err| {
            warn!("could not parse supporting document indices from '{}': {}", response.content, err);
            vec![]
        });

        let supported = indices.into_iter().filter_map(|i| results.get(i).cloned()).collect();

        Ok((supported, response.total_tokens))
    }

    async fn check_has_enough_info(&self, query: &str, intermediate_context: &[(String, String)]) -> Result<(bool, usize)> {
        let prompt = CHECK_ENOUGH_INFO_PROMPT
            .replace("{query}", query)
            .replace("{intermediate_context}", &Self::format_intermediate_context(intermediate_context));

        let response = self.llm.chat(&[ChatMessage::user(prompt)]).await?;
        let normalized = response.content.trim().to_lowercase();
        Ok((normalized.starts_with("yes"), response.total_tokens))
    }

    pub async fn retrieve_with_meta(
        &self,
        original_query: &str,
        max_iter: usize,
    ) -> Result<(Vec<RetrievalResult>, usize, ChainSearchMeta)> {
        info!("chain search: {}", original_query);

        let mut total_tokens = 0;
        let mut intermediate_context: Vec<(String, String)> = Vec::new();
        let mut accumulated_hits: Vec<RetrievalResult> = Vec::new();

        for hop in 0..max_iter {
            debug!("chain search hop {}", hop + 1);

            let (follow_up, tokens) = self.reflect_get_subquery(original_query, &intermediate_context).await?;
            total_tokens += tokens;

            let (answer, hits, tokens) = self.retrieve_and_answer(&follow_up).await?;
            total_tokens += tokens;

            let (supported, tokens) = self.get_supported_docs(&hits, &follow_up, &answer).await?;
            total_tokens += tokens;

            intermediate_context.push((follow_up, answer));
            accumulated_hits = dedupe(accumulated_hits.into_iter().chain(supported).collect());

            if self.early_stopping {
                let (enough, tokens) = self.check_has_enough_info(original_query, &intermediate_context).await?;
                total_tokens += tokens;
                if enough {
                    break;
                }
            }
        }

        Ok((accumulated_hits, total_tokens, ChainSearchMeta { intermediate_context }))
    }
}

#[async_trait]
impl Searcher for ChainSearcher {
    fn description(&self) -> &str {
        "This agent is suitable for multi-hop questions that require iteratively gathering and connecting facts before an answer is possible."
    }

    async fn retrieve(&self, query: &str, max_iter: usize) -> Result<(Vec<RetrievalResult>, usize)> {
        let (hits, tokens, _) = self.retrieve_with_meta(query, max_iter).await?;
        Ok((hits, tokens))
    }

    async fn query(&self, query: &str, max_iter: usize) -> Result<(String, Vec<RetrievalResult>, usize)> {
        let (hits, n_token_retrieval, meta) = self.retrieve_with_meta(query, max_iter).await?;

        let prompt = FINAL_SUMMARY_PROMPT
            .replace("{query}", query)
            .replace("{intermediate_context}", &Self::format_intermediate_context(&meta.intermediate_context));

        let response = self.llm.chat(&[ChatMessage::user(prompt)]).await?;

        Ok((response.content, hits, n_token_retrieval + response.total_tokens))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbeddingClient;
    use crate::llm::MockLlmClient;
    use crate::models::CollectionInfo;
    use crate::vector_store::MockVectorStore;

    fn store() -> Arc<MockVectorStore> {
        Arc::new(MockVectorStore::new(
            vec![CollectionInfo { collection_name: "docs".to_string(), description: String::new() }],
            "docs",
        ))
    }

    fn mock_llm() -> Arc<MockLlmClient> {
        Arc::new(
            MockLlmClient::new("default")
                .with_response("generate a new simple follow-up question", "What is the significance of deep learning?")
                .with_response("generate an appropriate answer", "Deep learning is a subset of machine learning.")
                .with_response("judge whether you have enough information", "Yes")
                .with_response("select the ones that are support the Q-A pair", "[0, 1]")
                .with_response("generate a final answer", "Deep learning is an advanced subset of machine learning."),
        )
    }

    #[tokio::test]
    async fn early_stop_after_one_hop() {
        let searcher = ChainSearcher::new(mock_llm(), Arc::new(MockEmbeddingClient::new(8)), store());
        let (hits, _tokens, meta) = searcher.retrieve_with_meta("What is deep learning?", 3).await.unwrap();

        assert_eq!(meta.intermediate_context.len(), 1);
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn iteration_bound_enforced_without_early_stop_signal() {
        let llm = Arc::new(
            MockLlmClient::new("default")
                .with_response("generate a new simple follow-up question", "follow up?")
                .with_response("generate an appropriate answer", "an answer")
                .with_response("judge whether you have enough information", "No")
                .with_response("select the ones that are support the Q-A pair", "[0]"),
        );
        let searcher = ChainSearcher::new(llm, Arc::new(MockEmbeddingClient::new(8)), store());
        let (_hits, _tokens, meta) = searcher.retrieve_with_meta("some question", 2).await.unwrap();

        assert_eq!(meta.intermediate_context.len(), 2);
    }

    #[tokio::test]
    async fn query_returns_final_summary_and_combined_tokens() {
        let searcher = ChainSearcher::new(mock_llm(), Arc::new(MockEmbeddingClient::new(8)), store());
        let (answer, _hits, tokens) = searcher.query("What is deep learning?", 3).await.unwrap();

        assert_eq!(answer, "Deep learning is an advanced subset of machine learning.");
        assert!(tokens > 0);
    }

    #[tokio::test]
    async fn unparseable_supporting_docs_reply_drops_supporting_set_but_keeps_hop() {
        let llm = Arc::new(
            MockLlmClient::new("default")
                .with_response("generate a new simple follow-up question", "What is the significance of deep learning?")
                .with_response("generate an appropriate answer", "Deep learning is a subset of machine learning.")
                .with_response("judge whether you have enough information", "Yes")
                .with_response("select the ones that are support the Q-A pair", "sorry, I can't determine that")
                .with_response("generate a final answer", "Deep learning is an advanced subset of machine learning."),
        );
        let searcher = ChainSearcher::new(llm, Arc::new(MockEmbeddingClient::new(8)), store());

        let (hits, _tokens, meta) = searcher.retrieve_with_meta("What is deep learning?", 3).await.unwrap();

        assert_eq!(meta.intermediate_context.len(), 1);
        assert!(hits.is_empty());
    }
}
