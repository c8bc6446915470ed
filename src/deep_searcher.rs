use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::agent_router::Searcher;
use crate::collection_router::CollectionRouter;
use crate::embedding::EmbeddingClient;
use crate::llm::LlmClient;
use crate::models::{dedupe, ChatMessage, RetrievalResult};
use crate::reply::{coerce_string_list, judge_accepts};
use crate::vector_store::VectorStore;

const SUB_QUERY_PROMPT: &str = r#"To answer this question more comprehensively, please break down the original question into up to four sub-questions. Return as a list of str.
If this is a very simple question and no decomposition is necessary, then keep the only one original question in the list.

Original Question: {original_query}

Provide your response as a list of str:"#;

const RERANK_PROMPT: &str = r#"Based on the query questions and the retrieved chunk, to determine whether the chunk is helpful in answering any of the query question, you can only return "YES" or "NO", without any other information.

Query Questions: {query}
Retrieved Chunk: {retrieved_chunk}

Is the chunk helpful in answering any of the questions?"#;

const REFLECT_PROMPT: &str = r#"Determine whether additional search queries are needed based on the original query, previous sub queries, and all retrieved document chunks. If further research is required, provide a list of up to 3 search queries. If no further research is required, return an empty list.

If the original query is to write a report, then you prefer to generate some further queries, instead of returning an empty list.

Original Query: {question}

Previous Sub Queries: {mini_questions}

Related Chunks:
{mini_chunk_str}

Respond exclusively in a valid list of str format without any other text."#;

const SUMMARY_PROMPT: &str = r#"You are an AI content analysis expert, good at summarizing content. Please summarize a specific and detailed answer or report based on the previous queries and the retrieved document chunks.

Original Query: {question}

Previous Sub Queries: {mini_questions}

Related Chunks:
{mini_chunk_str}
"#;

/// Per-collection search depth. Not scaled by the number of routed
/// collections; kept as a tunable constant per the reference system.
const TOP_K: usize = 10;

/// Upper bound on concurrently in-flight sub-query tasks, each of which holds
/// a chain of outbound LLM calls (rerank per hit). Bounds provider load
/// independent of how many sub-queries a round fans out to.
const MAX_CONCURRENT_LLM_CALLS: usize = 4;

/// Parallel multi-query searcher: decomposes a question into sub-queries, fans
/// retrieval out across them, judges each hit with the LLM, and reflects on
/// gaps for up to `max_iter` iterations.
pub struct DeepSearcher {
    llm: Arc<dyn LlmClient>,
    embedding: Arc<dyn EmbeddingClient>,
    vector_store: Arc<dyn VectorStore>,
    route_collection: bool,
    text_window_splitter: bool,
    llm_concurrency: Arc<Semaphore>,
}

/// Book-keeping returned alongside `retrieve`'s hits.
pub struct DeepSearchMeta {
    pub all_sub_queries: Vec<String>,
}

impl DeepSearcher {
    pub fn new(llm: Arc<dyn LlmClient>, embedding: Arc<dyn EmbeddingClient>, vector_store: Arc<dyn VectorStore>) -> Self {
        Self {
            llm,
            embedding,
            vector_store,
            route_collection: true,
            text_window_splitter: true,
            llm_concurrency: Arc::new(Semaphore::new(MAX_CONCURRENT_LLM_CALLS)),
        }
    }

    fn collection_router(&self) -> CollectionRouter {
        CollectionRouter::new(self.llm.clone(), self.vector_store.clone())
    }

    async fn generate_sub_queries(&self, original_query: &str) -> Result<(Vec<String>, usize)> {
        let prompt = SUB_QUERY_PROMPT.replace("{original_query}", original_query);
        let response = self.llm.chat(&[ChatMessage::user(prompt)]).await?;
        let sub_queries = match coerce_string_list(&response.content) {
            Ok(queries) => queries,
            Err(err) => {
                warn!("could not parse sub queries from '{}': {}", response.content, err);
                vec![]
            }
        };
        Ok((sub_queries, response.total_tokens))
    }

    async fn search_chunks_from_vectordb(
        &self,
        query: &str,
        sub_queries: &[String],
    ) -> Result<(Vec<RetrievalResult>, usize)> {
        let mut consumed_tokens = 0;

        let selected_collections = if self.route_collection {
            let (names, tokens) = self.collection_router().route(query, self.embedding.dimension()).await?;
            consumed_tokens += tokens;
            names
        } else {
            self.collection_router().all_collections(self.embedding.dimension()).await?
        };

        let mut accepted = Vec::new();
        let query_vector = self.embedding.embed_query(query).await?;

        let all_queries: Vec<String> = std::iter::once(query.to_string()).chain(sub_queries.iter().cloned()).collect();

        for collection in selected_collections {
            debug!("searching '{}' in collection '{}'", query, collection);
            let retrieved = self.vector_store.search(&collection, &query_vector, TOP_K).await?;
            if retrieved.is_empty() {
                debug!("no relevant chunks found in '{}'", collection);
                continue;
            }

            for hit in retrieved {
                let prompt = RERANK_PROMPT
                    .replace("{query}", &format!("{:?}", all_queries))
                    .replace("{retrieved_chunk}", &format!("<chunk>{}</chunk>", hit.text));

                let response = match self.llm.chat(&[ChatMessage::user(prompt)]).await {
                    Ok(response) => response,
                    Err(err) => {
                        warn!("judge call failed for a hit in '{}', dropping it: {}", collection, err);
                        continue;
                    }
                };
                consumed_tokens += response.total_tokens;

                if judge_accepts(&response.content) {
                    accepted.push(hit);
                }
            }
        }

        Ok((accepted, consumed_tokens))
    }

    async fn generate_gap_queries(
        &self,
        original_query: &str,
        all_sub_queries: &[String],
        all_chunks: &[RetrievalResult],
    ) -> Result<(Vec<String>, usize)> {
        let chunk_str = if all_chunks.is_empty() {
            "NO RELATED CHUNKS FOUND.".to_string()
        } else {
            format_chunk_texts(&all_chunks.iter().map(|c| c.text.clone()).collect::<Vec<_>>())
        };

        let prompt = REFLECT_PROMPT
            .replace("{question}", original_query)
            .replace("{mini_questions}", &format!("{:?}", all_sub_queries))
            .replace("{mini_chunk_str}", &chunk_str);

        let response = self.llm.chat(&[ChatMessage::user(prompt)]).await?;
        Ok((coerce_string_list(&response.content)?, response.total_tokens))
    }

    pub async fn retrieve_with_meta(
        &self,
        original_query: &str,
        max_iter: usize,
    ) -> Result<(Vec<RetrievalResult>, usize, DeepSearchMeta)> {
        info!("deep search: {}", original_query);

        let mut all_search_res: Vec<RetrievalResult> = Vec::new();
        let mut all_sub_queries = Vec::new();
        let mut total_tokens = 0;

        let (sub_queries, used_tokens) = self.generate_sub_queries(original_query).await?;
        total_tokens += used_tokens;

        if sub_queries.is_empty() {
            info!("no sub queries generated, exiting");
            return Ok((vec![], total_tokens, DeepSearchMeta { all_sub_queries: vec![] }));
        }

        all_sub_queries.extend(sub_queries.clone());
        let mut sub_gap_queries = sub_queries;

        for iter in 0..max_iter {
            debug!("deep search iteration {}", iter + 1);

            let tasks: Vec<_> = sub_gap_queries
                .iter()
                .map(|q| {
                    let query = q.clone();
                    let gap_queries = sub_gap_queries.clone();
                    let permit = self.llm_concurrency.clone();
                    async move {
                        let _permit = permit.acquire_owned().await.expect("semaphore is never closed");
                        self.search_chunks_from_vectordb(&query, &gap_queries).await
                    }
                })
                .collect();

            let results = join_all(tasks).await;

            let mut iteration_hits = Vec::new();
            for result in results {
                let (hits, consumed) = result?;
                total_tokens += consumed;
                iteration_hits.extend(hits);
            }

            all_search_res.extend(dedupe(iteration_hits));

            if iter == max_iter - 1 {
                debug!("exceeded maximum iterations, exiting");
                break;
            }

            let (gap_queries, consumed) = self.generate_gap_queries(original_query, &all_sub_queries, &all_search_res).await?;
            total_tokens += consumed;

            if gap_queries.is_empty() {
                debug!("no new gap queries generated, exiting");
                break;
            }

            all_sub_queries.extend(gap_queries.clone());
            sub_gap_queries = gap_queries;
        }

        let all_search_res = dedupe(all_search_res);
        Ok((all_search_res, total_tokens, DeepSearchMeta { all_sub_queries }))
    }
}

fn format_chunk_texts(chunk_texts: &[String]) -> String {
    chunk_texts
        .iter()
        .enumerate()
        .map(|(i, chunk)| format!("<chunk_{i}>\n{chunk}\n</chunk_{i}>\n"))
        .collect::<Vec<_>>()
        .join("")
}

#[async_trait]
impl Searcher for DeepSearcher {
    fn description(&self) -> &str {
        "This agent is suitable for handling general and simple queries, such as given a topic and then writing a report, survey, or article."
    }

    async fn retrieve(&self, query: &str, max_iter: usize) -> Result<(Vec<RetrievalResult>, usize)> {
        let (hits, tokens, _) = self.retrieve_with_meta(query, max_iter).await?;
        Ok((hits, tokens))
    }

    async fn query(&self, query: &str, max_iter: usize) -> Result<(String, Vec<RetrievalResult>, usize)> {
        let (hits, n_token_retrieval, meta) = self.retrieve_with_meta(query, max_iter).await?;

        if hits.is_empty() {
            return Ok((format!("No relevant information found for query '{query}'."), vec![], n_token_retrieval));
        }

        let chunk_texts: Vec<String> = hits.iter().map(|c| c.display_text(self.text_window_splitter)).collect();

        let summary_prompt = SUMMARY_PROMPT
            .replace("{question}", query)
            .replace("{mini_questions}", &format!("{:?}", meta.all_sub_queries))
            .replace("{mini_chunk_str}", &format_chunk_texts(&chunk_texts));

        let response = self.llm.chat(&[ChatMessage::user(summary_prompt)]).await?;

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

    #[tokio::test]
    async fn single_iteration_with_no_reflection_gathers_accepted_hits() {
        let llm = Arc::new(
            MockLlmClient::new("YES")
                .with_response("break down the original question", r#"["q1", "q2"]"#)
                .with_response("Is the chunk helpful", "YES")
                .with_response("Determine whether additional search queries", "[]"),
        );
        let embedding = Arc::new(MockEmbeddingClient::new(8));
        let searcher = DeepSearcher::new(llm, embedding, store());

        let (hits, tokens, meta) = searcher.retrieve_with_meta("Explain deep learning", 2).await.unwrap();

        assert!(!hits.is_empty());
        assert!(tokens > 0);
        assert_eq!(meta.all_sub_queries, vec!["q1", "q2"]);
    }

    #[tokio::test]
    async fn no_sub_queries_returns_empty_result() {
        let llm = Arc::new(MockLlmClient::new("[]"));
        let embedding = Arc::new(MockEmbeddingClient::new(8));
        let searcher = DeepSearcher::new(llm, embedding, store());

        let (hits, _tokens, meta) = searcher.retrieve_with_meta("trivial", 3).await.unwrap();
        assert!(hits.is_empty());
        assert!(meta.all_sub_queries.is_empty());
    }

    #[tokio::test]
    async fn judge_rejection_excludes_hit_from_final_results() {
        let llm = Arc::new(
            MockLlmClient::new("YES")
                .with_response("break down the original question", r#"["q1"]"#)
                .with_response("Is the chunk helpful", "<think>weighing…</think> NO")
                .with_response("Determine whether additional search queries", "[]"),
        );
        let embedding = Arc::new(MockEmbeddingClient::new(8));
        let searcher = DeepSearcher::new(llm, embedding, store());

        let (hits, _tokens, _meta) = searcher.retrieve_with_meta("some question", 1).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn iteration_bound_is_enforced_even_with_gap_queries() {
        let llm = Arc::new(
            MockLlmClient::new("YES")
                .with_response("break down the original question", r#"["q1"]"#)
                .with_response("Is the chunk helpful", "YES")
                .with_response("Determine whether additional search queries", r#"["q2"]"#),
        );
        let embedding = Arc::new(MockEmbeddingClient::new(8));
        let searcher = DeepSearcher::new(llm, embedding, store());

        let (_hits, _tokens, meta) = searcher.retrieve_with_meta("some question", 2).await.unwrap();
        // Even though reflection keeps proposing gap queries, max_iter=2 bounds the loop:
        // one initial sub-query plus one reflection-round gap query.
        assert_eq!(meta.all_sub_queries, vec!["q1", "q2"]);
    }

    #[tokio::test]
    async fn sub_query_parse_failure_aborts_with_empty_result_and_accumulated_tokens() {
        let llm = Arc::new(MockLlmClient::new("sure, here is your answer, no list included"));
        let embedding = Arc::new(MockEmbeddingClient::new(8));
        let searcher = DeepSearcher::new(llm, embedding, store());

        let (hits, tokens, meta) = searcher.retrieve_with_meta("some question", 2).await.unwrap();

        assert!(hits.is_empty());
        assert!(meta.all_sub_queries.is_empty());
        assert_eq!(tokens, 10);
    }

    /// An `LlmClient` whose judge-prompt replies fail once and then succeed,
    /// used to confirm a single failed judge call doesn't abort the rest of
    /// the retrieval task.
    struct FlakyJudgeLlmClient {
        remaining_failures: std::sync::Mutex<usize>,
    }

    #[async_trait]
    impl LlmClient for FlakyJudgeLlmClient {
        async fn chat(&self, messages: &[ChatMessage]) -> Result<crate::models::ChatResponse> {
            let prompt = &messages[0].content;
            if prompt.contains("break down the original question") {
                return Ok(crate::models::ChatResponse { content: r#"["q1"]"#.to_string(), total_tokens: 5 });
            }
            if prompt.contains("Is the chunk helpful") {
                let mut remaining = self.remaining_failures.lock().unwrap();
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(anyhow::anyhow!("transient judge failure"));
                }
                return Ok(crate::models::ChatResponse { content: "YES".to_string(), total_tokens: 5 });
            }
            Ok(crate::models::ChatResponse { content: "[]".to_string(), total_tokens: 5 })
        }
    }

    #[tokio::test]
    async fn failed_judge_call_drops_hit_but_other_hits_still_accepted() {
        let llm = Arc::new(FlakyJudgeLlmClient { remaining_failures: std::sync::Mutex::new(1) });
        let embedding = Arc::new(MockEmbeddingClient::new(8));
        let searcher = DeepSearcher::new(llm, embedding, store());

        let (hits, _tokens, _meta) = searcher.retrieve_with_meta("some question", 1).await.unwrap();

        // MockVectorStore returns 3 hits for the collection; the first judge
        // call fails and its hit is dropped, but the remaining two are still
        // judged and accepted.
        assert_eq!(hits.len(), 2);
    }
}
