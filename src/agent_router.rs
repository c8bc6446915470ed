use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::error::OrchestratorError;
use crate::llm::LlmClient;
use crate::models::{ChatMessage, RetrievalResult};
use crate::reply::find_last_digit;

const ROUTE_PROMPT: &str = r#"Given a list of agent indexes and corresponding descriptions, each agent has a corresponding function, select the most likely agent(s) based on the description of the function. The question is: {query}. The agent descriptions are: {description_str}. Please only return one agent index number that best matches the question, in this format: "agent index: 1". If there is no relevant agent, Please return the number agent index: 0."#;

/// A retrieval strategy the orchestrator can dispatch a query to.
#[async_trait]
pub trait Searcher: Send + Sync {
    /// Human-readable summary of when this agent is the right fit, used to
    /// build the routing prompt.
    fn description(&self) -> &str;

    async fn retrieve(&self, query: &str, max_iter: usize) -> Result<(Vec<RetrievalResult>, usize)>;

    async fn query(&self, query: &str, max_iter: usize) -> Result<(String, Vec<RetrievalResult>, usize)>;
}

/// Chooses which registered [`Searcher`] should answer a given query.
pub struct AgentRouter {
    llm: Arc<dyn LlmClient>,
    agents: Vec<Arc<dyn Searcher>>,
}

impl AgentRouter {
    pub fn new(llm: Arc<dyn LlmClient>, agents: Vec<Arc<dyn Searcher>>) -> Self {
        Self { llm, agents }
    }

    fn describe_agents(&self) -> String {
        self.agents
            .iter()
            .enumerate()
            .map(|(i, agent)| format!("[{}]: {}", i + 1, agent.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Selects an agent for `query`. Returns `(agent, tokens)`.
    pub async fn route(&self, query: &str) -> Result<(Arc<dyn Searcher>, usize)> {
        if self.agents.is_empty() {
            return Err(OrchestratorError::Configuration { message: "no agents registered with the router".to_string() }.into());
        }
        if self.agents.len() == 1 {
            return Ok((self.agents[0].clone(), 0));
        }

        let prompt = ROUTE_PROMPT.replace("{query}", query).replace("{description_str}", &self.describe_agents());

        let response = self.llm.chat(&[ChatMessage::user(prompt)]).await?;

        let selected_index = response
            .content
            .trim()
            .rsplit(':')
            .next()
            .and_then(|tail| tail.trim().parse::<i64>().ok())
            .or_else(|| find_last_digit(&response.content).map(|d| d as i64));

        let index = match selected_index {
            Some(i) if i >= 1 && (i as usize) <= self.agents.len() => i as usize - 1,
            _ => {
                info!("agent router could not resolve a valid index from '{}', defaulting to agent 1", response.content);
                0
            }
        };

        Ok((self.agents[index].clone(), response.total_tokens))
    }

    pub async fn retrieve(&self, query: &str, max_iter: usize) -> Result<(Vec<RetrievalResult>, usize)> {
        let (agent, routing_tokens) = self.route(query).await?;
        let (results, retrieval_tokens) = agent.retrieve(query, max_iter).await?;
        Ok((results, routing_tokens + retrieval_tokens))
    }

    pub async fn query(&self, query: &str, max_iter: usize) -> Result<(String, Vec<RetrievalResult>, usize)> {
        let (agent, routing_tokens) = self.route(query).await?;
        let (answer, results, query_tokens) = agent.query(query, max_iter).await?;
        Ok((answer, results, routing_tokens + query_tokens))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use serde_json::json;

    struct StubSearcher {
        description: &'static str,
        answer: &'static str,
    }

    #[async_trait]
    impl Searcher for StubSearcher {
        fn description(&self) -> &str {
            self.description
        }

        async fn retrieve(&self, _query: &str, _max_iter: usize) -> Result<(Vec<RetrievalResult>, usize)> {
            Ok((
                vec![RetrievalResult {
                    embedding: None,
                    text: self.answer.to_string(),
                    reference: "stub".to_string(),
                    metadata: json!({}),
                    score: 1.0,
                }],
                0,
            ))
        }

        async fn query(&self, _query: &str, _max_iter: usize) -> Result<(String, Vec<RetrievalResult>, usize)> {
            Ok((self.answer.to_string(), vec![], 0))
        }
    }

    #[tokio::test]
    async fn single_agent_routes_for_zero_tokens() {
        let llm = Arc::new(MockLlmClient::new("should not be called"));
        let agents: Vec<Arc<dyn Searcher>> = vec![Arc::new(StubSearcher { description: "only agent", answer: "a" })];
        let router = AgentRouter::new(llm, agents);

        let (agent, tokens) = router.route("anything").await.unwrap();
        assert_eq!(agent.description(), "only agent");
        assert_eq!(tokens, 0);
    }

    #[tokio::test]
    async fn numeric_reply_selects_matching_agent() {
        let llm = Arc::new(MockLlmClient::new("agent index: 2"));
        let agents: Vec<Arc<dyn Searcher>> = vec![
            Arc::new(StubSearcher { description: "deep search", answer: "deep" }),
            Arc::new(StubSearcher { description: "chain search", answer: "chain" }),
        ];
        let router = AgentRouter::new(llm, agents);

        let (agent, _tokens) = router.route("a multi-hop question").await.unwrap();
        assert_eq!(agent.description(), "chain search");
    }

    #[tokio::test]
    async fn non_numeric_reply_falls_back_to_last_digit_then_first_agent() {
        let llm = Arc::new(MockLlmClient::new("I believe agent number 2 fits best."));
        let agents: Vec<Arc<dyn Searcher>> = vec![
            Arc::new(StubSearcher { description: "deep search", answer: "deep" }),
            Arc::new(StubSearcher { description: "chain search", answer: "chain" }),
        ];
        let router = AgentRouter::new(llm, agents);

        let (agent, _tokens) = router.route("a question").await.unwrap();
        assert_eq!(agent.description(), "chain search");
    }

    #[tokio::test]
    async fn unparseable_reply_defaults_to_first_agent() {
        let llm = Arc::new(MockLlmClient::new("no numbers here at all"));
        let agents: Vec<Arc<dyn Searcher>> = vec![
            Arc::new(StubSearcher { description: "deep search", answer: "deep" }),
            Arc::new(StubSearcher { description: "chain search", answer: "chain" }),
        ];
        let router = AgentRouter::new(llm, agents);

        let (agent, _tokens) = router.route("a question").await.unwrap();
        assert_eq!(agent.description(), "deep search");
    }
}
