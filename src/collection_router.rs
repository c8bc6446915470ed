use std::sync::Arc;

use anyhow::Result;
use tracing::warn;

use crate::llm::LlmClient;
use crate::models::ChatMessage;
use crate::reply::coerce_string_list;
use crate::vector_store::VectorStore;

const COLLECTION_ROUTE_PROMPT: &str = r#"I provide you with collection_name(s) and corresponding collection_description(s). Please select the collection names that may be related to the question and return a list of str. If there is no collection related to the question, you can return an empty list.

"QUESTION": {question}
"COLLECTION_INFO": {collection_info}

When you return, you can ONLY return a list of str, WITHOUT any other additional content. Your selected collection name list is:
"#;

/// Picks the subset of vector store collections relevant to a query.
pub struct CollectionRouter {
    llm: Arc<dyn LlmClient>,
    vector_store: Arc<dyn VectorStore>,
}

impl CollectionRouter {
    pub fn new(llm: Arc<dyn LlmClient>, vector_store: Arc<dyn VectorStore>) -> Self {
        Self { llm, vector_store }
    }

    /// Returns the full unfiltered collection list, used when collection
    /// routing is disabled.
    pub async fn all_collections(&self, dim: usize) -> Result<Vec<String>> {
        Ok(self
            .vector_store
            .list_collections(Some(dim))
            .await?
            .into_iter()
            .map(|c| c.collection_name)
            .collect())
    }

    /// Selects the collections relevant to `query`. Returns `(names, tokens)`.
    pub async fn route(&self, query: &str, dim: usize) -> Result<(Vec<String>, usize)> {
        let collection_infos = self.vector_store.list_collections(Some(dim)).await?;

        if collection_infos.is_empty() {
            warn!("No collections found in the vector store");
            return Ok((vec![], 0));
        }

        if collection_infos.len() == 1 {
            return Ok((vec![collection_infos[0].collection_name.clone()], 0));
        }

        let collection_info_json: Vec<_> = collection_infos
            .iter()
            .map(|c| {
                serde_json::json!({
                    "collection_name": c.collection_name,
                    "collection_description": c.description,
                })
            })
            .collect();

        let prompt = COLLECTION_ROUTE_PROMPT
            .replace("{question}", query)
            .replace("{collection_info}", &serde_json::to_string(&collection_info_json)?);

        let chat_response = self.llm.chat(&[ChatMessage::user(prompt)]).await?;
        let mut selected = coerce_string_list(&chat_response.content)?;

        for info in &collection_infos {
            if info.description.is_empty() {
                selected.push(info.collection_name.clone());
            }
            if self.vector_store.default_collection() == info.collection_name {
                selected.push(info.collection_name.clone());
            }
        }

        selected.sort();
        selected.dedup();

        Ok((selected, chat_response.total_tokens))
    }
}
