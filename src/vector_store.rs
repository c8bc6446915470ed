use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use crate::models::{Chunk, CollectionInfo, RetrievalResult};

/// A vector database collaborator. Implementations must be safe for
/// concurrent use, same as [`crate::llm::LlmClient`].
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn list_collections(&self, dim: Option<usize>) -> Result<Vec<CollectionInfo>>;

    async fn search(&self, collection: &str, vector: &[f32], top_k: usize) -> Result<Vec<RetrievalResult>>;

    async fn insert(&self, collection: &str, chunks: &[Chunk]) -> Result<()>;

    async fn init_collection(
        &self,
        dim: usize,
        collection: &str,
        description: &str,
        force_new: bool,
    ) -> Result<()>;

    async fn clear(&self, collection: &str) -> Result<()>;

    /// The collection name that is always unioned into collection routing results.
    fn default_collection(&self) -> &str;
}

/// PostgreSQL + pgvector backed store, searching by cosine distance.
pub struct PostgresVectorStore {
    pool: sqlx::PgPool,
    default_collection: String,
}

impl PostgresVectorStore {
    pub async fn new(database_url: &str, default_collection: impl Into<String>) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        Ok(Self { pool, default_collection: default_collection.into() })
    }

    fn embedding_literal(vector: &[f32]) -> String {
        format!("[{}]", vector.iter().map(|f| f.to_string()).collect::<Vec<_>>().join(","))
    }
}

#[async_trait]
impl VectorStore for PostgresVectorStore {
    async fn list_collections(&self, _dim: Option<usize>) -> Result<Vec<CollectionInfo>> {
        let rows = sqlx::query_as::<_, (String, Option<String>)>(
            "SELECT collection_name, description FROM vector_collections",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(collection_name, description)| CollectionInfo {
                collection_name,
                description: description.unwrap_or_default(),
            })
            .collect())
    }

    async fn search(&self, collection: &str, vector: &[f32], top_k: usize) -> Result<Vec<RetrievalResult>> {
        let embedding_str = Self::embedding_literal(vector);

        let sql = r#"
            SELECT
                text,
                reference,
                metadata,
                1 - (embedding <=> $1::vector) as similarity
            FROM chunks
            WHERE collection = $2
            ORDER BY embedding <=> $1::vector
            LIMIT $3
        "#;

        let rows = sqlx::query(sql)
            .bind(&embedding_str)
            .bind(collection)
            .bind(top_k as i64)
            .fetch_all(&self.pool)
            .await?;

        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            use sqlx::Row;
            let text: String = row.try_get("text")?;
            let reference: String = row.try_get("reference")?;
            let metadata: serde_json::Value = row.try_get("metadata").unwrap_or_else(|_| json!({}));
            let similarity: f32 = row.try_get("similarity")?;

            results.push(RetrievalResult {
                embedding: None,
                text,
                reference,
                metadata,
                score: similarity,
            });
        }

        Ok(results)
    }

    async fn insert(&self, collection: &str, chunks: &[Chunk]) -> Result<()> {
        for chunk in chunks {
            let embedding_str = chunk
                .embedding
                .as_ref()
                .map(|e| Self::embedding_literal(e))
                .ok_or_else(|| anyhow!("chunk missing embedding"))?;

            sqlx::query(
                "INSERT INTO chunks (collection, text, reference, metadata, embedding) \
                 VALUES ($1, $2, $3, $4, $5::vector)",
            )
            .bind(collection)
            .bind(&chunk.text)
            .bind(&chunk.reference)
            .bind(&chunk.metadata)
            .bind(&embedding_str)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn init_collection(
        &self,
        _dim: usize,
        collection: &str,
        description: &str,
        force_new: bool,
    ) -> Result<()> {
        if force_new {
            sqlx::query("DELETE FROM chunks WHERE collection = $1")
                .bind(collection)
                .execute(&self.pool)
                .await?;
        }
        sqlx::query(
            "INSERT INTO vector_collections (collection_name, description) VALUES ($1, $2) \
             ON CONFLICT (collection_name) DO UPDATE SET description = EXCLUDED.description",
        )
        .bind(collection)
        .bind(description)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear(&self, collection: &str) -> Result<()> {
        sqlx::query("DELETE FROM chunks WHERE collection = $1")
            .bind(collection)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn default_collection(&self) -> &str {
        &self.default_collection
    }
}

/// Weaviate-backed store, talking GraphQL over HTTP.
pub struct WeaviateVectorStore {
    client: reqwest::Client,
    weaviate_url: String,
    default_collection: String,
}

impl WeaviateVectorStore {
    pub fn new(weaviate_url: impl Into<String>, default_collection: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            weaviate_url: weaviate_url.into(),
            default_collection: default_collection.into(),
        }
    }
}

#[async_trait]
impl VectorStore for WeaviateVectorStore {
    async fn list_collections(&self, _dim: Option<usize>) -> Result<Vec<CollectionInfo>> {
        let response = self
            .client
            .get(format!("{}/v1/schema", self.weaviate_url))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("Weaviate schema query failed: {}", response.status()));
        }

        let schema: serde_json::Value = response.json().await?;
        let classes = schema["classes"].as_array().cloned().unwrap_or_default();

        Ok(classes
            .into_iter()
            .map(|class| CollectionInfo {
                collection_name: class["class"].as_str().unwrap_or("").to_string(),
                description: class["description"].as_str().unwrap_or("").to_string(),
            })
            .collect())
    }

    async fn search(&self, collection: &str, vector: &[f32], top_k: usize) -> Result<Vec<RetrievalResult>> {
        let graphql_query = format!(
            r#"{{
                Get {{
                    {collection} (
                        nearVector: {{ vector: {vector:?} }}
                        limit: {top_k}
                    ) {{
                        text
                        reference
                        _additional {{ certainty distance }}
                    }}
                }}
            }}"#,
        );

        let response = self
            .client
            .post(format!("{}/v1/graphql", self.weaviate_url))
            .json(&json!({ "query": graphql_query }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("Weaviate query failed: {}", response.status()));
        }

        let result: serde_json::Value = response.json().await?;
        let objects = result["data"]["Get"][collection]
            .as_array()
            .ok_or_else(|| anyhow!("invalid Weaviate response format"))?;

        Ok(objects
            .iter()
            .map(|obj| {
                let certainty = obj["_additional"]["certainty"].as_f64().unwrap_or(0.0) as f32;
                RetrievalResult {
                    embedding: None,
                    text: obj["text"].as_str().unwrap_or("").to_string(),
                    reference: obj["reference"].as_str().unwrap_or("").to_string(),
                    metadata: json!({}),
                    score: certainty,
                }
            })
            .collect())
    }

    async fn insert(&self, collection: &str, chunks: &[Chunk]) -> Result<()> {
        let objects: Vec<serde_json::Value> = chunks
            .iter()
            .map(|chunk| {
                json!({
                    "class": collection,
                    "properties": {
                        "text": chunk.text,
                        "reference": chunk.reference,
                    },
                    "vector": chunk.embedding,
                })
            })
            .collect();

        let response = self
            .client
            .post(format!("{}/v1/batch/objects", self.weaviate_url))
            .json(&json!({ "objects": objects }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("failed to insert chunks into Weaviate"));
        }
        Ok(())
    }

    async fn init_collection(
        &self,
        _dim: usize,
        collection: &str,
        description: &str,
        force_new: bool,
    ) -> Result<()> {
        if force_new {
            let _ = self.clear(collection).await;
        }
        let response = self
            .client
            .post(format!("{}/v1/schema", self.weaviate_url))
            .json(&json!({ "class": collection, "description": description }))
            .send()
            .await?;

        if !response.status().is_success() {
            warn!("Weaviate class creation for '{}' returned {}", collection, response.status());
        }
        Ok(())
    }

    async fn clear(&self, collection: &str) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}/v1/schema/{}", self.weaviate_url, collection))
            .send()
            .await?;

        if !response.status().is_success() {
            warn!("failed to clear Weaviate collection '{}': {}", collection, response.status());
        }
        Ok(())
    }

    fn default_collection(&self) -> &str {
        &self.default_collection
    }
}

/// In-memory mock store for tests, mirroring `MockVectorDB` from the
/// reference test suite: every collection returns up to 3 canned hits.
pub struct MockVectorStore {
    collections: Vec<CollectionInfo>,
    default_collection: String,
}

impl MockVectorStore {
    pub fn new(collections: Vec<CollectionInfo>, default_collection: impl Into<String>) -> Self {
        Self { collections, default_collection: default_collection.into() }
    }
}

#[async_trait]
impl VectorStore for MockVectorStore {
    async fn list_collections(&self, _dim: Option<usize>) -> Result<Vec<CollectionInfo>> {
        Ok(self.collections.clone())
    }

    async fn search(&self, collection: &str, vector: &[f32], top_k: usize) -> Result<Vec<RetrievalResult>> {
        Ok((0..top_k.min(3))
            .map(|i| RetrievalResult {
                embedding: Some(vector.to_vec()),
                text: format!("Test result {i} for collection {collection}"),
                reference: format!("test_reference_{collection}_{i}"),
                metadata: json!({"wider_text": format!("Wider context for test result {i} in {collection}")}),
                score: 1.0 - (i as f32 * 0.1),
            })
            .collect())
    }

    async fn insert(&self, _collection: &str, _chunks: &[Chunk]) -> Result<()> {
        Ok(())
    }

    async fn init_collection(&self, _dim: usize, _collection: &str, _description: &str, _force_new: bool) -> Result<()> {
        Ok(())
    }

    async fn clear(&self, _collection: &str) -> Result<()> {
        Ok(())
    }

    fn default_collection(&self) -> &str {
        &self.default_collection
    }
}
