use thiserror::Error;

/// Errors surfaced at the crate's public boundaries. Internal glue code threads
/// `anyhow::Error` and relies on the `From` impls below to land here when it matters.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("vector store error: {message}")]
    VectorStore { message: String },

    #[error("llm reply could not be coerced into a literal: {0}")]
    Coercion(#[from] CoercionError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("misconfiguration: {message}")]
    Configuration { message: String },

    #[error("agent router could not select an agent: {message}")]
    Routing { message: String },
}

/// Errors from [`crate::reply::coerce_literal`] and friends.
#[derive(Error, Debug)]
pub enum CoercionError {
    #[error("no list/dict literal found in response")]
    NotFound,

    #[error("ambiguous response: found {0} candidate literals, expected exactly one")]
    Ambiguous(usize),

    #[error("invalid literal syntax: {0}")]
    InvalidSyntax(String),
}
