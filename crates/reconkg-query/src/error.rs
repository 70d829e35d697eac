use thiserror::Error;

/// Errors surfaced by the graph query engine (spec §7).
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error(transparent)]
    Graph(#[from] reconkg_graph::GraphError),
}

pub type Result<T> = std::result::Result<T, QueryError>;
