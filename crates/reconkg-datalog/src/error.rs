use thiserror::Error;

/// Errors surfaced by the Datalog parser, evaluator, and rule store
/// (spec §7).
#[derive(Debug, Error)]
pub enum DatalogError {
    #[error("parse error at byte offset {offset}: {message}")]
    Parse { message: String, offset: usize },

    #[error("resource limit exceeded: {0}")]
    Resource(String),

    #[error("rule name already exists: {0}")]
    DuplicateName(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error(transparent)]
    Graph(#[from] reconkg_graph::GraphError),
}

pub type Result<T> = std::result::Result<T, DatalogError>;
