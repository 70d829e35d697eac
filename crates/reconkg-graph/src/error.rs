use reconkg_types::ValidationError;
use thiserror::Error;

/// Errors surfaced by the storage substrate, migration runner, and
/// repository (spec §7). One enum per concern, matched by variant rather
/// than by crate-wide type, mirroring `sem_os_core::error::SemOsError`.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("natural key already exists: {0}")]
    DuplicateNaturalKey(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, GraphError>;
