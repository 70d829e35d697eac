use thiserror::Error;

/// Errors surfaced by the normalizer (spec §7). The normalizer itself only
/// ever fails on validation — unresolvable external keys are a silent skip,
/// not an error (spec §4.4).
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error(transparent)]
    Graph(#[from] reconkg_graph::GraphError),
}

pub type Result<T> = std::result::Result<T, NormalizeError>;
