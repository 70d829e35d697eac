//! Error translation for the facade boundary (spec §7): every core error
//! enum collapses into a textual message and a boolean `isError`, with
//! `anyhow` as the catch-all carrier (SPEC_FULL §0.2, mirroring
//! `SemOsError::Internal(#[from] anyhow::Error)`).

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub is_error: bool,
    pub kind: String,
    pub message: String,
}

impl ErrorReport {
    fn of(kind: &str, message: impl Into<String>) -> Self {
        Self { is_error: true, kind: kind.to_string(), message: message.into() }
    }
}

/// Downcasts `err` against the known per-crate error enums to recover the
/// spec §7 error kind name; anything else is reported as `StorageError`,
/// since an unrecognised failure at this boundary is assumed to be an
/// underlying database fault.
pub fn describe(err: &anyhow::Error) -> ErrorReport {
    if let Some(e) = err.downcast_ref::<reconkg_graph::GraphError>() {
        return describe_graph(e);
    }
    if let Some(e) = err.downcast_ref::<reconkg_query::QueryError>() {
        return match e {
            reconkg_query::QueryError::BadRequest(m) => ErrorReport::of("BadRequest", m.clone()),
            reconkg_query::QueryError::NotFound(m) => ErrorReport::of("NotFound", m.clone()),
            reconkg_query::QueryError::Storage(_) => ErrorReport::of("StorageError", e.to_string()),
            reconkg_query::QueryError::Graph(g) => describe_graph(g),
        };
    }
    if let Some(e) = err.downcast_ref::<reconkg_normalize::NormalizeError>() {
        return match e {
            reconkg_normalize::NormalizeError::Graph(g) => describe_graph(g),
        };
    }
    if let Some(e) = err.downcast_ref::<reconkg_datalog::DatalogError>() {
        return describe_datalog(e);
    }
    ErrorReport::of("StorageError", err.to_string())
}

fn describe_graph(e: &reconkg_graph::GraphError) -> ErrorReport {
    match e {
        reconkg_graph::GraphError::Validation(v) => ErrorReport::of("ValidationError", v.to_string()),
        reconkg_graph::GraphError::DuplicateNaturalKey(k) => ErrorReport::of("DuplicateNaturalKey", k.clone()),
        reconkg_graph::GraphError::NotFound(m) => ErrorReport::of("NotFound", m.clone()),
        reconkg_graph::GraphError::BadRequest(m) => ErrorReport::of("BadRequest", m.clone()),
        reconkg_graph::GraphError::Migration(m) => ErrorReport::of("MigrationError", m.clone()),
        reconkg_graph::GraphError::Storage(_) => ErrorReport::of("StorageError", e.to_string()),
    }
}

fn describe_datalog(e: &reconkg_datalog::DatalogError) -> ErrorReport {
    match e {
        reconkg_datalog::DatalogError::Parse { .. } => ErrorReport::of("ParseError", e.to_string()),
        reconkg_datalog::DatalogError::Resource(_) => ErrorReport::of("ResourceError", e.to_string()),
        reconkg_datalog::DatalogError::DuplicateName(n) => ErrorReport::of("DuplicateName", n.clone()),
        reconkg_datalog::DatalogError::NotFound(m) => ErrorReport::of("NotFound", m.clone()),
        reconkg_datalog::DatalogError::Storage(_) => ErrorReport::of("StorageError", e.to_string()),
        reconkg_datalog::DatalogError::Graph(g) => describe_graph(g),
    }
}
