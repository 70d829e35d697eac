use thiserror::Error;

/// Failures that can occur while validating or deriving a node's property
/// bag. Carried as a variant of the storage-layer error enums upstream;
/// kept standalone here so this crate stays free of any database types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required property `{0}`")]
    MissingField(String),

    #[error("property `{field}` must be one of {allowed:?}, got `{got}`")]
    InvalidEnum {
        field: String,
        allowed: Vec<String>,
        got: String,
    },

    #[error("property `{0}` must not be empty")]
    EmptyField(String),

    #[error("property `{field}` out of range: {detail}")]
    OutOfRange { field: String, detail: String },

    #[error("property `{field}` has the wrong type: {detail}")]
    WrongType { field: String, detail: String },

    #[error("natural key template for this kind requires a parent id")]
    MissingParentId,
}
