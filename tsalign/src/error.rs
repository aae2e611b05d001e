//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("External computation failed for {item_id}: {message}")]
    ExternalComputation { item_id: String, message: String },

    #[error("Alignment artifact missing or empty for {item_id}: {path}")]
    ArtifactMissing { item_id: String, path: String },

    #[error(
        "Alignment artifact for {item_id} does not match its enabled images: \
         {enabled} enabled, {transforms} transforms, {angles} angles"
    )]
    ArtifactMismatch {
        item_id: String,
        enabled: usize,
        transforms: usize,
        angles: usize,
    },

    #[error(
        "Input stream is closed but scheduling can never complete \
         (missing: {missing:?}, unexpected: {unexpected:?})"
    )]
    StalledStream {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    #[error("Output collection {0} is already closed")]
    CollectionClosed(String),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Step graph error: {0}")]
    Graph(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Codec error: {0}")]
    Codec(#[from] tilt_codec::CodecError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn external(item_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalComputation {
            item_id: item_id.into(),
            message: message.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}
