use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("store error: {0}")]
    Store(#[from] Box<dyn std::error::Error + Send + Sync>),

    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("invalid pipeline: {0}")]
    InvalidPipeline(String),

    #[error("invalid pipeline stage: {0}")]
    InvalidPipelineStage(String),

    #[error("unsupported server version {version} (requires {required} or newer)")]
    UnsupportedServerVersion { version: String, required: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("document must be a JSON object")]
    NotAnObject,

    #[error("background call failed: {0}")]
    Background(String),
}

pub type Result<T> = std::result::Result<T, Error>;
