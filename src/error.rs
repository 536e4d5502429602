use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Source request failed: {0}")]
    TransientSource(String),

    #[error("Source responded with HTTP {status} for partition '{partition}'")]
    HttpStatus { partition: String, status: u16 },

    #[error("Malformed response for partition '{partition}': {reason}")]
    MalformedResponse { partition: String, reason: String },

    #[error("Extraction failed for partition '{partition}' after {attempts} attempt(s): {source}")]
    ExtractionExhausted {
        partition: String,
        attempts: u32,
        #[source]
        source: Box<EtlError>,
    },

    #[error("Transform error: {0}")]
    Transform(String),

    #[error("Schema error on table '{table}': {message}")]
    Schema { table: String, message: String },

    #[error("Write error on table '{table}': {message}")]
    Write { table: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Worker task failed: {0}")]
    Worker(String),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EtlError {
    pub fn malformed(partition: &str, reason: impl Into<String>) -> Self {
        EtlError::MalformedResponse {
            partition: partition.to_string(),
            reason: reason.into(),
        }
    }

    /// Network failures, timeouts and non-2xx statuses.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EtlError::TransientSource(_) | EtlError::HttpStatus { .. }
        )
    }

    /// The partition an error is scoped to, if any.
    pub fn partition(&self) -> Option<&str> {
        match self {
            EtlError::HttpStatus { partition, .. }
            | EtlError::MalformedResponse { partition, .. }
            | EtlError::ExtractionExhausted { partition, .. } => Some(partition),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
