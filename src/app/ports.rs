use crate::error::Result;
use crate::pipeline::load::TableSchema;
use crate::types::{Dataset, WriteMode};
use async_trait::async_trait;
use std::time::Duration;

// Extract-side ports
#[async_trait]
pub trait HttpClientPort: Send + Sync {
    /// Transport-level failures (connect, timeout, body read) come back as `Err`;
    /// any HTTP status, including non-2xx, is an `Ok` result.
    async fn get(&self, request: &SourceRequest, timeout: Duration) -> std::result::Result<HttpGetResult, String>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct SourceRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
}

impl SourceRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
        }
    }

    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Clone, Debug)]
pub struct HttpGetResult {
    pub status: u16,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl HttpGetResult {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

// Load-side port
#[async_trait]
pub trait SinkPort: Send + Sync {
    /// Create-if-absent. Never alters or clears an existing table.
    async fn ensure_table(&self, schema: &TableSchema) -> Result<()>;

    /// Ensure the table on a fresh connection, then write every row of `dataset`
    /// in one transaction. Returns the number of rows written.
    async fn load(&self, schema: &TableSchema, dataset: &Dataset, mode: WriteMode) -> Result<usize>;
}
