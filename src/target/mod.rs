//! Target document store abstraction.
//!
//! Mirrors the create/update/find/delete surface of a headless CMS. All
//! migrator writes go through [`TargetStore`], which lets dry runs swap in a
//! store that never writes.

mod dry_run;
mod http;
mod memory;

pub use dry_run::{DryRunTargetStore, DRY_RUN_ID};
pub use http::HttpTargetStore;
pub use memory::MemoryTargetStore;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::models::Record;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{method} {url} returned {status}: {body}")]
    Status {
        method: &'static str,
        url: String,
        status: u16,
        body: String,
    },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),
    #[error("Document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A stored document: its generated identifier plus its fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Record,
}

impl Document {
    /// Parse a document from a JSON object carrying an `id` field.
    pub fn from_json(value: Value) -> Result<Self> {
        let Value::Object(fields) = value else {
            return Err(StoreError::InvalidResponse(
                "document is not an object".to_string(),
            ));
        };
        let id = match fields.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                return Err(StoreError::InvalidResponse(
                    "document has no id".to_string(),
                ))
            }
        };
        Ok(Self { id, fields })
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    pub fn get_u64(&self, field: &str) -> Option<u64> {
        self.fields.get(field).and_then(Value::as_u64)
    }
}

/// Binary attachment for upload collections.
#[derive(Debug, Clone, PartialEq)]
pub struct FileUpload {
    pub filename: String,
    pub mime_type: String,
    pub content: Vec<u8>,
}

impl FileUpload {
    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }
}

/// Conjunction of `field equals value` conditions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub conditions: Vec<(String, Value)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for a single equality condition.
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self::new().and(field, value)
    }

    pub fn and(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.conditions.push((field.to_string(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Whether a document satisfies every condition.
    pub fn matches(&self, doc: &Document) -> bool {
        self.conditions.iter().all(|(field, expected)| {
            if field == "id" {
                return value_as_key(expected) == doc.id;
            }
            match doc.fields.get(field) {
                Some(actual) => values_equal(actual, expected),
                None => expected.is_null(),
            }
        })
    }
}

fn value_as_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Equality that treats `300` and `300.0` as the same number.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Document store the migration writes into.
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Short label for logs.
    fn describe(&self) -> String;

    /// Verify the store is reachable and credentials work.
    async fn init(&self) -> Result<()>;

    async fn create(
        &self,
        collection: &str,
        data: &Record,
        file: Option<FileUpload>,
    ) -> Result<Document>;

    async fn update(
        &self,
        collection: &str,
        id: &str,
        data: &Record,
        file: Option<FileUpload>,
    ) -> Result<Document>;

    async fn find(&self, collection: &str, filter: &Filter, limit: usize)
        -> Result<Vec<Document>>;

    async fn find_by_id(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    async fn delete(&self, collection: &str, id: &str) -> Result<()>;

    /// Delete every document matching the filter. Returns the number removed.
    async fn delete_where(&self, collection: &str, filter: &Filter) -> Result<usize>;

    /// First document matching the filter.
    async fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Document>> {
        Ok(self.find(collection, filter, 1).await?.into_iter().next())
    }
}
