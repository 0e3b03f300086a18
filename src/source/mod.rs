//! Source store abstraction.
//!
//! Migrators read legacy rows exclusively through [`SourceStore`], so the
//! same pipeline can run against a relational dump (SQLite) or a headless-CMS
//! REST API.

mod api;
mod sqlite;

pub use api::ApiSource;
pub use sqlite::SqliteSource;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{ColumnInfo, ForeignKey, SourceRow, SqlValue};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Unexpected HTTP status {status} from {url}")]
    Status { status: u16, url: String },
    #[error("Unknown table: {0}")]
    UnknownTable(String),
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Connection error: {0}")]
    Connection(String),
}

pub type Result<T> = std::result::Result<T, SourceError>;

/// Ordering applied to a row query.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

/// A parameterized row query: equality filters, ordering and paging.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceQuery {
    pub filters: Vec<(String, SqlValue)>,
    pub order_by: Option<OrderBy>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl SourceQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality condition.
    pub fn filter(mut self, column: &str, value: SqlValue) -> Self {
        self.filters.push((column.to_string(), value));
        self
    }

    pub fn order_by(mut self, column: &str) -> Self {
        self.order_by = Some(OrderBy {
            column: column.to_string(),
            descending: false,
        });
        self
    }

    /// Offset-limited page, as used by batch iteration.
    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }
}

/// Read-only access to the legacy data.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Short label for logs.
    fn describe(&self) -> String;

    /// Verify connectivity. Failure here is fatal for the run.
    async fn connect(&self) -> Result<()>;

    /// Release resources. Called once at the end of a run.
    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    /// All user tables, from the catalog.
    async fn list_tables(&self) -> Result<Vec<String>>;

    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.list_tables().await?.iter().any(|t| t == table))
    }

    async fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>>;

    async fn primary_key(&self, table: &str) -> Result<Vec<String>>;

    async fn foreign_keys(&self, table: &str) -> Result<Vec<ForeignKey>>;

    async fn count(&self, table: &str, query: &SourceQuery) -> Result<usize>;

    async fn fetch(&self, table: &str, query: &SourceQuery) -> Result<Vec<SourceRow>>;
}

/// Reject identifiers that cannot be safely interpolated into SQL or URLs.
pub(crate) fn check_identifier(name: &str) -> Result<&str> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(name)
    } else {
        Err(SourceError::InvalidIdentifier(name.to_string()))
    }
}
