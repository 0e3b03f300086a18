//! Target store stub for `--dry-run`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{Document, FileUpload, Filter, Result, TargetStore};
use crate::models::Record;

/// Sentinel identifier returned for every simulated write.
pub const DRY_RUN_ID: &str = "dry-run";

/// Never writes. Reads are delegated to an optional inner store so existing
/// records are still detected; writes return [`DRY_RUN_ID`].
pub struct DryRunTargetStore {
    inner: Option<Arc<dyn TargetStore>>,
    simulated_writes: AtomicUsize,
}

impl DryRunTargetStore {
    pub fn new(inner: Option<Arc<dyn TargetStore>>) -> Self {
        Self {
            inner,
            simulated_writes: AtomicUsize::new(0),
        }
    }

    /// Writes that would have happened.
    pub fn simulated_writes(&self) -> usize {
        self.simulated_writes.load(Ordering::Relaxed)
    }

    fn simulate(&self, collection: &str, data: &Record) -> Document {
        self.simulated_writes.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("[dry-run] would write to {}", collection);
        let mut fields = data.clone();
        fields.insert("id".into(), Value::String(DRY_RUN_ID.to_string()));
        Document {
            id: DRY_RUN_ID.to_string(),
            fields,
        }
    }
}

#[async_trait]
impl TargetStore for DryRunTargetStore {
    fn describe(&self) -> String {
        match &self.inner {
            Some(inner) => format!("dry-run over {}", inner.describe()),
            None => "dry-run".to_string(),
        }
    }

    async fn init(&self) -> Result<()> {
        match &self.inner {
            Some(inner) => inner.init().await,
            None => Ok(()),
        }
    }

    async fn create(
        &self,
        collection: &str,
        data: &Record,
        _file: Option<FileUpload>,
    ) -> Result<Document> {
        Ok(self.simulate(collection, data))
    }

    async fn update(
        &self,
        collection: &str,
        _id: &str,
        data: &Record,
        _file: Option<FileUpload>,
    ) -> Result<Document> {
        Ok(self.simulate(collection, data))
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        limit: usize,
    ) -> Result<Vec<Document>> {
        match &self.inner {
            Some(inner) => inner.find(collection, filter, limit).await,
            None => Ok(Vec::new()),
        }
    }

    async fn find_by_id(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        if id == DRY_RUN_ID {
            return Ok(Some(Document {
                id: DRY_RUN_ID.to_string(),
                fields: Record::new(),
            }));
        }
        match &self.inner {
            Some(inner) => inner.find_by_id(collection, id).await,
            None => Ok(None),
        }
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        tracing::debug!("[dry-run] would delete {}/{}", collection, id);
        Ok(())
    }

    async fn delete_where(&self, collection: &str, filter: &Filter) -> Result<usize> {
        let matching = self.find(collection, filter, usize::MAX).await?.len();
        tracing::debug!("[dry-run] would delete {} from {}", matching, collection);
        Ok(matching)
    }
}
