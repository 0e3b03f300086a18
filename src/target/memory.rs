//! In-process target store.
//!
//! Behaves like the REST store (generated ids, upload fields) without a
//! server. Used for rehearsals and throughout the test suite.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::{Document, FileUpload, Filter, Result, StoreError, TargetStore};
use crate::models::Record;

#[derive(Default)]
pub struct MemoryTargetStore {
    collections: Mutex<BTreeMap<String, Vec<Document>>>,
    creates: AtomicUsize,
    updates: AtomicUsize,
    uploads: AtomicUsize,
}

impl MemoryTargetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a collection's documents, in insertion order.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.lock().get(collection).cloned().unwrap_or_default()
    }

    pub fn count(&self, collection: &str) -> usize {
        self.lock().get(collection).map(Vec::len).unwrap_or(0)
    }

    /// Number of create calls served so far.
    pub fn create_calls(&self) -> usize {
        self.creates.load(Ordering::Relaxed)
    }

    pub fn update_calls(&self) -> usize {
        self.updates.load(Ordering::Relaxed)
    }

    /// Number of binary attachments received.
    pub fn upload_calls(&self) -> usize {
        self.uploads.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<Document>>> {
        // A poisoned lock only means a test panicked mid-write.
        self.collections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn apply_file(&self, fields: &mut Record, file: Option<FileUpload>) {
        if let Some(file) = file {
            self.uploads.fetch_add(1, Ordering::Relaxed);
            fields.insert("filename".into(), Value::String(file.filename.clone()));
            fields.insert("mimeType".into(), Value::String(file.mime_type));
            fields.insert("filesize".into(), Value::from(file.content.len() as u64));
            fields.insert(
                "url".into(),
                Value::String(format!("/media/{}", file.filename)),
            );
        }
    }
}

#[async_trait]
impl TargetStore for MemoryTargetStore {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn create(
        &self,
        collection: &str,
        data: &Record,
        file: Option<FileUpload>,
    ) -> Result<Document> {
        self.creates.fetch_add(1, Ordering::Relaxed);
        let id = uuid::Uuid::new_v4().to_string();
        let mut fields = data.clone();
        fields.insert("id".into(), Value::String(id.clone()));
        self.apply_file(&mut fields, file);

        let doc = Document { id, fields };
        self.lock()
            .entry(collection.to_string())
            .or_default()
            .push(doc.clone());
        Ok(doc)
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        data: &Record,
        file: Option<FileUpload>,
    ) -> Result<Document> {
        self.updates.fetch_add(1, Ordering::Relaxed);
        let mut collections = self.lock();
        let doc = collections
            .get_mut(collection)
            .and_then(|docs| docs.iter_mut().find(|d| d.id == id))
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;

        for (key, value) in data {
            if key != "id" {
                doc.fields.insert(key.clone(), value.clone());
            }
        }
        self.apply_file(&mut doc.fields, file);
        Ok(doc.clone())
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        limit: usize,
    ) -> Result<Vec<Document>> {
        Ok(self
            .lock()
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|d| filter.matches(d))
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn find_by_id(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        Ok(self
            .lock()
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| d.id == id).cloned()))
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let mut collections = self.lock();
        let docs = collections.entry(collection.to_string()).or_default();
        let before = docs.len();
        docs.retain(|d| d.id != id);
        if docs.len() == before {
            return Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn delete_where(&self, collection: &str, filter: &Filter) -> Result<usize> {
        let mut collections = self.lock();
        let docs = collections.entry(collection.to_string()).or_default();
        let before = docs.len();
        docs.retain(|d| !filter.matches(d));
        Ok(before - docs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_crud_cycle() {
        let store = MemoryTargetStore::new();
        let created = store
            .create("music-tags", &record(json!({"name": "Calm", "slug": "calm"})), None)
            .await
            .unwrap();

        let found = store
            .find_one("music-tags", &Filter::eq("slug", "calm"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, created.id);

        let updated = store
            .update("music-tags", &created.id, &record(json!({"name": "Calmer"})), None)
            .await
            .unwrap();
        assert_eq!(updated.get_str("name"), Some("Calmer"));
        assert_eq!(updated.get_str("slug"), Some("calm"));

        store.delete("music-tags", &created.id).await.unwrap();
        assert!(store
            .find_by_id("music-tags", &created.id)
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.create_calls(), 1);
        assert_eq!(store.update_calls(), 1);
    }

    #[tokio::test]
    async fn test_upload_fields_and_delete_where() {
        let store = MemoryTargetStore::new();
        let file = FileUpload {
            filename: "a.jpg".into(),
            mime_type: "image/jpeg".into(),
            content: vec![1, 2, 3],
        };
        let doc = store
            .create("media", &record(json!({"alt": "x"})), Some(file))
            .await
            .unwrap();
        assert_eq!(doc.get_u64("filesize"), Some(3));
        assert_eq!(store.upload_calls(), 1);

        store.create("media", &Record::new(), None).await.unwrap();
        assert_eq!(store.delete_where("media", &Filter::new()).await.unwrap(), 2);
        assert_eq!(store.count("media"), 0);
    }
}
