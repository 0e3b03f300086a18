//! Media transfer: download, cache, normalize and upload binary assets.
//!
//! Every failure here is soft. [`MediaTransfer::transfer`] logs a warning
//! and returns `None`; the owning record carries on without the asset.
//!
//! Uploads are deduplicated by destination filename through the media
//! [`IdMap`]: a filename already mapped to a live target document is reused
//! instead of uploaded again.

mod cache;
mod convert;
mod fetch;
mod probe;

pub use cache::{CacheStats, DiskCache};
pub use convert::{image_dimensions, normalize_image};
pub use fetch::{Fetched, MediaFetcher, USER_AGENT};
pub use probe::{detect_probe, FfmpegProbe, MediaProbe, NoopProbe};

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::config::MediaConfig;
use crate::idmap::IdMap;
use crate::models::{MediaStats, Record};
use crate::target::{Document, FileUpload, Filter, StoreError, TargetStore};
use crate::utils::{
    detect_mime, filename_from_key, format_size, guess_mime_from_filename, is_normalizable_image,
    with_extension, MediaKind,
};

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{url} returned {status}")]
    Status { status: u16, url: String },
    #[error("Cannot resolve media key {0}: no base URL configured")]
    Unresolvable(String),
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image conversion failed: {0}")]
    Conversion(#[from] image::ImageError),
    #[error("Rejected: {0}")]
    Rejected(String),
    #[error("Upload failed: {0}")]
    Upload(#[from] StoreError),
}

impl MediaError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            MediaError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            MediaError::Status { status, .. } => fetch::is_transient_status(*status),
            _ => false,
        }
    }
}

/// Descriptive fields stored alongside an uploaded asset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaMetadata {
    pub alt: Option<String>,
    pub caption: Option<String>,
    pub tags: Vec<String>,
}

impl MediaMetadata {
    pub fn alt(alt: &str) -> Self {
        Self {
            alt: Some(alt.to_string()),
            ..Default::default()
        }
    }

    fn to_record(&self) -> Record {
        let mut record = Record::new();
        if let Some(ref alt) = self.alt {
            record.insert("alt".into(), Value::String(alt.clone()));
        }
        if let Some(ref caption) = self.caption {
            record.insert("caption".into(), Value::String(caption.clone()));
        }
        if !self.tags.is_empty() {
            record.insert(
                "tags".into(),
                Value::Array(self.tags.iter().cloned().map(Value::String).collect()),
            );
        }
        record
    }
}

/// A media document present in the target after a transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferredMedia {
    pub id: String,
    pub url: Option<String>,
    pub filename: String,
    pub mime_type: Option<String>,
    pub filesize: u64,
    /// True when an existing upload was reused.
    pub reused: bool,
    /// Still extracted from a video, uploaded separately.
    pub thumbnail: Option<String>,
    pub duration: Option<f64>,
}

impl TransferredMedia {
    fn from_document(doc: &Document, filename: &str, reused: bool) -> Self {
        Self {
            id: doc.id.clone(),
            url: doc.get_str("url").map(str::to_string),
            filename: doc.get_str("filename").unwrap_or(filename).to_string(),
            mime_type: doc.get_str("mimeType").map(str::to_string),
            filesize: doc.get_u64("filesize").unwrap_or(0),
            reused,
            thumbnail: None,
            duration: None,
        }
    }
}

/// A record's own file, ready to send with its create call.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub upload: FileUpload,
    pub duration: Option<f64>,
}

/// Bytes ready for upload.
struct Prepared {
    upload: FileUpload,
    duration: Option<f64>,
    thumbnail: Option<Vec<u8>>,
}

/// Moves assets from the media origin into the target store.
pub struct MediaTransfer {
    fetcher: MediaFetcher,
    cache: DiskCache,
    target: Arc<dyn TargetStore>,
    probe: Arc<dyn MediaProbe>,
    config: MediaConfig,
    stats: MediaStats,
}

impl MediaTransfer {
    pub fn new(
        config: &MediaConfig,
        cache_dir: &Path,
        target: Arc<dyn TargetStore>,
        probe: Arc<dyn MediaProbe>,
    ) -> Result<Self, MediaError> {
        let fetcher = MediaFetcher::new(
            config.base_url.as_deref(),
            config.timeout(),
            config.retries,
            config.retry_delay(),
        )?;
        Ok(Self {
            fetcher,
            cache: DiskCache::new(cache_dir),
            target,
            probe,
            config: config.clone(),
            stats: MediaStats::default(),
        })
    }

    pub fn stats(&self) -> MediaStats {
        self.stats
    }

    pub fn cache(&self) -> &DiskCache {
        &self.cache
    }

    /// Collection that receives standalone media.
    pub fn collection(&self) -> &str {
        &self.config.collection
    }

    /// Filename an asset will be uploaded under; the dedup key.
    pub fn destination_filename(&self, key: &str) -> String {
        let filename = filename_from_key(key);
        if self.converts_to_jpeg(&filename) {
            with_extension(&filename, "jpg")
        } else {
            filename
        }
    }

    /// Whether a file with this name is re-encoded as JPEG before upload.
    fn converts_to_jpeg(&self, filename: &str) -> bool {
        self.config.normalize_images && is_normalizable_image(guess_mime_from_filename(filename))
    }

    /// Upload `key` into `collection`, reusing an earlier upload of the same
    /// filename when it still exists.
    pub async fn transfer(
        &mut self,
        media_map: &mut IdMap,
        key: &str,
        collection: &str,
        metadata: &MediaMetadata,
    ) -> Option<TransferredMedia> {
        let key = key.trim();
        if key.is_empty() {
            return None;
        }
        let filename = self.destination_filename(key);

        match self.find_existing(media_map, &filename, collection).await {
            Ok(Some(existing)) => {
                self.stats.reused += 1;
                tracing::debug!("Reusing media {} ({})", filename, existing.id);
                return Some(existing);
            }
            Ok(None) => {}
            Err(e) => {
                self.stats.failed += 1;
                tracing::warn!("Media lookup for {} failed: {}", filename, e);
                return None;
            }
        }

        match self.upload(media_map, key, &filename, collection, metadata).await {
            Ok(media) => Some(media),
            Err(e) => {
                self.stats.failed += 1;
                tracing::warn!("Skipping media {}: {}", key, e);
                None
            }
        }
    }

    /// Download and prepare a record's own file without uploading it.
    pub async fn fetch_attachment(&mut self, key: &str) -> Option<Attachment> {
        let key = key.trim();
        if key.is_empty() {
            return None;
        }
        match self.load_prepared(key).await {
            Ok(prepared) => {
                self.stats.uploaded += 1;
                self.stats.bytes += prepared.upload.size();
                Some(Attachment {
                    upload: prepared.upload,
                    duration: prepared.duration,
                })
            }
            Err(e) => {
                self.stats.failed += 1;
                tracing::warn!("Skipping attachment {}: {}", key, e);
                None
            }
        }
    }

    /// Warm the download cache, fetching up to `concurrency` keys at a time.
    /// Returns the number of keys downloaded.
    pub async fn prefetch(&mut self, keys: &[String]) -> usize {
        let pending: Vec<&str> = keys
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter(|k| !self.cache.contains(k))
            .collect();
        if pending.is_empty() {
            return 0;
        }

        let mut downloaded = 0;
        for chunk in pending.chunks(self.config.concurrency.max(1)) {
            let results =
                futures::future::join_all(chunk.iter().map(|key| self.download_to_cache(key)))
                    .await;
            for (key, result) in chunk.iter().zip(results) {
                match result {
                    Ok(_) => downloaded += 1,
                    Err(e) => tracing::debug!("Prefetch of {} failed: {}", key, e),
                }
            }
        }
        tracing::debug!("Prefetched {}/{} media files", downloaded, pending.len());
        downloaded
    }

    async fn download_to_cache(&self, key: &str) -> Result<PathBuf, MediaError> {
        let fetched = self.fetcher.fetch(key).await?;
        Ok(self.cache.put(key, &fetched.bytes).await?)
    }

    async fn find_existing(
        &self,
        media_map: &mut IdMap,
        filename: &str,
        collection: &str,
    ) -> Result<Option<TransferredMedia>, StoreError> {
        if let Some(id) = media_map.get(filename).map(str::to_string) {
            match self.target.find_by_id(collection, &id).await? {
                Some(doc) => return Ok(Some(TransferredMedia::from_document(&doc, filename, true))),
                None => {
                    tracing::debug!("Mapped media {} ({}) is gone, uploading again", filename, id);
                    media_map.remove(filename);
                }
            }
        }

        let found = self
            .target
            .find_one(collection, &Filter::eq("filename", filename))
            .await?;
        Ok(found.map(|doc| {
            media_map.insert(filename, doc.id.clone());
            TransferredMedia::from_document(&doc, filename, true)
        }))
    }

    async fn upload(
        &mut self,
        media_map: &mut IdMap,
        key: &str,
        filename: &str,
        collection: &str,
        metadata: &MediaMetadata,
    ) -> Result<TransferredMedia, MediaError> {
        let prepared = self.load_prepared(key).await?;
        let size = prepared.upload.size();

        let doc = self
            .target
            .create(collection, &metadata.to_record(), Some(prepared.upload))
            .await?;
        media_map.insert(filename, doc.id.clone());
        self.stats.uploaded += 1;
        self.stats.bytes += size;
        tracing::debug!("Uploaded {} ({}) as {}", filename, format_size(size), doc.id);

        let mut media = TransferredMedia::from_document(&doc, filename, false);
        media.filesize = media.filesize.max(size);
        media.duration = prepared.duration;

        if let Some(still) = prepared.thumbnail {
            let thumb_name = with_extension(&format!("{}-thumb", filename), "jpg");
            let upload = FileUpload {
                filename: thumb_name.clone(),
                mime_type: "image/jpeg".to_string(),
                content: still,
            };
            let thumb_size = upload.size();
            match self.target.create(collection, &metadata.to_record(), Some(upload)).await {
                Ok(thumb) => {
                    media_map.insert(thumb_name, thumb.id.clone());
                    self.stats.uploaded += 1;
                    self.stats.bytes += thumb_size;
                    media.thumbnail = Some(thumb.id);
                }
                Err(e) => tracing::warn!("Video thumbnail upload for {} failed: {}", filename, e),
            }
        }

        Ok(media)
    }

    async fn load_prepared(&mut self, key: &str) -> Result<Prepared, MediaError> {
        let (bytes, path) = self.load(key).await?;
        self.prepare(key, bytes, &path).await
    }

    /// Bytes for a key, from the disk cache or the network.
    async fn load(&mut self, key: &str) -> Result<(Vec<u8>, PathBuf), MediaError> {
        if let Some(bytes) = self.cache.get(key).await {
            self.stats.cache_hits += 1;
            return Ok((bytes, self.cache.path_for(key)));
        }
        let fetched = self.fetcher.fetch(key).await?;
        let path = self.cache.put(key, &fetched.bytes).await?;
        Ok((fetched.bytes, path))
    }

    /// Apply size/duration limits and image normalization.
    ///
    /// The upload is always named by `destination_filename`, so the dedup
    /// lookup finds it again. An image that cannot be re-encoded is rejected.
    async fn prepare(&self, key: &str, bytes: Vec<u8>, path: &Path) -> Result<Prepared, MediaError> {
        if let Some(max) = self.config.max_bytes {
            if bytes.len() as u64 > max {
                return Err(MediaError::Rejected(format!(
                    "{} is {} (limit {})",
                    key,
                    format_size(bytes.len() as u64),
                    format_size(max)
                )));
            }
        }

        let source_name = filename_from_key(key);
        let filename = self.destination_filename(key);
        let mut mime = detect_mime(&bytes, &source_name);
        let mut content = bytes;
        let mut duration = None;
        let mut thumbnail = None;

        if self.converts_to_jpeg(&source_name) {
            content = normalize_image(
                &content,
                self.config.image_quality,
                self.config.image_max_dimension,
            )?;
            mime = "image/jpeg".to_string();
        } else if let kind @ (MediaKind::Audio | MediaKind::Video) = MediaKind::from_mime(&mime) {
            duration = self.probe.duration(path).await;
            if let (Some(d), Some(max)) = (duration, self.config.max_duration_secs) {
                if d > max {
                    return Err(MediaError::Rejected(format!(
                        "{} runs {:.0}s (limit {:.0}s)",
                        key, d, max
                    )));
                }
            }
            if kind == MediaKind::Video {
                thumbnail = self
                    .probe
                    .thumbnail(path)
                    .await
                    .and_then(|still| normalize_image(&still, self.config.image_quality, 640).ok());
            }
        }

        Ok(Prepared {
            upload: FileUpload {
                filename,
                mime_type: mime,
                content,
            },
            duration,
            thumbnail,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::MemoryTargetStore;
    use async_trait::async_trait;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct FixedProbe(f64);

    #[async_trait]
    impl MediaProbe for FixedProbe {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn duration(&self, _path: &Path) -> Option<f64> {
            Some(self.0)
        }

        async fn thumbnail(&self, _path: &Path) -> Option<Vec<u8>> {
            None
        }
    }

    fn config(base: &str) -> MediaConfig {
        MediaConfig {
            base_url: Some(base.to_string()),
            retry_delay_ms: 1,
            ..Default::default()
        }
    }

    async fn serve(server: &MockServer, route: &str, status: u16, body: &[u8]) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(status).set_body_bytes(body.to_vec()))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_same_filename_uploads_once() {
        let server = MockServer::start().await;
        serve(&server, "/audio/bell.mp3", 200, b"ID3bell").await;

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryTargetStore::new());
        let mut transfer = MediaTransfer::new(
            &config(&server.uri()),
            dir.path(),
            store.clone(),
            Arc::new(NoopProbe),
        )
        .unwrap();
        let mut map = IdMap::new();

        let first = transfer
            .transfer(&mut map, "audio/bell.mp3", "media", &MediaMetadata::alt("Bell"))
            .await
            .unwrap();
        let second = transfer
            .transfer(&mut map, "audio/bell.mp3", "media", &MediaMetadata::default())
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert!(!first.reused);
        assert!(second.reused);
        assert_eq!(store.count("media"), 1);
        assert_eq!(transfer.stats().uploaded, 1);
        assert_eq!(transfer.stats().reused, 1);
        assert_eq!(map.get("bell.mp3"), Some(first.id.as_str()));
    }

    #[tokio::test]
    async fn test_stale_map_entry_is_evicted() {
        let server = MockServer::start().await;
        serve(&server, "/a.mp3", 200, b"ID3a").await;

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryTargetStore::new());
        let mut transfer =
            MediaTransfer::new(&config(&server.uri()), dir.path(), store.clone(), Arc::new(NoopProbe))
                .unwrap();
        let mut map = IdMap::new();
        map.insert("a.mp3", "deleted-id");

        let media = transfer
            .transfer(&mut map, "a.mp3", "media", &MediaMetadata::default())
            .await
            .unwrap();
        assert_ne!(media.id, "deleted-id");
        assert_eq!(map.get("a.mp3"), Some(media.id.as_str()));
        assert_eq!(store.count("media"), 1);
    }

    #[tokio::test]
    async fn test_missing_and_oversized_media_are_soft_failures() {
        let server = MockServer::start().await;
        serve(&server, "/gone.jpg", 404, b"").await;
        serve(&server, "/long.mp3", 200, b"ID3long").await;

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryTargetStore::new());
        let mut cfg = config(&server.uri());
        cfg.max_duration_secs = Some(60.0);
        let mut transfer =
            MediaTransfer::new(&cfg, dir.path(), store.clone(), Arc::new(FixedProbe(120.0))).unwrap();
        let mut map = IdMap::new();

        assert!(transfer
            .transfer(&mut map, "gone.jpg", "media", &MediaMetadata::default())
            .await
            .is_none());
        assert!(transfer.fetch_attachment("long.mp3").await.is_none());
        assert_eq!(transfer.stats().failed, 2);
        assert_eq!(store.count("media"), 0);
        assert!(map.is_empty());
    }

    #[tokio::test]
    async fn test_prefetch_fills_cache() {
        let server = MockServer::start().await;
        for name in ["a", "b", "c", "d"] {
            serve(&server, &format!("/{}.mp3", name), 200, b"ID3").await;
        }

        let dir = tempfile::tempdir().unwrap();
        let mut transfer = MediaTransfer::new(
            &config(&server.uri()),
            dir.path(),
            Arc::new(MemoryTargetStore::new()),
            Arc::new(NoopProbe),
        )
        .unwrap();

        let keys: Vec<String> = ["a.mp3", "b.mp3", "c.mp3", "d.mp3", "a.mp3", "missing.mp3"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(transfer.prefetch(&keys).await, 4);
        assert_eq!(transfer.prefetch(&keys).await, 0);

        let attachment = transfer.fetch_attachment("c.mp3").await.unwrap();
        assert_eq!(attachment.upload.content, b"ID3".to_vec());
        assert_eq!(transfer.stats().cache_hits, 1);
    }

    fn png() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(4, 4, image::Rgb([200, 10, 10]));
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[tokio::test]
    async fn test_upload_is_named_by_destination_filename() {
        let server = MockServer::start().await;
        serve(&server, "/img/photo", 200, &png()).await;
        serve(&server, "/img/cover.png", 200, &png()).await;
        serve(&server, "/img/broken.png", 200, b"not an image").await;

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryTargetStore::new());
        let mut transfer =
            MediaTransfer::new(&config(&server.uri()), dir.path(), store.clone(), Arc::new(NoopProbe))
                .unwrap();

        for key in ["img/photo", "img/cover.png"] {
            let first = transfer
                .transfer(&mut IdMap::new(), key, "media", &MediaMetadata::default())
                .await
                .unwrap();
            let doc = store.find_by_id("media", &first.id).await.unwrap().unwrap();
            assert_eq!(doc.get_str("filename"), Some(transfer.destination_filename(key).as_str()));

            // A lost ID map still finds the earlier upload by filename.
            let again = transfer
                .transfer(&mut IdMap::new(), key, "media", &MediaMetadata::default())
                .await
                .unwrap();
            assert!(again.reused);
            assert_eq!(again.id, first.id);
        }

        assert!(transfer
            .transfer(&mut IdMap::new(), "img/broken.png", "media", &MediaMetadata::default())
            .await
            .is_none());
        assert_eq!(store.count("media"), 2);
        assert_eq!(transfer.stats().failed, 1);
    }

    #[test]
    fn test_destination_filename_predicts_normalization() {
        let transfer = MediaTransfer::new(
            &MediaConfig::default(),
            Path::new("/tmp/unused"),
            Arc::new(MemoryTargetStore::new()),
            Arc::new(NoopProbe),
        )
        .unwrap();
        assert_eq!(transfer.destination_filename("img/Cover.PNG?v=2"), "Cover.jpg");
        assert_eq!(transfer.destination_filename("a/b/intro.mp3"), "intro.mp3");
        assert_eq!(transfer.destination_filename("anim.gif"), "anim.gif");
    }
}
