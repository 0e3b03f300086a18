//! On-disk download cache.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Downloaded assets keyed by a filesystem-safe form of the storage key.
#[derive(Debug, Clone)]
pub struct DiskCache {
    dir: PathBuf,
}

/// File count and total size of the cache directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub files: u64,
    pub bytes: u64,
}

impl DiskCache {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cache path for a storage key.
    ///
    /// The sanitized key keeps the file recognizable; the hash prefix keeps
    /// keys that sanitize to the same text apart.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let sanitized: String = key
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        // ASCII only after sanitizing, so byte slicing is safe.
        let sanitized = &sanitized[sanitized.len().saturating_sub(100)..];

        let hash = hex::encode(Sha256::digest(key.as_bytes()));
        self.dir.join(format!("{}-{}", &hash[..12], sanitized))
    }

    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) if !bytes.is_empty() => Some(bytes),
            _ => None,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.path_for(key).is_file()
    }

    /// Store bytes for a key, returning the cache path.
    pub async fn put(&self, key: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(key);
        let tmp = path.with_extension("part");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(path)
    }

    pub fn stats(&self) -> std::io::Result<CacheStats> {
        let mut stats = CacheStats::default();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(stats),
            Err(e) => return Err(e),
        };
        for entry in entries {
            let metadata = entry?.metadata()?;
            if metadata.is_file() {
                stats.files += 1;
                stats.bytes += metadata.len();
            }
        }
        Ok(stats)
    }

    /// Delete every cached file. Returns the number removed.
    pub fn clear(&self) -> std::io::Result<u64> {
        let removed = self.stats()?.files;
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(removed),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e),
        }
    }
}
