//! JSON file snapshot store.

use std::io::Write;
use std::path::{Path, PathBuf};

use super::{IdMapError, IdMapSnapshot, IdMapStore, Result, SNAPSHOT_VERSION};

/// Keeps the snapshot in a single JSON file, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IdMapStore for JsonFileStore {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn load(&self) -> Result<Option<IdMapSnapshot>> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let snapshot: IdMapSnapshot = serde_json::from_str(&contents)?;
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(IdMapError::Version(snapshot.version));
        }
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &IdMapSnapshot) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut tmp, snapshot)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idmap::Phase;

    #[test]
    fn test_save_load_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(&dir.path().join("state/id-map.json"));
        assert!(store.load().unwrap().is_none());

        let mut snapshot = IdMapSnapshot::default();
        snapshot.maps.media.insert("cover.jpg", "m1");
        snapshot.mark_completed(Phase::Tags);
        store.save(&snapshot).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.maps, snapshot.maps);
        assert_eq!(loaded.completed_phases, vec![Phase::Tags]);

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
        store.clear().unwrap();
    }

    #[test]
    fn test_rejects_newer_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("id-map.json");
        std::fs::write(
            &path,
            r#"{"version": 99, "updatedAt": "2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        let err = JsonFileStore::new(&path).load().unwrap_err();
        assert!(matches!(err, IdMapError::Version(99)));
    }
}
