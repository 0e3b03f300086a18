//! Source-key to target-id maps, one per entity kind.
//!
//! Maps are populated as migrators write and are persisted after every
//! phase through an [`IdMapStore`] so an interrupted run can resume.

mod json;
mod sqlite;

pub use json::JsonFileStore;
pub use sqlite::SqliteIdMapStore;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum IdMapError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid snapshot: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Unsupported snapshot version {0}")]
    Version(u32),
    #[error("Unknown entity kind: {0}")]
    UnknownKind(String),
}

pub type Result<T> = std::result::Result<T, IdMapError>;

/// Lookup from a source natural key to a target identifier.
///
/// At most one target id per key. Inserting an existing key replaces it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdMap {
    entries: BTreeMap<String, String>,
}

impl IdMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Record a mapping, returning the previous target id if any.
    pub fn insert(&mut self, key: impl Into<String>, id: impl Into<String>) -> Option<String> {
        self.entries.insert(key.into(), id.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for IdMap {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Entity kinds that own an id map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Narrators,
    MeditationTags,
    MusicTags,
    Frames,
    Media,
    Music,
    Meditations,
}

impl EntityKind {
    pub const ALL: [EntityKind; 7] = [
        EntityKind::Narrators,
        EntityKind::MeditationTags,
        EntityKind::MusicTags,
        EntityKind::Frames,
        EntityKind::Media,
        EntityKind::Music,
        EntityKind::Meditations,
    ];

    /// Key used in the snapshot document.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Narrators => "narrators",
            EntityKind::MeditationTags => "meditationTags",
            EntityKind::MusicTags => "musicTags",
            EntityKind::Frames => "frames",
            EntityKind::Media => "media",
            EntityKind::Music => "music",
            EntityKind::Meditations => "meditations",
        }
    }
}

impl FromStr for EntityKind {
    type Err = IdMapError;

    fn from_str(s: &str) -> Result<Self> {
        EntityKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| IdMapError::UnknownKind(s.to_string()))
    }
}

/// Every id map used by a run.
///
/// Fields are separate so the orchestrator can lend one map mutably to a
/// migrator while lending others immutably.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IdMaps {
    pub narrators: IdMap,
    pub meditation_tags: IdMap,
    pub music_tags: IdMap,
    pub frames: IdMap,
    pub media: IdMap,
    pub music: IdMap,
    pub meditations: IdMap,
}

impl IdMaps {
    pub fn get(&self, kind: EntityKind) -> &IdMap {
        match kind {
            EntityKind::Narrators => &self.narrators,
            EntityKind::MeditationTags => &self.meditation_tags,
            EntityKind::MusicTags => &self.music_tags,
            EntityKind::Frames => &self.frames,
            EntityKind::Media => &self.media,
            EntityKind::Music => &self.music,
            EntityKind::Meditations => &self.meditations,
        }
    }

    pub fn get_mut(&mut self, kind: EntityKind) -> &mut IdMap {
        match kind {
            EntityKind::Narrators => &mut self.narrators,
            EntityKind::MeditationTags => &mut self.meditation_tags,
            EntityKind::MusicTags => &mut self.music_tags,
            EntityKind::Frames => &mut self.frames,
            EntityKind::Media => &mut self.media,
            EntityKind::Music => &mut self.music,
            EntityKind::Meditations => &mut self.meditations,
        }
    }

    /// Total entries across all kinds.
    pub fn total(&self) -> usize {
        EntityKind::ALL.iter().map(|k| self.get(*k).len()).sum()
    }
}

/// Migration phases in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Tags,
    Narrators,
    Frames,
    Music,
    Meditations,
}

impl Phase {
    pub const ORDER: [Phase; 5] = [
        Phase::Tags,
        Phase::Narrators,
        Phase::Frames,
        Phase::Music,
        Phase::Meditations,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Tags => "tags",
            Phase::Narrators => "narrators",
            Phase::Frames => "frames",
            Phase::Music => "music",
            Phase::Meditations => "meditations",
        }
    }

    /// Id maps written by this phase.
    pub fn entity_kinds(&self) -> &'static [EntityKind] {
        match self {
            Phase::Tags => &[EntityKind::MeditationTags, EntityKind::MusicTags],
            Phase::Narrators => &[EntityKind::Narrators],
            Phase::Frames => &[EntityKind::Frames],
            Phase::Music => &[EntityKind::Music],
            Phase::Meditations => &[EntityKind::Meditations],
        }
    }

    /// Parse a `--tables` entry: a phase name, a target collection or a
    /// legacy table name.
    pub fn parse_selector(s: &str) -> Option<Phase> {
        match s.trim().to_lowercase().as_str() {
            "tags" | "meditation-tags" | "music-tags" | "taggings" => Some(Phase::Tags),
            "narrators" | "narrator" => Some(Phase::Narrators),
            "frames" | "frame" => Some(Phase::Frames),
            "music" | "musics" => Some(Phase::Music),
            "meditations" | "meditation" | "keyframes" => Some(Phase::Meditations),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted resumability state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdMapSnapshot {
    pub version: u32,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_phases: Vec<Phase>,
    #[serde(default)]
    pub maps: IdMaps,
}

impl Default for IdMapSnapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            updated_at: Utc::now(),
            completed_phases: Vec::new(),
            maps: IdMaps::default(),
        }
    }
}

impl IdMapSnapshot {
    pub fn is_completed(&self, phase: Phase) -> bool {
        self.completed_phases.contains(&phase)
    }

    pub fn mark_completed(&mut self, phase: Phase) {
        if !self.is_completed(phase) {
            self.completed_phases.push(phase);
        }
        self.updated_at = Utc::now();
    }

    /// Forget a phase and the maps it produced.
    pub fn reset_phase(&mut self, phase: Phase) {
        self.completed_phases.retain(|p| *p != phase);
        for kind in phase.entity_kinds() {
            self.maps.get_mut(*kind).clear();
        }
    }
}

/// Persistence for [`IdMapSnapshot`].
pub trait IdMapStore: Send + Sync {
    /// Short label for logs.
    fn describe(&self) -> String;

    /// Load the last saved snapshot, `None` if nothing was saved yet.
    fn load(&self) -> Result<Option<IdMapSnapshot>>;

    fn save(&self, snapshot: &IdMapSnapshot) -> Result<()>;

    /// Remove persisted state.
    fn clear(&self) -> Result<()>;
}

/// Store that keeps nothing. Used for dry runs.
#[derive(Debug, Default)]
pub struct NullIdMapStore;

impl IdMapStore for NullIdMapStore {
    fn describe(&self) -> String {
        "none".to_string()
    }

    fn load(&self) -> Result<Option<IdMapSnapshot>> {
        Ok(None)
    }

    fn save(&self, _snapshot: &IdMapSnapshot) -> Result<()> {
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        Ok(())
    }
}
