//! Configuration for migration runs.
//!
//! `Config` is the file-level shape (TOML, YAML or JSON, every field
//! optional). `Settings` is the resolved, immutable view used at runtime.

mod loader;

pub use loader::{load_settings, LoadOptions};

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default settings file basename, probed with every supported extension.
pub const DEFAULT_CONFIG_BASENAME: &str = "cmsport";

/// File name of the ID-map snapshot inside the cache directory.
pub const ID_MAP_FILENAME: &str = "id-map.json";

/// Subdirectory of the cache directory holding downloaded media.
pub const MEDIA_CACHE_SUBDIR: &str = "media";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse {format} config: {message}")]
    Parse {
        format: &'static str,
        message: String,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// What to do when a record already exists in the target.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ExistingMode {
    /// Reuse the existing identifier, write nothing.
    #[default]
    Skip,
    /// Update metadata in place; attachments are kept.
    Update,
}

/// Gendered variant of narrators and frame artwork.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }

    pub fn other(&self) -> Gender {
        match self {
            Gender::Male => Gender::Female,
            Gender::Female => Gender::Male,
        }
    }
}

/// Where legacy rows come from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Path to the SQLite dump of the legacy database.
    pub database: Option<String>,
    /// Base URL of a headless-CMS REST API (alternative to `database`).
    pub api_url: Option<String>,
    /// Bearer token for the REST API.
    pub api_token: Option<String>,
    /// Collections exposed by the REST API.
    pub api_tables: Vec<String>,
}

/// Target CMS connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// REST base URL, e.g. `https://cms.example.com/api`.
    pub url: Option<String>,
    pub api_key: Option<String>,
    /// Auth collection used in the `API-Key` authorization header.
    pub auth_collection: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            auth_collection: "users".to_string(),
            timeout_secs: 120,
        }
    }
}

/// Media download, conversion and validation policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Prefix for relative storage keys.
    pub base_url: Option<String>,
    /// Download timeout in seconds.
    pub timeout_secs: u64,
    /// Total attempts for transient download failures.
    pub retries: u32,
    /// First backoff delay in milliseconds, doubled per attempt.
    pub retry_delay_ms: u64,
    /// Parallel downloads during prefetch.
    pub concurrency: usize,
    /// Re-encode images to JPEG.
    pub normalize_images: bool,
    /// JPEG quality for normalized images (1-100).
    pub image_quality: u8,
    /// Longest edge for normalized images, in pixels.
    pub image_max_dimension: u32,
    /// Reject audio/video longer than this many seconds.
    pub max_duration_secs: Option<f64>,
    /// Reject files larger than this many bytes.
    pub max_bytes: Option<u64>,
    /// Target collection for standalone media (thumbnails, frame art).
    pub collection: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: 30,
            retries: 3,
            retry_delay_ms: 500,
            concurrency: 3,
            normalize_images: true,
            image_quality: 80,
            image_max_dimension: 2048,
            max_duration_secs: Some(3.0 * 60.0 * 60.0),
            max_bytes: Some(500 * 1024 * 1024),
            collection: "media".to_string(),
        }
    }
}

impl MediaConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Batch processing limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub batch_size: usize,
    /// A migrator halts once its error count exceeds this.
    pub max_errors: usize,
    pub mode: ExistingMode,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_errors: 100,
            mode: ExistingMode::Skip,
        }
    }
}

/// A narrator seeded into the target, addressed by legacy index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarratorConfig {
    pub index: i64,
    pub name: String,
    pub gender: Gender,
}

/// Which tag taxonomy a tag source feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagTaxonomy {
    Meditation,
    Music,
}

impl TagTaxonomy {
    pub fn collection(&self) -> &'static str {
        match self {
            TagTaxonomy::Meditation => "meditation-tags",
            TagTaxonomy::Music => "music-tags",
        }
    }

    pub fn all() -> [TagTaxonomy; 2] {
        [TagTaxonomy::Meditation, TagTaxonomy::Music]
    }
}

/// A comma-separated tag column to harvest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagSource {
    pub table: String,
    pub column: String,
    pub taxonomy: TagTaxonomy,
}

/// Join table recording which entity type actually uses a tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaggingTable {
    pub table: String,
    pub tag_column: String,
    pub type_column: String,
    /// `taggable_type` value for meditations.
    pub meditation_type: String,
    /// `taggable_type` value for music.
    pub music_type: String,
}

impl Default for TaggingTable {
    fn default() -> Self {
        Self {
            table: "taggings".to_string(),
            tag_column: "tag".to_string(),
            type_column: "taggable_type".to_string(),
            meditation_type: "Meditation".to_string(),
            music_type: "Music".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TagsConfig {
    pub sources: Vec<TagSource>,
    /// Consulted when present in the source to split usage per taxonomy.
    pub tagging: Option<TaggingTable>,
}

impl Default for TagsConfig {
    fn default() -> Self {
        Self {
            sources: vec![
                TagSource {
                    table: "meditations".to_string(),
                    column: "tags".to_string(),
                    taxonomy: TagTaxonomy::Meditation,
                },
                TagSource {
                    table: "musics".to_string(),
                    column: "tags".to_string(),
                    taxonomy: TagTaxonomy::Music,
                },
            ],
            tagging: Some(TaggingTable::default()),
        }
    }
}

/// Placeholder thumbnail chosen by tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggedPlaceholder {
    pub tag: String,
    pub key: String,
}

/// Fallback thumbnails for records whose own asset is missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaceholderConfig {
    /// Storage key of the generic placeholder.
    pub default: Option<String>,
    /// First matching tag wins.
    pub by_tag: Vec<TaggedPlaceholder>,
}

impl PlaceholderConfig {
    /// Pick a placeholder key for a record carrying `tags`.
    pub fn select(&self, tags: &[String]) -> Option<&str> {
        self.by_tag
            .iter()
            .find(|p| tags.iter().any(|t| t.eq_ignore_ascii_case(&p.tag)))
            .map(|p| p.key.as_str())
            .or(self.default.as_deref())
    }
}

/// File-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub target: TargetConfig,
    pub media: MediaConfig,
    pub run: RunConfig,
    pub narrators: Vec<NarratorConfig>,
    /// Narrator index used when a legacy index does not resolve.
    pub default_narrator: Option<i64>,
    pub tags: TagsConfig,
    pub placeholders: PlaceholderConfig,
    /// Directory for downloaded media and the ID-map snapshot.
    pub cache_dir: Option<String>,
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

/// Resolved kind of source store.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceKind {
    Sqlite(PathBuf),
    Api {
        base_url: String,
        tables: Vec<String>,
        token: Option<String>,
    },
}

/// Resolved runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub source: Option<SourceKind>,
    pub target: TargetConfig,
    pub media: MediaConfig,
    pub run: RunConfig,
    pub narrators: Vec<NarratorConfig>,
    pub default_narrator: i64,
    pub tags: TagsConfig,
    pub placeholders: PlaceholderConfig,
    pub cache_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cmsport");
        Self {
            source: None,
            target: TargetConfig::default(),
            media: MediaConfig::default(),
            run: RunConfig::default(),
            narrators: default_narrators(),
            default_narrator: 0,
            tags: TagsConfig::default(),
            placeholders: PlaceholderConfig::default(),
            cache_dir,
        }
    }
}

/// Two narrators, index 0 male and index 1 female.
///
/// Legacy scripts disagree on this assignment; override per deployment.
pub fn default_narrators() -> Vec<NarratorConfig> {
    vec![
        NarratorConfig {
            index: 0,
            name: "Narrator (male)".to_string(),
            gender: Gender::Male,
        },
        NarratorConfig {
            index: 1,
            name: "Narrator (female)".to_string(),
            gender: Gender::Female,
        },
    ]
}

impl Settings {
    /// Settings rooted at an explicit cache directory (tests, embedding).
    pub fn with_cache_dir(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            ..Default::default()
        }
    }

    pub fn media_cache_dir(&self) -> PathBuf {
        self.cache_dir.join(MEDIA_CACHE_SUBDIR)
    }

    pub fn id_map_path(&self) -> PathBuf {
        self.cache_dir.join(ID_MAP_FILENAME)
    }

    /// Gender configured for a narrator index.
    pub fn narrator_gender(&self, index: i64) -> Option<Gender> {
        self.narrators
            .iter()
            .find(|n| n.index == index)
            .map(|n| n.gender)
    }

    /// Ensure the cache directories exist.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.media_cache_dir()).map_err(|e| {
            std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to create cache directory '{}': {}",
                    self.cache_dir.display(),
                    e
                ),
            )
        })
    }

    /// Check invariants that would otherwise fail deep inside a run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.run.batch_size == 0 {
            return Err(ConfigError::Invalid("run.batch_size must be > 0".into()));
        }
        if self.media.concurrency == 0 {
            return Err(ConfigError::Invalid("media.concurrency must be > 0".into()));
        }
        if !(1..=100).contains(&self.media.image_quality) {
            return Err(ConfigError::Invalid(
                "media.image_quality must be between 1 and 100".into(),
            ));
        }
        let mut indices: Vec<i64> = self.narrators.iter().map(|n| n.index).collect();
        indices.sort_unstable();
        indices.dedup();
        if indices.len() != self.narrators.len() {
            return Err(ConfigError::Invalid("duplicate narrator index".into()));
        }
        Ok(())
    }
}

/// Resolve a path that may be relative to `base_dir`; `~` is expanded.
pub fn resolve_path(path_str: &str, base_dir: &Path) -> PathBuf {
    let expanded = shellexpand::tilde(path_str);
    let path = Path::new(expanded.as_ref());

    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}
