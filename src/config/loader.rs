//! Settings discovery, parsing and environment overrides.

use std::path::{Path, PathBuf};

use super::{resolve_path, Config, ConfigError, Settings, SourceKind, DEFAULT_CONFIG_BASENAME};

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit settings file (`--settings`).
    pub config_path: Option<PathBuf>,
    /// Skip environment overrides (tests).
    pub ignore_env: bool,
}

impl LoadOptions {
    pub fn with_config(path: PathBuf) -> Self {
        Self {
            config_path: Some(path),
            ..Default::default()
        }
    }
}

impl Config {
    /// Load configuration from a specific file path.
    /// Supports TOML, YAML and JSON based on file extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let mut config = Self::parse(&contents, ext)?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Parse configuration text in the format named by `ext`.
    pub fn parse(contents: &str, ext: &str) -> Result<Self, ConfigError> {
        match ext {
            "toml" => toml::from_str(contents).map_err(|e| ConfigError::Parse {
                format: "TOML",
                message: e.to_string(),
            }),
            "yaml" | "yml" => serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse {
                format: "YAML",
                message: e.to_string(),
            }),
            _ => serde_json::from_str(contents).map_err(|e| ConfigError::Parse {
                format: "JSON",
                message: e.to_string(),
            }),
        }
    }

    /// Locate a `cmsport` settings file in the standard locations.
    pub async fn discover() -> Option<PathBuf> {
        match prefer::load(DEFAULT_CONFIG_BASENAME).await {
            Ok(pref_config) => pref_config.source_path().map(|p| p.to_path_buf()),
            Err(e) => {
                tracing::debug!("No settings file discovered: {}", e);
                None
            }
        }
    }

    /// Get the base directory for resolving relative paths.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Apply environment variable overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(db) = std::env::var("CMSPORT_SOURCE_DATABASE") {
            self.source.database = Some(db);
        }
        if let Ok(api) = std::env::var("CMSPORT_SOURCE_API") {
            self.source.api_url = Some(api);
        }
        if let Ok(url) = std::env::var("CMSPORT_TARGET_URL") {
            self.target.url = Some(url);
        }
        if let Ok(key) = std::env::var("CMSPORT_TARGET_API_KEY") {
            self.target.api_key = Some(key);
        }
        if let Ok(base) = std::env::var("CMSPORT_MEDIA_BASE_URL") {
            self.media.base_url = Some(base);
        }
        if let Ok(dir) = std::env::var("CMSPORT_CACHE_DIR") {
            self.cache_dir = Some(dir);
        }
        self
    }

    /// Resolve into runtime settings.
    /// `base_dir` is used to resolve relative paths (config file dir or CWD).
    pub fn into_settings(self, base_dir: &Path) -> Settings {
        let mut settings = Settings::default();

        settings.source = if let Some(ref db) = self.source.database {
            Some(SourceKind::Sqlite(resolve_path(db, base_dir)))
        } else {
            self.source.api_url.as_ref().map(|url| SourceKind::Api {
                base_url: url.clone(),
                tables: self.source.api_tables.clone(),
                token: self.source.api_token.clone(),
            })
        };
        if let Some(ref dir) = self.cache_dir {
            settings.cache_dir = resolve_path(dir, base_dir);
        }
        if !self.narrators.is_empty() {
            settings.narrators = self.narrators;
        }
        if let Some(index) = self.default_narrator {
            settings.default_narrator = index;
        }
        settings.target = self.target;
        settings.media = self.media;
        settings.run = self.run;
        settings.tags = self.tags;
        settings.placeholders = self.placeholders;
        settings
    }
}

/// Discover, parse and resolve settings.
pub async fn load_settings(options: &LoadOptions) -> Result<Settings, ConfigError> {
    let path = match &options.config_path {
        Some(path) => Some(path.clone()),
        None => Config::discover().await,
    };

    let config = match path {
        Some(ref path) => {
            tracing::debug!("Loading settings from {}", path.display());
            Config::load_from_path(path).await?
        }
        None => Config::default(),
    };
    let config = if options.ignore_env {
        config
    } else {
        config.with_env_overrides()
    };

    let base_dir = config
        .base_dir()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    let settings = config.into_settings(&base_dir);
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExistingMode, Gender};

    #[test]
    fn test_parse_formats() {
        let toml = r#"
            cache_dir = "cache"
            default_narrator = 1

            [source]
            database = "legacy.db"

            [run]
            mode = "update"
            max_errors = 10

            [[narrators]]
            index = 0
            name = "Anna"
            gender = "female"
        "#;
        let config = Config::parse(toml, "toml").unwrap();
        assert_eq!(config.run.mode, ExistingMode::Update);
        assert_eq!(config.run.max_errors, 10);
        assert_eq!(config.run.batch_size, 100);
        assert_eq!(config.narrators[0].gender, Gender::Female);

        let yaml = "media:\n  image_quality: 70\n";
        let config = Config::parse(yaml, "yaml").unwrap();
        assert_eq!(config.media.image_quality, 70);
        assert_eq!(config.media.timeout_secs, 30);

        let json = r#"{"target": {"url": "http://cms/api"}}"#;
        let config = Config::parse(json, "json").unwrap();
        assert_eq!(config.target.url.as_deref(), Some("http://cms/api"));
        assert_eq!(config.target.auth_collection, "users");

        assert!(matches!(
            Config::parse("[run", "toml"),
            Err(ConfigError::Parse { format: "TOML", .. })
        ));
    }

    #[tokio::test]
    async fn test_load_settings_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cmsport.toml");
        std::fs::write(
            &path,
            "cache_dir = \"state\"\n[source]\ndatabase = \"dump.sqlite\"\n",
        )
        .unwrap();

        let settings = load_settings(&LoadOptions {
            config_path: Some(path),
            ignore_env: true,
        })
        .await
        .unwrap();

        assert_eq!(settings.cache_dir, dir.path().join("state"));
        assert_eq!(
            settings.source,
            Some(SourceKind::Sqlite(dir.path().join("dump.sqlite")))
        );
        assert_eq!(settings.narrators.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_settings(&LoadOptions {
            config_path: Some(dir.path().join("nope.toml")),
            ignore_env: true,
        })
        .await;
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[tokio::test]
    async fn test_discovered_file_uses_cmsport_basename() {
        if let Some(path) = Config::discover().await {
            assert_eq!(
                path.file_stem().and_then(|s| s.to_str()),
                Some(DEFAULT_CONFIG_BASENAME)
            );
        }
    }
}
