//! Shared fixtures for end-to-end migration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cmsport::config::Settings;
use cmsport::idmap::JsonFileStore;
use cmsport::orchestrator::Orchestrator;
use cmsport::source::SqliteSource;
use cmsport::target::MemoryTargetStore;
use rusqlite::Connection;
use tempfile::TempDir;
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Legacy schema with two tracks, two poses and three meditations.
pub const LEGACY_SQL: &str = "
    CREATE TABLE musics (id INTEGER PRIMARY KEY, title TEXT, duration TEXT, tags TEXT,
        audio_file TEXT, credit TEXT);
    CREATE TABLE frames (id INTEGER PRIMARY KEY, name TEXT, category TEXT, tags TEXT,
        male_image TEXT, female_image TEXT);
    CREATE TABLE meditations (id INTEGER PRIMARY KEY, title TEXT, description TEXT,
        duration TEXT, narrator INTEGER, tags TEXT, thumbnail TEXT, audio_file TEXT,
        music_id INTEGER, published INTEGER);
    CREATE TABLE keyframes (id INTEGER PRIMARY KEY, meditation_id INTEGER, frame_id INTEGER,
        timestamp REAL);

    INSERT INTO musics VALUES
        (1, 'Rain', '300', 'Calm', NULL, 'Field recording'),
        (2, 'Waves', '420', 'calm', NULL, NULL);
    INSERT INTO frames VALUES
        (10, 'Seated', 'sitting', NULL, 'img/seated.png', 'img/seated.png'),
        (11, 'Lying Down', 'lying', NULL, 'img/lying-m.png', 'img/lying-f.png');
    INSERT INTO meditations VALUES
        (1, 'Body Scan', 'Relax slowly', '600', 1, 'Sleep, calm', NULL, NULL, 1, 1),
        (2, 'Evening Wind Down', NULL, '900', 0, 'sleep', NULL, NULL, 2, 1),
        (3, 'Morning Focus', NULL, '300', 0, 'focus', NULL, NULL, NULL, 0);
    INSERT INTO keyframes VALUES
        (1, 1, 11, 120.0), (2, 1, 10, 0.0), (3, 1, 11, 60.0),
        (4, 2, 10, 30.0), (5, 2, 99, 10.0);
";

/// 1x1 GIF served for every image request.
pub const GIF: &[u8] = b"GIF89a\x01\x00\x01\x00\x00\x00\x00;";

pub struct Harness {
    pub dir: TempDir,
    pub server: MockServer,
    pub target: Arc<MemoryTargetStore>,
    pub settings: Settings,
}

impl Harness {
    /// Legacy database from `sql` and a media server answering image keys.
    pub async fn new(sql: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let conn = Connection::open(dir.path().join("legacy.db")).unwrap();
        conn.execute_batch(sql).unwrap();

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/img/.*$"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/gif")
                    .set_body_bytes(GIF.to_vec()),
            )
            .mount(&server)
            .await;

        let mut settings = Settings::with_cache_dir(dir.path().join("cache"));
        settings.media.base_url = Some(server.uri());
        settings.media.retries = 1;
        settings.media.normalize_images = false;

        Self {
            dir,
            server,
            target: Arc::new(MemoryTargetStore::new()),
            settings,
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.dir.path().join("legacy.db")
    }

    pub fn id_map_path(&self) -> PathBuf {
        self.dir.path().join("id-map.json")
    }

    /// Orchestrator over the fixture database, persisting ID maps as JSON.
    pub fn orchestrator(&self) -> Orchestrator {
        self.orchestrator_with(self.settings.clone())
    }

    pub fn orchestrator_with(&self, settings: Settings) -> Orchestrator {
        Orchestrator::new(
            Arc::new(SqliteSource::new(&self.db_path())),
            self.target.clone(),
            Arc::new(settings),
        )
        .with_id_store(Arc::new(JsonFileStore::new(&self.id_map_path())))
    }
}

pub fn exists(path: &Path) -> bool {
    path.is_file()
}
