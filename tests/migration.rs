//! End-to-end runs against a fixture database and an in-memory target.

mod common;

use cmsport::config::TaggedPlaceholder;
use cmsport::idmap::{IdMapStore, JsonFileStore, Phase};
use cmsport::mapping::CollectionMappings;
use cmsport::orchestrator::{MigrateOptions, RunOutcome};
use cmsport::report::RunStatus;
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use common::{Harness, GIF, LEGACY_SQL};

fn result<'a>(
    summary: &'a cmsport::models::MigrationSummary,
    collection: &str,
) -> &'a cmsport::models::MigrationResult {
    summary
        .results
        .iter()
        .find(|r| r.collection == collection)
        .unwrap_or_else(|| panic!("no result for {}", collection))
}

#[tokio::test]
async fn test_full_run_then_rerun_creates_nothing() {
    let h = Harness::new(LEGACY_SQL).await;
    let options = MigrateOptions::default();

    let first = h.orchestrator().run(&options).await.unwrap();
    let RunOutcome::Migrated(first) = first else {
        panic!("expected a migration");
    };
    assert_eq!(first.total_failed(), 0, "{:#?}", first.results);
    assert_eq!(RunStatus::classify(&first), RunStatus::Success);

    assert_eq!(h.target.count("meditation-tags"), 3);
    assert_eq!(h.target.count("music-tags"), 1);
    assert_eq!(h.target.count("narrators"), 2);
    assert_eq!(h.target.count("frames"), 3);
    assert_eq!(h.target.count("music"), 2);
    assert_eq!(h.target.count("meditations"), 3);
    assert_eq!(h.target.count("media"), 3);

    let creates = h.target.create_calls();
    let second = h.orchestrator().run(&options).await.unwrap();
    let RunOutcome::Migrated(second) = second else {
        panic!("expected a migration");
    };
    assert_eq!(h.target.create_calls(), creates);
    assert_eq!(h.target.update_calls(), 0);
    for r in &second.results {
        assert_eq!(r.created, 0, "{} created on rerun", r.collection);
        assert_eq!(r.failed, 0);
    }
    assert_eq!(result(&second, "meditations").existing, 3);
    assert_eq!(h.target.count("meditations"), 3);
}

#[tokio::test]
async fn test_meditation_references_resolve() {
    let h = Harness::new(LEGACY_SQL).await;
    h.orchestrator().run(&MigrateOptions::default()).await.unwrap();

    let narrators = h.target.documents("narrators");
    let female = narrators
        .iter()
        .find(|d| d.get_str("gender") == Some("female"))
        .unwrap();
    let music = h.target.documents("music");
    let rain = music.iter().find(|d| d.get_str("slug") == Some("rain")).unwrap();

    let meditations = h.target.documents("meditations");
    let scan = meditations
        .iter()
        .find(|d| d.get_str("slug") == Some("body-scan"))
        .unwrap();
    assert_eq!(scan.get_str("narrator"), Some(female.id.as_str()));
    assert_eq!(scan.get_str("music"), Some(rain.id.as_str()));
    assert_eq!(scan.fields["tags"].as_array().unwrap().len(), 2);

    // Female narrator picks the female variant of the split frame.
    let frames = h.target.documents("frames");
    let lying_female = frames
        .iter()
        .find(|d| d.get_str("slug") == Some("lying-down-female"))
        .unwrap();
    let ids: Vec<&str> = scan.fields["frames"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|k| k["frame"].as_str())
        .collect();
    assert_eq!(ids.len(), 3);
    assert_eq!(ids[1], lying_female.id);
}

#[tokio::test]
async fn test_keyframe_timestamps_ascend() {
    let h = Harness::new(LEGACY_SQL).await;
    h.orchestrator().run(&MigrateOptions::default()).await.unwrap();

    for doc in h.target.documents("meditations") {
        let stamps: Vec<f64> = doc.fields["frames"]
            .as_array()
            .unwrap()
            .iter()
            .map(|k| k["timestamp"].as_f64().unwrap())
            .collect();
        assert!(
            stamps.windows(2).all(|w| w[0] < w[1]),
            "{:?} in {:?}",
            stamps,
            doc.get_str("slug")
        );
    }
    let wind_down = h
        .target
        .documents("meditations")
        .into_iter()
        .find(|d| d.get_str("slug") == Some("evening-wind-down"))
        .unwrap();
    // The keyframe pointing at a frame that never existed is dropped.
    assert_eq!(wind_down.fields["frames"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_shared_placeholder_uploaded_once() {
    let mut h = Harness::new(LEGACY_SQL).await;
    Mock::given(method("GET"))
        .and(path("/placeholders/sleep.gif"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/gif")
                .set_body_bytes(GIF.to_vec()),
        )
        .expect(1)
        .mount(&h.server)
        .await;
    h.settings.placeholders.by_tag.push(TaggedPlaceholder {
        tag: "sleep".into(),
        key: "placeholders/sleep.gif".into(),
    });

    h.orchestrator().run(&MigrateOptions::default()).await.unwrap();

    let meditations = h.target.documents("meditations");
    let thumbs: Vec<&str> = meditations
        .iter()
        .filter_map(|d| d.get_str("thumbnail"))
        .collect();
    assert_eq!(thumbs.len(), 2);
    assert_eq!(thumbs[0], thumbs[1]);
    assert_eq!(h.target.count("media"), 4);
}

#[tokio::test]
async fn test_missing_media_does_not_fail_the_record() {
    let sql = "
        CREATE TABLE musics (id INTEGER PRIMARY KEY, title TEXT, duration TEXT, tags TEXT,
            audio_file TEXT, credit TEXT);
        INSERT INTO musics VALUES (1, 'Gone', '60', NULL, 'audio/missing.mp3', NULL);
    ";
    let h = Harness::new(sql).await;
    let options = MigrateOptions {
        tables: vec!["music".into()],
        ..Default::default()
    };
    let RunOutcome::Migrated(summary) = h.orchestrator().run(&options).await.unwrap() else {
        panic!("expected a migration");
    };

    let music = result(&summary, "music");
    assert_eq!(music.created, 1);
    assert_eq!(music.failed, 0);
    assert_eq!(summary.media.failed, 1);
    assert_eq!(h.target.upload_calls(), 0);
}

#[tokio::test]
async fn test_invalid_rows_are_never_written() {
    let sql = "
        CREATE TABLE meditations (id INTEGER PRIMARY KEY, title TEXT, description TEXT,
            duration TEXT, narrator INTEGER, tags TEXT, thumbnail TEXT, audio_file TEXT,
            music_id INTEGER, published INTEGER);
        INSERT INTO meditations VALUES
            (1, '   ', NULL, '60', 0, NULL, NULL, NULL, NULL, 1),
            (2, 'Fine', NULL, '60', 0, NULL, NULL, NULL, NULL, 1);
    ";
    let h = Harness::new(sql).await;
    let options = MigrateOptions {
        tables: vec!["narrators".into(), "meditations".into()],
        ..Default::default()
    };
    let RunOutcome::Migrated(summary) = h.orchestrator().run(&options).await.unwrap() else {
        panic!("expected a migration");
    };

    let meditations = result(&summary, "meditations");
    assert_eq!(meditations.created, 1);
    assert_eq!(meditations.failed, 1);
    assert_eq!(meditations.errors[0].field.as_deref(), Some("title"));
    assert_eq!(h.target.count("meditations"), 1);
    assert_eq!(RunStatus::classify(&summary), RunStatus::Degraded);
}

#[tokio::test]
async fn test_error_ceiling_aborts_the_collection() {
    let mut sql = String::from(
        "CREATE TABLE meditations (id INTEGER PRIMARY KEY, title TEXT, description TEXT,
            duration TEXT, narrator INTEGER, tags TEXT, thumbnail TEXT, audio_file TEXT,
            music_id INTEGER, published INTEGER);",
    );
    for id in 1..=60 {
        sql.push_str(&format!(
            "INSERT INTO meditations VALUES ({}, '', NULL, '60', 0, NULL, NULL, NULL, NULL, 1);",
            id
        ));
    }
    let mut h = Harness::new(&sql).await;
    h.settings.run.max_errors = 10;
    h.settings.run.batch_size = 4;

    let options = MigrateOptions {
        tables: vec!["meditations".into()],
        ..Default::default()
    };
    let RunOutcome::Migrated(summary) = h.orchestrator().run(&options).await.unwrap() else {
        panic!("expected a migration");
    };

    let meditations = result(&summary, "meditations");
    assert!(meditations.aborted);
    assert_eq!(meditations.failed, 11);
    assert!(meditations.processed < 60);
    assert_eq!(RunStatus::classify(&summary), RunStatus::Failed);

    let snapshot = JsonFileStore::new(&h.id_map_path()).load().unwrap().unwrap();
    assert!(!snapshot.is_completed(Phase::Meditations));
}

#[tokio::test]
async fn test_resume_skips_completed_phases() {
    let h = Harness::new(LEGACY_SQL).await;
    let partial = MigrateOptions {
        tables: vec!["tags,narrators".into()],
        ..Default::default()
    };
    h.orchestrator().run(&partial).await.unwrap();

    let snapshot = JsonFileStore::new(&h.id_map_path()).load().unwrap().unwrap();
    assert!(snapshot.is_completed(Phase::Tags));
    assert!(snapshot.is_completed(Phase::Narrators));
    assert!(!snapshot.is_completed(Phase::Frames));

    let resumed = MigrateOptions {
        resume: true,
        ..Default::default()
    };
    let RunOutcome::Migrated(summary) = h.orchestrator().run(&resumed).await.unwrap() else {
        panic!("expected a migration");
    };
    let collections: Vec<&str> = summary.results.iter().map(|r| r.collection.as_str()).collect();
    assert_eq!(collections, vec!["frames", "music", "meditations"]);
    assert_eq!(summary.total_failed(), 0);

    // Narrator references come from the persisted map of the first run.
    let narrator_ids: Vec<String> = h
        .target
        .documents("narrators")
        .into_iter()
        .map(|d| d.id)
        .collect();
    for doc in h.target.documents("meditations") {
        let narrator = doc.get_str("narrator").unwrap().to_string();
        assert!(narrator_ids.contains(&narrator));
    }
}

#[tokio::test]
async fn test_reset_recreates_selected_collections() {
    let h = Harness::new(LEGACY_SQL).await;
    h.orchestrator().run(&MigrateOptions::default()).await.unwrap();
    let before: Vec<String> = h
        .target
        .documents("music")
        .into_iter()
        .map(|d| d.id)
        .collect();

    let options = MigrateOptions {
        tables: vec!["music".into()],
        reset: true,
        ..Default::default()
    };
    let RunOutcome::Migrated(summary) = h.orchestrator().run(&options).await.unwrap() else {
        panic!("expected a migration");
    };
    assert_eq!(result(&summary, "music").created, 2);
    let after: Vec<String> = h
        .target
        .documents("music")
        .into_iter()
        .map(|d| d.id)
        .collect();
    assert_eq!(after.len(), 2);
    assert!(after.iter().all(|id| !before.contains(id)));
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let h = Harness::new(LEGACY_SQL).await;
    let options = MigrateOptions {
        dry_run: true,
        ..Default::default()
    };
    let RunOutcome::Migrated(summary) = h.orchestrator().run(&options).await.unwrap() else {
        panic!("expected a migration");
    };

    assert!(summary.dry_run);
    assert_eq!(result(&summary, "meditations").created, 3);
    assert_eq!(h.target.create_calls(), 0);
    assert_eq!(h.target.count("meditations"), 0);
    assert!(!common::exists(&h.id_map_path()));
}

#[tokio::test]
async fn test_analyze_only_and_mapping_file_round_trip() {
    let h = Harness::new(LEGACY_SQL).await;
    let mappings_path = h.dir.path().join("mappings.json");
    let options = MigrateOptions {
        analyze_only: true,
        save_mappings: Some(mappings_path.clone()),
        ..Default::default()
    };
    let RunOutcome::Analyzed(schemas) = h.orchestrator().run(&options).await.unwrap() else {
        panic!("expected analysis only");
    };
    let names: Vec<&str> = schemas.iter().map(|s| s.table_name.as_str()).collect();
    assert!(names.contains(&"meditations"));
    assert!(names.contains(&"keyframes"));
    assert_eq!(h.target.create_calls(), 0);

    let saved = CollectionMappings::load_from_file(&mappings_path).unwrap();
    let meditations = saved.get("meditations").unwrap();
    assert_eq!(meditations.source_table, "meditations");
    saved.save_to_file(&mappings_path).unwrap();
    assert_eq!(CollectionMappings::load_from_file(&mappings_path).unwrap(), saved);

    // A run driven by the saved file behaves like one driven by proposals.
    let migrate = MigrateOptions {
        mappings_path: Some(mappings_path),
        ..Default::default()
    };
    let RunOutcome::Migrated(summary) = h.orchestrator().run(&migrate).await.unwrap() else {
        panic!("expected a migration");
    };
    assert_eq!(summary.total_failed(), 0, "{:#?}", summary.results);
    assert_eq!(h.target.count("meditations"), 3);
}

#[tokio::test]
async fn test_duplicate_tags_collapse() {
    let sql = "
        CREATE TABLE meditations (id INTEGER PRIMARY KEY, tags TEXT);
        INSERT INTO meditations VALUES (1, 'Calm, calm , FOCUS'), (2, 'focus'), (3, NULL);
    ";
    let h = Harness::new(sql).await;
    let options = MigrateOptions {
        tables: vec!["tags".into()],
        ..Default::default()
    };
    h.orchestrator().run(&options).await.unwrap();

    let mut slugs: Vec<Value> = h
        .target
        .documents("meditation-tags")
        .into_iter()
        .map(|d| d.fields["slug"].clone())
        .collect();
    slugs.sort_by_key(|v| v.to_string());
    assert_eq!(slugs, vec![json!("calm"), json!("focus")]);
    assert_eq!(h.target.count("music-tags"), 0);
}

#[tokio::test]
async fn test_missing_thumbnail_falls_back_to_placeholder() {
    let sql = "
        CREATE TABLE meditations (id INTEGER PRIMARY KEY, title TEXT, description TEXT,
            duration TEXT, narrator INTEGER, tags TEXT, thumbnail TEXT, audio_file TEXT,
            music_id INTEGER, published INTEGER);
        INSERT INTO meditations VALUES
            (1, 'Lost Cover', NULL, '60', 0, NULL, 'covers/lost.png', NULL, NULL, 1);
    ";
    let mut h = Harness::new(sql).await;
    h.settings.placeholders.default = Some("img/default.png".into());
    let options = MigrateOptions {
        tables: vec!["narrators,meditations".into()],
        ..Default::default()
    };
    let RunOutcome::Migrated(summary) = h.orchestrator().run(&options).await.unwrap() else {
        panic!("expected a migration");
    };

    let meditations = result(&summary, "meditations");
    assert_eq!(meditations.created, 1);
    assert_eq!(meditations.failed, 0);
    assert_eq!(summary.media.failed, 1);
    assert_eq!(RunStatus::classify(&summary), RunStatus::Success);

    let doc = &h.target.documents("meditations")[0];
    let placeholder = &h.target.documents("media")[0];
    assert_eq!(doc.get_str("thumbnail"), Some(placeholder.id.as_str()));
}
