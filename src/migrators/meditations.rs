//! Meditations, the composite records that reference everything else.
//!
//! A meditation resolves its narrator index, its tags, its ordered keyframes
//! (through the frame variant matching the narrator's gender), an optional
//! thumbnail with placeholder fallback, and its background music. Unresolved
//! references degrade with a warning instead of failing the row.

use std::cmp::Ordering;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::frames::frame_key;
use super::music::slug_rule;
use super::tags::resolve_tags;
use super::{run_rows, upsert, MigrationContext, Migrator, PendingWrite, RowMigrator, ID_COLUMN};
use crate::config::Gender;
use crate::error::MigrateError;
use crate::idmap::{IdMap, Phase};
use crate::mapping::{CollectionMapping, MappedRow};
use crate::media::{MediaMetadata, MediaTransfer};
use crate::models::{FromSourceRow, MigrationResult, RowError, SourceRow, SqlValue, WriteOutcome};
use crate::source::SourceQuery;
use crate::target::Filter;
use crate::utils::slugify;
use crate::validation::{FieldType, ValidationRule, Validator};

pub const MEDITATIONS_COLLECTION: &str = "meditations";
pub const KEYFRAMES_TABLE: &str = "keyframes";

/// One row of the legacy keyframe join table.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyKeyframe {
    pub meditation_id: i64,
    pub frame_id: i64,
    /// Seconds from the start of the audio.
    pub timestamp: f64,
}

impl FromSourceRow for LegacyKeyframe {
    fn from_row(row: &SourceRow) -> Result<Self, RowError> {
        Ok(Self {
            meditation_id: row.require_integer("meditation_id")?,
            frame_id: row.require_integer("frame_id")?,
            timestamp: row
                .real("timestamp")
                .ok_or_else(|| RowError::field("timestamp", "missing or non-numeric value"))?,
        })
    }
}

/// A keyframe pointing at a target frame document.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedKeyframe {
    pub frame: String,
    pub timestamp: f64,
}

impl ResolvedKeyframe {
    fn to_json(&self) -> Value {
        json!({ "frame": self.frame, "timestamp": self.timestamp })
    }
}

/// Order keyframes by timestamp and resolve their frames.
///
/// The sort is stable, so rows sharing a timestamp keep source order.
/// Keyframes with an invalid timestamp or an unresolvable frame are dropped.
/// Of the remaining keyframes, the first at each timestamp wins.
pub fn normalize_keyframes<F>(mut keyframes: Vec<LegacyKeyframe>, resolve: F) -> Vec<ResolvedKeyframe>
where
    F: Fn(i64) -> Option<String>,
{
    keyframes.retain(|k| {
        let valid = k.timestamp.is_finite() && k.timestamp >= 0.0;
        if !valid {
            warn!(
                "meditation {}: keyframe for frame {} has invalid timestamp {}, dropping it",
                k.meditation_id, k.frame_id, k.timestamp
            );
        }
        valid
    });
    keyframes.sort_by(|a, b| a.timestamp.partial_cmp(&b.timestamp).unwrap_or(Ordering::Equal));

    let mut resolved: Vec<ResolvedKeyframe> = Vec::with_capacity(keyframes.len());
    for keyframe in keyframes {
        let Some(frame) = resolve(keyframe.frame_id) else {
            warn!(
                "meditation {}: frame {} at {}s did not resolve, dropping keyframe",
                keyframe.meditation_id, keyframe.frame_id, keyframe.timestamp
            );
            continue;
        };
        if let Some(last) = resolved.last() {
            if last.timestamp == keyframe.timestamp {
                if last.frame != frame {
                    warn!(
                        "meditation {}: two frames at {}s, keeping the first",
                        keyframe.meditation_id, keyframe.timestamp
                    );
                }
                continue;
            }
        }
        resolved.push(ResolvedKeyframe {
            frame,
            timestamp: keyframe.timestamp,
        });
    }
    resolved
}

/// Read-only ID maps a meditation resolves against.
#[derive(Clone, Copy)]
pub struct MeditationLookups<'a> {
    pub narrators: &'a IdMap,
    pub tags: &'a IdMap,
    pub frames: &'a IdMap,
    pub music: &'a IdMap,
}

pub struct MeditationsMigrator<'a> {
    ctx: &'a MigrationContext,
    mapping: CollectionMapping,
    validator: Validator,
    meditations: &'a mut IdMap,
    lookups: MeditationLookups<'a>,
    media_map: &'a mut IdMap,
    media: &'a mut MediaTransfer,
    keyframes_available: Option<bool>,
}

impl<'a> MeditationsMigrator<'a> {
    pub fn new(
        ctx: &'a MigrationContext,
        meditations: &'a mut IdMap,
        lookups: MeditationLookups<'a>,
        media_map: &'a mut IdMap,
        media: &'a mut MediaTransfer,
    ) -> Self {
        let mut duration = ValidationRule::field("duration")
            .of_type(FieldType::Number)
            .min(0.0);
        if let Some(max) = ctx.settings.media.max_duration_secs {
            duration = duration.max(max);
        }
        let validator = Validator::new(vec![
            ValidationRule::field("title")
                .required()
                .of_type(FieldType::String)
                .max_length(255),
            slug_rule(),
            duration,
            ValidationRule::field("narrator").required(),
            ValidationRule::field("frames")
                .of_type(FieldType::Array)
                .custom(|value, _| ascending_timestamps(value)),
        ]);
        Self {
            ctx,
            mapping: ctx.mappings.resolve(MEDITATIONS_COLLECTION),
            validator,
            meditations,
            lookups,
            media_map,
            media,
            keyframes_available: None,
        }
    }

    /// Target narrator id and the gender used to pick frame variants.
    fn resolve_narrator(&self, id: i64, mapped: &MappedRow) -> (Value, Gender) {
        let settings = &self.ctx.settings;
        let legacy = mapped
            .relation("narrator")
            .and_then(|r| r.keys.first())
            .and_then(|k| k.parse::<i64>().ok());

        let index = match legacy {
            Some(index) if self.lookups.narrators.contains(&index.to_string()) => index,
            other => {
                warn!(
                    "meditation {}: narrator {:?} did not resolve, using default narrator {}",
                    id, other, settings.default_narrator
                );
                settings.default_narrator
            }
        };
        let gender = settings.narrator_gender(index).unwrap_or(Gender::Male);
        let target = self
            .lookups
            .narrators
            .get(&index.to_string())
            .map(|s| Value::String(s.to_string()))
            .unwrap_or(Value::Null);
        (target, gender)
    }

    async fn keyframes(&mut self, id: i64, gender: Gender) -> Result<Vec<ResolvedKeyframe>, RowError> {
        let source = self.ctx.source.clone();
        let available = match self.keyframes_available {
            Some(available) => available,
            None => {
                let available = source.table_exists(KEYFRAMES_TABLE).await?;
                if !available {
                    debug!("No {} table, meditations get no frames", KEYFRAMES_TABLE);
                }
                self.keyframes_available = Some(available);
                available
            }
        };
        if !available {
            return Ok(Vec::new());
        }

        let query = SourceQuery::new()
            .filter("meditation_id", SqlValue::Integer(id))
            .order_by(ID_COLUMN);
        let rows = source.fetch(KEYFRAMES_TABLE, &query).await?;
        let keyframes = rows
            .iter()
            .map(LegacyKeyframe::from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let frames = self.lookups.frames;
        Ok(normalize_keyframes(keyframes, |frame_id| {
            frames.get(&frame_key(frame_id, gender)).map(str::to_string)
        }))
    }

    /// Own thumbnail, else the placeholder chosen by the record's tags.
    async fn thumbnail(&mut self, id: i64, mapped: &MappedRow, tag_names: &[String], alt: &str) -> Value {
        let collection = self.media.collection().to_string();
        let metadata = MediaMetadata::alt(alt);

        if let Some(key) = mapped.relation("thumbnail").and_then(|r| r.keys.first()) {
            if let Some(media) = self.media.transfer(self.media_map, key, &collection, &metadata).await {
                return Value::String(media.id);
            }
        }

        let Some(placeholder) = self.ctx.settings.placeholders.select(tag_names) else {
            return Value::Null;
        };
        debug!("meditation {}: using placeholder thumbnail {}", id, placeholder);
        match self
            .media
            .transfer(self.media_map, placeholder, &collection, &MediaMetadata::alt("Placeholder"))
            .await
        {
            Some(media) => Value::String(media.id),
            None => Value::Null,
        }
    }

    fn resolve_music(&self, id: i64, mapped: &MappedRow) -> Value {
        let Some(key) = mapped.relation("music").and_then(|r| r.keys.first()) else {
            return Value::Null;
        };
        match self.lookups.music.get(key) {
            Some(target) => Value::String(target.to_string()),
            None => {
                warn!("meditation {}: music {} did not resolve, leaving it empty", id, key);
                Value::Null
            }
        }
    }
}

fn ascending_timestamps(value: &Value) -> Option<String> {
    let stamps: Vec<f64> = value
        .as_array()?
        .iter()
        .filter_map(|k| k.get("timestamp").and_then(Value::as_f64))
        .collect();
    stamps
        .windows(2)
        .any(|w| w[0] >= w[1])
        .then(|| "frames must have strictly increasing timestamps".to_string())
}

#[async_trait]
impl RowMigrator for MeditationsMigrator<'_> {
    fn source_table(&self) -> &str {
        &self.mapping.source_table
    }

    fn target_collection(&self) -> &str {
        MEDITATIONS_COLLECTION
    }

    fn context(&self) -> &MigrationContext {
        self.ctx
    }

    fn validator(&self) -> &Validator {
        &self.validator
    }

    async fn before_batch(&mut self, rows: &[SourceRow]) {
        let mut keys = Vec::new();
        for row in rows {
            let mapped = self.mapping.apply(row);
            if let Some(thumb) = mapped.relation("thumbnail").and_then(|r| r.keys.first()) {
                if !self.media_map.contains(&self.media.destination_filename(thumb)) {
                    keys.push(thumb.clone());
                }
            }
            let mapped_already = row
                .integer(ID_COLUMN)
                .map_or(false, |id| self.meditations.contains(&id.to_string()));
            if !mapped_already {
                keys.extend(mapped.attachment);
            }
        }
        self.media.prefetch(&keys).await;
    }

    async fn transform_row(
        &mut self,
        row: &SourceRow,
        _index: usize,
    ) -> Result<Vec<PendingWrite>, RowError> {
        let id = row.require_integer(ID_COLUMN)?;
        let mapped = self.mapping.apply(row);
        let mut record = mapped.fields.clone();

        let title = record
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let slug = slugify(&title);
        record.insert("slug".into(), Value::String(slug.clone()));

        let (narrator, gender) = self.resolve_narrator(id, &mapped);
        record.insert("narrator".into(), narrator);

        let tag_names: Vec<String> = mapped
            .relation("tags")
            .map(|r| r.keys.clone())
            .unwrap_or_default();
        let tags = resolve_tags(self.lookups.tags, &tag_names, &format!("meditation {}", id));
        record.insert("tags".into(), Value::Array(tags));

        let keyframes = self.keyframes(id, gender).await?;
        record.insert(
            "frames".into(),
            Value::Array(keyframes.iter().map(ResolvedKeyframe::to_json).collect()),
        );

        let thumbnail = self.thumbnail(id, &mapped, &tag_names, &title).await;
        record.insert("thumbnail".into(), thumbnail);
        record.insert("music".into(), self.resolve_music(id, &mapped));

        for relation in &mapped.relations {
            if !matches!(relation.field.as_str(), "narrator" | "tags" | "thumbnail" | "music") {
                warn!(
                    "meditation {}: no resolver for relation {} -> {}, dropping it",
                    id, relation.field, relation.collection
                );
            }
        }

        let natural_key = Filter::eq("slug", slug.as_str()).and(
            "duration",
            record.get("duration").cloned().unwrap_or(Value::Null),
        );
        Ok(vec![PendingWrite::new(MEDITATIONS_COLLECTION, natural_key, record)
            .key(id.to_string())
            .with_attachment(mapped.attachment)])
    }

    async fn write(&mut self, write: PendingWrite) -> Result<WriteOutcome, RowError> {
        upsert(self.ctx, self.meditations, Some(&mut *self.media), write).await
    }
}

#[async_trait]
impl Migrator for MeditationsMigrator<'_> {
    fn phase(&self) -> Phase {
        Phase::Meditations
    }

    fn target_collection(&self) -> &str {
        MEDITATIONS_COLLECTION
    }

    async fn migrate(&mut self) -> Result<MigrationResult, MigrateError> {
        run_rows(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Settings, TaggedPlaceholder};
    use crate::migrators::test_support;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn kf(frame_id: i64, timestamp: f64) -> LegacyKeyframe {
        LegacyKeyframe {
            meditation_id: 1,
            frame_id,
            timestamp,
        }
    }

    fn resolver(frame_id: i64) -> Option<String> {
        (frame_id != 99).then(|| format!("f{}", frame_id))
    }

    #[test]
    fn test_keyframes_sorted_and_deduplicated() {
        let resolved = normalize_keyframes(
            vec![kf(3, 30.0), kf(1, 0.0), kf(2, 10.0), kf(4, 10.0), kf(2, 10.0), kf(5, -1.0)],
            resolver,
        );
        let pairs: Vec<(&str, f64)> = resolved
            .iter()
            .map(|k| (k.frame.as_str(), k.timestamp))
            .collect();
        assert_eq!(pairs, vec![("f1", 0.0), ("f2", 10.0), ("f3", 30.0)]);
        assert!(resolved.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn test_unresolved_frames_are_dropped_not_fatal() {
        let resolved = normalize_keyframes(vec![kf(99, 5.0), kf(7, 5.0), kf(99, 9.0)], resolver);
        assert_eq!(
            resolved,
            vec![ResolvedKeyframe {
                frame: "f7".into(),
                timestamp: 5.0
            }]
        );
    }

    #[test]
    fn test_ascending_timestamp_check() {
        assert!(ascending_timestamps(&json!([{"timestamp": 1}, {"timestamp": 2}])).is_none());
        assert!(ascending_timestamps(&json!([{"timestamp": 2}, {"timestamp": 2}])).is_some());
    }

    #[test]
    fn test_keyframe_decoding_failure() {
        let row = SourceRow::new()
            .with("meditation_id", SqlValue::Integer(1))
            .with("frame_id", SqlValue::Integer(2));
        let err = LegacyKeyframe::from_row(&row).unwrap_err();
        assert_eq!(err.field.as_deref(), Some("timestamp"));
    }

    const SQL: &str = "
        CREATE TABLE meditations (id INTEGER PRIMARY KEY, title TEXT, description TEXT,
            duration TEXT, narrator INTEGER, tags TEXT, thumbnail TEXT, audio_file TEXT,
            music_id INTEGER, published INTEGER);
        CREATE TABLE keyframes (id INTEGER PRIMARY KEY, meditation_id INTEGER, frame_id INTEGER,
            timestamp REAL);
        INSERT INTO meditations VALUES
            (1, 'Body Scan', 'Relax', '600', 1, 'sleep, calm', NULL, NULL, 5, 1),
            (2, 'Morning', NULL, '300', 7, NULL, NULL, NULL, 42, 0);
        INSERT INTO keyframes VALUES
            (1, 1, 10, 60.0), (2, 1, 11, 0.0), (3, 1, 12, 60.0), (4, 1, 13, 30.0);
    ";

    #[tokio::test]
    async fn test_resolves_references_and_falls_back() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/placeholders/sleep.gif"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/gif")
                    .set_body_bytes(b"GIF89a\x01\x00\x01\x00\x00\x00\x00;".to_vec()),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::with_cache_dir(dir.path().to_path_buf());
        settings.media.base_url = Some(server.uri());
        settings.placeholders.by_tag.push(TaggedPlaceholder {
            tag: "Sleep".into(),
            key: "placeholders/sleep.gif".into(),
        });
        let (ctx, target) = test_support::context(dir.path(), SQL, settings);
        let mut media = test_support::media(&ctx);

        let narrators: IdMap = [("0", "n-male"), ("1", "n-female")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let tags: IdMap = [("sleep".to_string(), "t-sleep".to_string())].into_iter().collect();
        let frames: IdMap = [
            ("10_female", "fr10f"),
            ("11_female", "fr11f"),
            ("12_female", "fr12f"),
            ("10_male", "fr10m"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let music: IdMap = [("5".to_string(), "mu5".to_string())].into_iter().collect();
        let lookups = MeditationLookups {
            narrators: &narrators,
            tags: &tags,
            frames: &frames,
            music: &music,
        };
        let mut meditations = IdMap::new();
        let mut media_map = IdMap::new();

        let result = MeditationsMigrator::new(&ctx, &mut meditations, lookups, &mut media_map, &mut media)
            .migrate()
            .await
            .unwrap();
        assert_eq!(result.failed, 0, "{:?}", result.errors);
        assert_eq!(result.created, 2);

        let docs = target.documents(MEDITATIONS_COLLECTION);
        let scan = docs.iter().find(|d| d.get_str("slug") == Some("body-scan")).unwrap();
        assert_eq!(scan.get_str("narrator"), Some("n-female"));
        assert_eq!(scan.fields["tags"], json!(["t-sleep"]));
        assert_eq!(
            scan.fields["frames"],
            json!([
                {"frame": "fr11f", "timestamp": 0.0},
                {"frame": "fr10f", "timestamp": 60.0}
            ])
        );
        assert_eq!(scan.get_str("music"), Some("mu5"));
        assert!(scan.get_str("thumbnail").is_some());
        assert_eq!(scan.fields["published"], json!(true));

        let morning = docs.iter().find(|d| d.get_str("slug") == Some("morning")).unwrap();
        assert_eq!(morning.get_str("narrator"), Some("n-male"));
        assert_eq!(morning.fields["music"], Value::Null);
        assert_eq!(morning.fields["thumbnail"], Value::Null);
        assert_eq!(morning.fields["frames"], json!([]));
    }
}
