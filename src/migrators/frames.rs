//! Pose frames shown along a meditation's timeline.
//!
//! A legacy frame carries one image per narrator gender. When the two images
//! differ the frame becomes two target documents, one per variant; when they
//! are the same (or only one exists) both variant keys share one document.

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use super::music::slug_rule;
use super::{run_rows, upsert, MigrationContext, Migrator, PendingWrite, RowMigrator, ID_COLUMN};
use crate::config::Gender;
use crate::error::MigrateError;
use crate::idmap::{IdMap, Phase};
use crate::mapping::{CollectionMapping, MappedRow};
use crate::media::{MediaMetadata, MediaTransfer};
use crate::models::{MigrationResult, RowError, SourceRow, WriteOutcome};
use crate::target::Filter;
use crate::utils::slugify;
use crate::validation::{FieldType, ValidationRule, Validator};

pub const FRAMES_COLLECTION: &str = "frames";

const MALE_IMAGE_FIELD: &str = "maleImage";
const FEMALE_IMAGE_FIELD: &str = "femaleImage";

/// Constrained frame category in the target schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameCategory {
    Sitting,
    Standing,
    Lying,
    Walking,
    Breathing,
    Other,
}

impl FrameCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameCategory::Sitting => "sitting",
            FrameCategory::Standing => "standing",
            FrameCategory::Lying => "lying",
            FrameCategory::Walking => "walking",
            FrameCategory::Breathing => "breathing",
            FrameCategory::Other => "other",
        }
    }

    /// Map free-text legacy categories onto the fixed set.
    pub fn lookup(text: &str) -> Option<Self> {
        let category = match slugify(text).as_str() {
            "sitting" | "seated" | "sit" | "cross-legged" | "lotus" | "chair" => {
                FrameCategory::Sitting
            }
            "standing" | "stand" | "upright" => FrameCategory::Standing,
            "lying" | "lying-down" | "laying" | "supine" | "reclining" | "sleep" => {
                FrameCategory::Lying
            }
            "walking" | "walk" | "movement" | "moving" => FrameCategory::Walking,
            "breathing" | "breath" | "breathwork" | "pranayama" => FrameCategory::Breathing,
            "other" | "misc" => FrameCategory::Other,
            _ => return None,
        };
        Some(category)
    }
}

impl fmt::Display for FrameCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ID-map key for one gendered variant of a legacy frame.
pub fn frame_key(legacy_id: i64, gender: Gender) -> String {
    format!("{}_{}", legacy_id, gender.as_str())
}

pub struct FramesMigrator<'a> {
    ctx: &'a MigrationContext,
    mapping: CollectionMapping,
    validator: Validator,
    frames: &'a mut IdMap,
    media_map: &'a mut IdMap,
    media: &'a mut MediaTransfer,
}

impl<'a> FramesMigrator<'a> {
    pub fn new(
        ctx: &'a MigrationContext,
        frames: &'a mut IdMap,
        media_map: &'a mut IdMap,
        media: &'a mut MediaTransfer,
    ) -> Self {
        let validator = Validator::new(vec![
            ValidationRule::field("name")
                .required()
                .of_type(FieldType::String)
                .max_length(255),
            slug_rule(),
            ValidationRule::field("category").required().of_type(FieldType::String),
            ValidationRule::field("tags").of_type(FieldType::Array),
        ]);
        Self {
            ctx,
            mapping: ctx.mappings.resolve(FRAMES_COLLECTION),
            validator,
            frames,
            media_map,
            media,
        }
    }

    fn image_keys(mapped: &MappedRow) -> (Option<String>, Option<String>) {
        let key = |field: &str| {
            mapped
                .relation(field)
                .and_then(|r| r.keys.first())
                .cloned()
        };
        (key(MALE_IMAGE_FIELD), key(FEMALE_IMAGE_FIELD))
    }

    async fn upload_image(&mut self, key: Option<&str>, alt: &str) -> Value {
        let Some(key) = key else {
            return Value::Null;
        };
        let collection = self.media.collection().to_string();
        match self
            .media
            .transfer(self.media_map, key, &collection, &MediaMetadata::alt(alt))
            .await
        {
            Some(media) => Value::String(media.id),
            None => Value::Null,
        }
    }
}

#[async_trait]
impl RowMigrator for FramesMigrator<'_> {
    fn source_table(&self) -> &str {
        &self.mapping.source_table
    }

    fn target_collection(&self) -> &str {
        FRAMES_COLLECTION
    }

    fn context(&self) -> &MigrationContext {
        self.ctx
    }

    fn validator(&self) -> &Validator {
        &self.validator
    }

    async fn before_batch(&mut self, rows: &[SourceRow]) {
        let keys: Vec<String> = rows
            .iter()
            .flat_map(|row| {
                let (male, female) = Self::image_keys(&self.mapping.apply(row));
                male.into_iter().chain(female)
            })
            .filter(|key| !self.media_map.contains(&self.media.destination_filename(key)))
            .collect();
        self.media.prefetch(&keys).await;
    }

    async fn transform_row(
        &mut self,
        row: &SourceRow,
        _index: usize,
    ) -> Result<Vec<PendingWrite>, RowError> {
        let id = row.require_integer(ID_COLUMN)?;
        let mapped = self.mapping.apply(row);
        let (male, female) = Self::image_keys(&mapped);
        let mut base = mapped.fields;
        for relation in &mapped.relations {
            if relation.field != MALE_IMAGE_FIELD && relation.field != FEMALE_IMAGE_FIELD {
                warn!(
                    "frame {}: no resolver for relation {} -> {}, dropping it",
                    id, relation.field, relation.collection
                );
            }
        }

        let name = base
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let slug = slugify(&name);

        let raw_category = base
            .get("category")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let category = FrameCategory::lookup(&raw_category).unwrap_or_else(|| {
            warn!(
                "frame {}: unknown category {:?}, using {}",
                id,
                raw_category,
                FrameCategory::Other
            );
            FrameCategory::Other
        });
        base.insert("category".into(), Value::String(category.as_str().to_string()));
        if base.get("tags").map_or(false, Value::is_null) {
            base.insert("tags".into(), Value::Array(Vec::new()));
        }

        let split = match (&male, &female) {
            (Some(m), Some(f)) => m != f,
            _ => false,
        };

        if split {
            let mut writes = Vec::with_capacity(2);
            for (gender, key) in [(Gender::Male, &male), (Gender::Female, &female)] {
                let variant_slug = format!("{}-{}", slug, gender.as_str());
                let alt = format!("{} ({})", name, gender.as_str());
                let image = self.upload_image(key.as_deref(), &alt).await;

                let mut record = base.clone();
                record.insert("slug".into(), Value::String(variant_slug.clone()));
                record.insert("gender".into(), Value::String(gender.as_str().to_string()));
                record.insert("image".into(), image);
                writes.push(
                    PendingWrite::new(FRAMES_COLLECTION, Filter::eq("slug", variant_slug), record)
                        .key(frame_key(id, gender)),
                );
            }
            return Ok(writes);
        }

        let image = self
            .upload_image(male.as_deref().or(female.as_deref()), &name)
            .await;
        let mut record = base;
        record.insert("slug".into(), Value::String(slug.clone()));
        record.insert("gender".into(), Value::Null);
        record.insert("image".into(), image);
        Ok(vec![PendingWrite::new(FRAMES_COLLECTION, Filter::eq("slug", slug), record)
            .key(frame_key(id, Gender::Male))
            .key(frame_key(id, Gender::Female))])
    }

    async fn write(&mut self, write: PendingWrite) -> Result<WriteOutcome, RowError> {
        upsert(self.ctx, self.frames, None, write).await
    }
}

#[async_trait]
impl Migrator for FramesMigrator<'_> {
    fn phase(&self) -> Phase {
        Phase::Frames
    }

    fn target_collection(&self) -> &str {
        FRAMES_COLLECTION
    }

    async fn migrate(&mut self) -> Result<MigrationResult, MigrateError> {
        run_rows(self).await
    }
}
