//! Background music tracks.

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use super::tags::resolve_tags;
use super::{run_rows, upsert, MigrationContext, Migrator, PendingWrite, RowMigrator, ID_COLUMN};
use crate::error::MigrateError;
use crate::idmap::{IdMap, Phase};
use crate::mapping::CollectionMapping;
use crate::media::MediaTransfer;
use crate::models::{MigrationResult, RowError, SourceRow, WriteOutcome};
use crate::target::Filter;
use crate::utils::slugify;
use crate::validation::{FieldType, ValidationRule, Validator};

pub const MUSIC_COLLECTION: &str = "music";

pub(crate) fn slug_rule() -> ValidationRule {
    let pattern = Regex::new(r"^[a-z0-9]+(-[a-z0-9]+)*$").ok();
    let rule = ValidationRule::field("slug").required().of_type(FieldType::String);
    match pattern {
        Some(p) => rule.pattern(p),
        None => rule,
    }
}

/// Migrates legacy music rows with their audio files.
pub struct MusicMigrator<'a> {
    ctx: &'a MigrationContext,
    mapping: CollectionMapping,
    validator: Validator,
    music: &'a mut IdMap,
    music_tags: &'a IdMap,
    media: &'a mut MediaTransfer,
}

impl<'a> MusicMigrator<'a> {
    pub fn new(
        ctx: &'a MigrationContext,
        music: &'a mut IdMap,
        music_tags: &'a IdMap,
        media: &'a mut MediaTransfer,
    ) -> Self {
        let validator = Validator::new(vec![
            ValidationRule::field("title")
                .required()
                .of_type(FieldType::String)
                .max_length(255),
            slug_rule(),
            ValidationRule::field("duration")
                .of_type(FieldType::Number)
                .min(0.0),
        ]);
        Self {
            ctx,
            mapping: ctx.mappings.resolve(MUSIC_COLLECTION),
            validator,
            music,
            music_tags,
            media,
        }
    }
}

#[async_trait]
impl RowMigrator for MusicMigrator<'_> {
    fn source_table(&self) -> &str {
        &self.mapping.source_table
    }

    fn target_collection(&self) -> &str {
        MUSIC_COLLECTION
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
            .filter(|row| {
                row.integer(ID_COLUMN)
                    .map_or(true, |id| !self.music.contains(&id.to_string()))
            })
            .filter_map(|row| self.mapping.apply(row).attachment)
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
        let mut record = mapped.fields;

        let title = record
            .get("title")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_default();
        let slug = slugify(&title);
        record.insert("slug".into(), Value::String(slug.clone()));

        for relation in &mapped.relations {
            match relation.collection.as_str() {
                "music-tags" => {
                    let tags = resolve_tags(self.music_tags, &relation.keys, &format!("music {}", id));
                    record.insert(relation.field.clone(), Value::Array(tags));
                }
                other => warn!(
                    "music {}: no resolver for relation {} -> {}, dropping it",
                    id, relation.field, other
                ),
            }
        }

        Ok(vec![PendingWrite::new(MUSIC_COLLECTION, Filter::eq("slug", slug), record)
            .key(id.to_string())
            .with_attachment(mapped.attachment)])
    }

    async fn write(&mut self, write: PendingWrite) -> Result<WriteOutcome, RowError> {
        upsert(self.ctx, self.music, Some(&mut *self.media), write).await
    }
}

#[async_trait]
impl Migrator for MusicMigrator<'_> {
    fn phase(&self) -> Phase {
        Phase::Music
    }

    fn target_collection(&self) -> &str {
        MUSIC_COLLECTION
    }

    async fn migrate(&mut self) -> Result<MigrationResult, MigrateError> {
        run_rows(self).await
    }
}
