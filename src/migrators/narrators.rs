//! Narrators seeded from configuration.

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use super::{progress_bar, upsert, MigrationContext, Migrator, PendingWrite};
use crate::error::MigrateError;
use crate::idmap::{IdMap, Phase};
use crate::models::{MigrationResult, Record};
use crate::target::Filter;
use crate::utils::slugify;
use crate::validation::{ValidationRule, Validator};

pub const NARRATORS_COLLECTION: &str = "narrators";

/// Creates the configured narrators, keyed by legacy index.
pub struct NarratorsMigrator<'a> {
    ctx: &'a MigrationContext,
    narrators: &'a mut IdMap,
    validator: Validator,
}

impl<'a> NarratorsMigrator<'a> {
    pub fn new(ctx: &'a MigrationContext, narrators: &'a mut IdMap) -> Self {
        Self {
            ctx,
            narrators,
            validator: Validator::new(vec![
                ValidationRule::field("name").required().max_length(200),
                ValidationRule::field("slug").required(),
            ]),
        }
    }
}

#[async_trait]
impl Migrator for NarratorsMigrator<'_> {
    fn phase(&self) -> Phase {
        Phase::Narrators
    }

    fn target_collection(&self) -> &str {
        NARRATORS_COLLECTION
    }

    async fn migrate(&mut self) -> Result<MigrationResult, MigrateError> {
        let ctx = self.ctx;
        let narrators = &ctx.settings.narrators;
        let mut result = MigrationResult::new(NARRATORS_COLLECTION, narrators.len());
        let progress = progress_bar(narrators.len() as u64, NARRATORS_COLLECTION, ctx.show_progress);

        for (row, narrator) in narrators.iter().enumerate() {
            result.processed += 1;
            let slug = slugify(&narrator.name);
            let mut record = Record::new();
            record.insert("name".into(), Value::String(narrator.name.trim().to_string()));
            record.insert("slug".into(), Value::String(slug.clone()));
            record.insert("gender".into(), Value::String(narrator.gender.as_str().to_string()));
            record.insert("legacyIndex".into(), Value::from(narrator.index));

            let errors: Vec<_> = self
                .validator
                .validate(&record, row)
                .into_iter()
                .map(Into::into)
                .collect();
            let outcome = if errors.is_empty() {
                let write = PendingWrite::new(NARRATORS_COLLECTION, Filter::eq("slug", slug), record)
                    .key(narrator.index.to_string());
                upsert(ctx, self.narrators, None, write).await.map_err(|e| vec![e])
            } else {
                Err(errors)
            };

            match outcome {
                Ok(outcome) => result.record(&outcome),
                Err(errors) => {
                    for e in &errors {
                        warn!("Narrator {}: {}", narrator.index, e);
                    }
                    result.fail(row, errors, serde_json::to_value(narrator).ok());
                }
            }
            progress.inc(1);
        }

        progress.finish_and_clear();
        result.finish();
        Ok(result)
    }
}
