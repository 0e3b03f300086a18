//! Tag harvesting and creation.
//!
//! Legacy rows carry tags as comma-separated text. The harvest merges every
//! configured column into one case-insensitive candidate set, then assigns
//! each tag to the taxonomies that actually use it.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{progress_bar, upsert, MigrationContext, Migrator, PendingWrite};
use crate::config::{TagTaxonomy, TagsConfig};
use crate::error::MigrateError;
use crate::idmap::{IdMap, Phase};
use crate::models::{MigrationResult, Record};
use crate::source::{SourceError, SourceQuery, SourceStore};
use crate::target::Filter;
use crate::utils::slugify;

/// A distinct tag and the taxonomies it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagCandidate {
    /// Display name, as first seen in the source.
    pub name: String,
    pub slug: String,
    pub taxonomies: BTreeSet<TagTaxonomy>,
}

/// Gather distinct tags from the configured columns.
///
/// Tags are keyed by slug, so `Calm`, `calm` and ` calm ` are one tag. When
/// the tagging join table exists, a tag listed there is assigned to exactly
/// the taxonomies whose entities use it; other tags keep the taxonomy of the
/// column they were found in.
pub async fn collect_tags(
    source: &dyn SourceStore,
    config: &TagsConfig,
    batch_size: usize,
) -> Result<Vec<TagCandidate>, SourceError> {
    let batch_size = batch_size.max(1);
    let mut candidates: BTreeMap<String, TagCandidate> = BTreeMap::new();

    for tag_source in &config.sources {
        if !source.table_exists(&tag_source.table).await? {
            warn!("Tag source table {} not found, skipping", tag_source.table);
            continue;
        }
        let mut offset = 0;
        loop {
            let rows = source
                .fetch(&tag_source.table, &SourceQuery::new().page(offset, batch_size))
                .await?;
            for row in &rows {
                for name in row.csv(&tag_source.column) {
                    add_candidate(&mut candidates, &name, tag_source.taxonomy);
                }
            }
            offset += rows.len();
            if rows.len() < batch_size {
                break;
            }
        }
        debug!(
            "Harvested {}.{}: {} distinct tags so far",
            tag_source.table,
            tag_source.column,
            candidates.len()
        );
    }

    if let Some(tagging) = &config.tagging {
        if source.table_exists(&tagging.table).await? {
            let mut usage: BTreeMap<String, BTreeSet<TagTaxonomy>> = BTreeMap::new();
            let mut offset = 0;
            loop {
                let rows = source
                    .fetch(&tagging.table, &SourceQuery::new().page(offset, batch_size))
                    .await?;
                for row in &rows {
                    let (Some(tag), Some(kind)) =
                        (row.text(&tagging.tag_column), row.text(&tagging.type_column))
                    else {
                        continue;
                    };
                    let taxonomy = if kind == tagging.meditation_type {
                        TagTaxonomy::Meditation
                    } else if kind == tagging.music_type {
                        TagTaxonomy::Music
                    } else {
                        continue;
                    };
                    let slug = slugify(&tag);
                    if slug.is_empty() {
                        continue;
                    }
                    if !candidates.contains_key(&slug) {
                        add_candidate(&mut candidates, &tag, taxonomy);
                    }
                    usage.entry(slug).or_default().insert(taxonomy);
                }
                offset += rows.len();
                if rows.len() < batch_size {
                    break;
                }
            }
            debug!("Tagging table {} covers {} tags", tagging.table, usage.len());
            for (slug, taxonomies) in usage {
                if let Some(candidate) = candidates.get_mut(&slug) {
                    candidate.taxonomies = taxonomies;
                }
            }
        }
    }

    Ok(candidates.into_values().collect())
}

fn add_candidate(candidates: &mut BTreeMap<String, TagCandidate>, name: &str, taxonomy: TagTaxonomy) {
    let slug = slugify(name);
    if slug.is_empty() {
        return;
    }
    candidates
        .entry(slug.clone())
        .or_insert_with(|| TagCandidate {
            name: name.trim().to_string(),
            slug,
            taxonomies: BTreeSet::new(),
        })
        .taxonomies
        .insert(taxonomy);
}

/// Creates one tag document per candidate and taxonomy.
pub struct TagsMigrator<'a> {
    ctx: &'a MigrationContext,
    meditation_tags: &'a mut IdMap,
    music_tags: &'a mut IdMap,
}

impl<'a> TagsMigrator<'a> {
    pub fn new(
        ctx: &'a MigrationContext,
        meditation_tags: &'a mut IdMap,
        music_tags: &'a mut IdMap,
    ) -> Self {
        Self {
            ctx,
            meditation_tags,
            music_tags,
        }
    }

    fn map_for(&mut self, taxonomy: TagTaxonomy) -> &mut IdMap {
        match taxonomy {
            TagTaxonomy::Meditation => &mut *self.meditation_tags,
            TagTaxonomy::Music => &mut *self.music_tags,
        }
    }
}

#[async_trait]
impl Migrator for TagsMigrator<'_> {
    fn phase(&self) -> Phase {
        Phase::Tags
    }

    fn target_collection(&self) -> &str {
        "tags"
    }

    async fn migrate(&mut self) -> Result<MigrationResult, MigrateError> {
        let ctx = self.ctx;
        let candidates = collect_tags(
            ctx.source.as_ref(),
            &ctx.settings.tags,
            ctx.settings.run.batch_size,
        )
        .await?;

        let writes: Vec<(TagTaxonomy, &TagCandidate)> = candidates
            .iter()
            .flat_map(|c| c.taxonomies.iter().map(move |t| (*t, c)))
            .collect();
        info!(
            "Found {} distinct tags ({} tag documents)",
            candidates.len(),
            writes.len()
        );

        let mut result = MigrationResult::new("tags", writes.len());
        let progress = progress_bar(writes.len() as u64, "tags", ctx.show_progress);

        for (index, (taxonomy, candidate)) in writes.into_iter().enumerate() {
            result.processed += 1;
            let mut record = Record::new();
            record.insert("name".into(), Value::String(candidate.name.clone()));
            record.insert("slug".into(), Value::String(candidate.slug.clone()));

            let write = PendingWrite::new(
                taxonomy.collection(),
                Filter::eq("slug", candidate.slug.as_str()),
                record,
            )
            .key(candidate.slug.as_str());

            match upsert(ctx, self.map_for(taxonomy), None, write).await {
                Ok(outcome) => result.record(&outcome),
                Err(e) => {
                    warn!("{} tag {}: {}", taxonomy.collection(), candidate.name, e);
                    let data = serde_json::json!({
                        "name": candidate.name,
                        "taxonomy": taxonomy.collection(),
                    });
                    result.fail(index, vec![e], Some(data));
                    if result.failed > ctx.settings.run.max_errors {
                        result.aborted = true;
                        break;
                    }
                }
            }
            progress.inc(1);
        }

        progress.finish_and_clear();
        result.finish();
        Ok(result)
    }
}

/// Resolve tag names through a taxonomy's map, dropping unknown tags.
pub(crate) fn resolve_tags(map: &IdMap, names: &[String], owner: &str) -> Vec<Value> {
    let mut seen = BTreeSet::new();
    names
        .iter()
        .filter_map(|name| {
            let slug = slugify(name);
            match map.get(&slug) {
                Some(id) if seen.insert(id.to_string()) => Some(Value::String(id.to_string())),
                Some(_) => None,
                None => {
                    warn!("{}: tag {:?} has no target document, dropping it", owner, name);
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Settings, TagSource};
    use crate::migrators::test_support;

    const SQL: &str = "
        CREATE TABLE meditations (id INTEGER PRIMARY KEY, tags TEXT);
        CREATE TABLE musics (id INTEGER PRIMARY KEY, tags TEXT);
        INSERT INTO meditations (id, tags) VALUES (1, 'calm, Focus'), (2, NULL);
        INSERT INTO musics (id, tags) VALUES (1, ' Calm ');
    ";

    fn single_taxonomy() -> TagsConfig {
        TagsConfig {
            sources: vec![
                TagSource {
                    table: "meditations".into(),
                    column: "tags".into(),
                    taxonomy: TagTaxonomy::Meditation,
                },
                TagSource {
                    table: "musics".into(),
                    column: "tags".into(),
                    taxonomy: TagTaxonomy::Meditation,
                },
            ],
            tagging: None,
        }
    }

    #[tokio::test]
    async fn test_collect_dedupes_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        let source = test_support::sqlite_source(dir.path(), SQL);

        let tags = collect_tags(source.as_ref(), &single_taxonomy(), 100).await.unwrap();
        let slugs: Vec<&str> = tags.iter().map(|t| t.slug.as_str()).collect();
        assert_eq!(slugs, vec!["calm", "focus"]);
        assert_eq!(tags[0].name, "calm");
    }

    #[tokio::test]
    async fn test_tagging_table_decides_taxonomies() {
        let dir = tempfile::tempdir().unwrap();
        let sql = format!(
            "{}
            CREATE TABLE taggings (tag TEXT, taggable_type TEXT, taggable_id INTEGER);
            INSERT INTO taggings VALUES ('focus', 'Music', 1), ('sleep', 'Meditation', 2),
                                        ('sleep', 'Music', 3), ('x', 'Other', 4);",
            SQL
        );
        let source = test_support::sqlite_source(dir.path(), &sql);

        let tags = collect_tags(source.as_ref(), &TagsConfig::default(), 2).await.unwrap();
        let by_slug: BTreeMap<&str, &TagCandidate> =
            tags.iter().map(|t| (t.slug.as_str(), t)).collect();

        assert_eq!(by_slug.len(), 3);
        let both: BTreeSet<_> = TagTaxonomy::all().into_iter().collect();
        assert_eq!(by_slug["calm"].taxonomies, both);
        assert_eq!(
            by_slug["focus"].taxonomies,
            BTreeSet::from([TagTaxonomy::Music])
        );
        assert_eq!(by_slug["sleep"].taxonomies, both);
    }

    #[tokio::test]
    async fn test_migrate_creates_each_tag_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::with_cache_dir(dir.path().to_path_buf());
        settings.tags = single_taxonomy();
        let (ctx, target) = test_support::context(dir.path(), SQL, settings);
        let mut meditation_tags = IdMap::new();
        let mut music_tags = IdMap::new();

        let result = TagsMigrator::new(&ctx, &mut meditation_tags, &mut music_tags)
            .migrate()
            .await
            .unwrap();
        assert_eq!(result.created, 2);
        assert_eq!(target.count("meditation-tags"), 2);
        assert_eq!(target.count("music-tags"), 0);
        assert!(meditation_tags.contains("calm"));

        let again = TagsMigrator::new(&ctx, &mut meditation_tags, &mut music_tags)
            .migrate()
            .await
            .unwrap();
        assert_eq!(again.created, 0);
        assert_eq!(again.existing, 2);
        assert_eq!(target.count("meditation-tags"), 2);
    }

    #[test]
    fn test_resolve_tags_drops_unknown_and_duplicates() {
        let map: IdMap = [("calm".to_string(), "t1".to_string())].into_iter().collect();
        let names: Vec<String> = ["Calm", "calm", "nope"].iter().map(|s| s.to_string()).collect();
        assert_eq!(resolve_tags(&map, &names, "test"), vec![Value::from("t1")]);
    }
}
