//! Collection migrators.
//!
//! Each migrator moves one phase of legacy data into the target. Row-based
//! migrators implement [`RowMigrator`] and get batching, validation,
//! natural-key upserts and the error ceiling from [`run_rows`]. Tags and
//! narrators are not row-shaped and implement [`Migrator`] directly.

mod frames;
mod meditations;
mod music;
mod narrators;
mod tags;

pub use frames::{frame_key, FrameCategory, FramesMigrator};
pub use meditations::{
    normalize_keyframes, LegacyKeyframe, MeditationLookups, MeditationsMigrator, ResolvedKeyframe,
};
pub use music::MusicMigrator;
pub use narrators::NarratorsMigrator;
pub use tags::{collect_tags, TagCandidate, TagsMigrator};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::config::{ExistingMode, Settings};
use crate::error::MigrateError;
use crate::idmap::{IdMap, Phase};
use crate::mapping::CollectionMappings;
use crate::media::MediaTransfer;
use crate::models::{MigrationResult, Record, RowError, SourceRow, WriteOutcome};
use crate::source::{SourceQuery, SourceStore};
use crate::target::{Filter, TargetStore};
use crate::validation::Validator;

/// Legacy primary-key column.
pub const ID_COLUMN: &str = "id";

/// Shared, read-only collaborators for every migrator in a run.
pub struct MigrationContext {
    pub source: Arc<dyn SourceStore>,
    pub target: Arc<dyn TargetStore>,
    pub settings: Arc<Settings>,
    pub mappings: CollectionMappings,
    pub show_progress: bool,
}

impl MigrationContext {
    pub fn new(
        source: Arc<dyn SourceStore>,
        target: Arc<dyn TargetStore>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            source,
            target,
            settings,
            mappings: CollectionMappings::default(),
            show_progress: false,
        }
    }

    pub fn with_mappings(mut self, mappings: CollectionMappings) -> Self {
        self.mappings = mappings;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn mode(&self) -> ExistingMode {
        self.settings.run.mode
    }
}

/// A target record ready to be created or reconciled with an existing one.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    pub collection: String,
    /// ID-map keys that should point at the written document.
    pub keys: Vec<String>,
    /// Lookup identifying an equivalent document already in the target.
    pub natural_key: Filter,
    pub record: Record,
    /// Storage key of the record's own file, sent only on create.
    pub attachment: Option<String>,
}

impl PendingWrite {
    pub fn new(collection: &str, natural_key: Filter, record: Record) -> Self {
        Self {
            collection: collection.to_string(),
            keys: Vec::new(),
            natural_key,
            record,
            attachment: None,
        }
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.keys.push(key.into());
        self
    }

    pub fn with_attachment(mut self, key: Option<String>) -> Self {
        self.attachment = key;
        self
    }
}

/// One migration phase.
#[async_trait]
pub trait Migrator: Send {
    fn phase(&self) -> Phase;

    fn target_collection(&self) -> &str;

    async fn migrate(&mut self) -> Result<MigrationResult, MigrateError>;
}

/// A migrator that maps source rows one at a time.
#[async_trait]
pub trait RowMigrator: Send + Sync {
    fn source_table(&self) -> &str;

    fn target_collection(&self) -> &str;

    fn context(&self) -> &MigrationContext;

    fn validator(&self) -> &Validator;

    /// Called with each batch before its rows are transformed.
    async fn before_batch(&mut self, _rows: &[SourceRow]) {}

    /// Turn a source row into zero or more target records.
    async fn transform_row(
        &mut self,
        row: &SourceRow,
        index: usize,
    ) -> Result<Vec<PendingWrite>, RowError>;

    /// Persist one record, updating the migrator's ID map.
    async fn write(&mut self, write: PendingWrite) -> Result<WriteOutcome, RowError>;
}

/// Batch loop shared by row migrators.
///
/// Rows are read `batch_size` at a time. A failing row is recorded and
/// skipped; once more than `max_errors` rows have failed the loop stops and
/// the result is marked aborted.
pub async fn run_rows<M>(migrator: &mut M) -> Result<MigrationResult, MigrateError>
where
    M: RowMigrator + ?Sized,
{
    let source = migrator.context().source.clone();
    let run = migrator.context().settings.run.clone();
    let show_progress = migrator.context().show_progress;
    let table = migrator.source_table().to_string();
    let collection = migrator.target_collection().to_string();

    if !source.table_exists(&table).await? {
        warn!("Source table {} not found, nothing to migrate into {}", table, collection);
        let mut result = MigrationResult::new(&collection, 0);
        result.finish();
        return Ok(result);
    }

    let base_query = match source.primary_key(&table).await?.first() {
        Some(pk) => SourceQuery::new().order_by(pk),
        None => SourceQuery::new(),
    };
    let total = source.count(&table, &SourceQuery::new()).await?;
    let mut result = MigrationResult::new(&collection, total);
    let progress = progress_bar(total as u64, &collection, show_progress);
    let batch_size = run.batch_size.max(1);
    let mut offset = 0;

    'batches: loop {
        let rows = source
            .fetch(&table, &base_query.clone().page(offset, batch_size))
            .await?;
        if rows.is_empty() {
            break;
        }
        debug!("{}: batch of {} rows at offset {}", collection, rows.len(), offset);
        migrator.before_batch(&rows).await;

        for (i, row) in rows.iter().enumerate() {
            let index = offset + i;
            result.processed += 1;
            let RowOutcome { written, errors } = process_row(migrator, row, index).await;
            written.iter().for_each(|o| result.record(o));
            if let Some(errors) = errors {
                for e in &errors {
                    warn!("{} row {}: {}", collection, index, e);
                }
                result.fail(index, errors, Some(row.to_json()));
                if result.failed > run.max_errors {
                    error!(
                        "{}: {} failed rows exceed the limit of {}, stopping",
                        collection, result.failed, run.max_errors
                    );
                    result.aborted = true;
                    break 'batches;
                }
            }
            progress.inc(1);
        }

        offset += rows.len();
        if rows.len() < batch_size {
            break;
        }
    }

    progress.finish_and_clear();
    result.finish();
    Ok(result)
}

/// Writes that landed for one row, plus the errors that stopped it.
///
/// A row that splits into several writes can fail part way; documents
/// written before the failure are still counted.
#[derive(Debug, Default)]
struct RowOutcome {
    written: Vec<WriteOutcome>,
    errors: Option<Vec<RowError>>,
}

impl RowOutcome {
    fn failed(errors: Vec<RowError>) -> Self {
        Self {
            written: Vec::new(),
            errors: Some(errors),
        }
    }
}

async fn process_row<M>(migrator: &mut M, row: &SourceRow, index: usize) -> RowOutcome
where
    M: RowMigrator + ?Sized,
{
    let writes = match migrator.transform_row(row, index).await {
        Ok(writes) => writes,
        Err(e) => return RowOutcome::failed(vec![e]),
    };

    let errors: Vec<RowError> = writes
        .iter()
        .flat_map(|w| migrator.validator().validate(&w.record, index))
        .map(RowError::from)
        .collect();
    if !errors.is_empty() {
        return RowOutcome::failed(errors);
    }

    if writes.is_empty() {
        return RowOutcome {
            written: vec![WriteOutcome::Skipped("nothing to write".to_string())],
            errors: None,
        };
    }

    let mut outcome = RowOutcome::default();
    for write in writes {
        match migrator.write(write).await {
            Ok(written) => outcome.written.push(written),
            Err(e) => {
                outcome.errors = Some(vec![e]);
                break;
            }
        }
    }
    outcome
}

/// Create `write` unless an equivalent document exists.
///
/// Existing documents are found through the ID map first (verified against
/// the target, stale entries evicted), then through the natural key. In skip
/// mode they are reused as-is; in update mode their fields are rewritten but
/// their attachment is left alone.
pub async fn upsert(
    ctx: &MigrationContext,
    id_map: &mut IdMap,
    media: Option<&mut MediaTransfer>,
    write: PendingWrite,
) -> Result<WriteOutcome, RowError> {
    let PendingWrite {
        collection,
        keys,
        natural_key,
        mut record,
        attachment,
    } = write;
    let target = &ctx.target;

    let mut existing = None;
    for key in &keys {
        let Some(id) = id_map.get(key).map(str::to_string) else {
            continue;
        };
        if target.find_by_id(&collection, &id).await?.is_some() {
            existing = Some(id);
            break;
        }
        debug!("{} {} -> {} no longer exists, dropping mapping", collection, key, id);
        id_map.remove(key);
    }
    if existing.is_none() && !natural_key.is_empty() {
        existing = target
            .find_one(&collection, &natural_key)
            .await?
            .map(|doc| doc.id);
    }

    let outcome = match existing {
        Some(id) => match ctx.mode() {
            ExistingMode::Skip => WriteOutcome::Existing(id),
            ExistingMode::Update => {
                let doc = target.update(&collection, &id, &record, None).await?;
                WriteOutcome::Updated(doc.id)
            }
        },
        None => {
            let file = match (attachment.as_deref(), media) {
                (Some(key), Some(media)) => media.fetch_attachment(key).await,
                _ => None,
            };
            if let Some(duration) = file.as_ref().and_then(|f| f.duration) {
                if record.get("duration").map_or(true, Value::is_null) {
                    record.insert("duration".into(), Value::from(duration.round() as i64));
                }
            }
            let doc = target
                .create(&collection, &record, file.map(|f| f.upload))
                .await?;
            WriteOutcome::Created(doc.id)
        }
    };

    if let Some(id) = outcome.id() {
        for key in keys {
            id_map.insert(key, id);
        }
    }
    Ok(outcome)
}

/// Per-phase progress bar, hidden when progress output is off.
pub fn progress_bar(total: u64, label: &str, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {prefix:>16} [{bar:40.cyan/dim}] {pos}/{len} ({per_sec})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    pb.set_prefix(label.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;
    use std::sync::Arc;

    use rusqlite::Connection;

    use super::MigrationContext;
    use crate::config::Settings;
    use crate::media::{MediaTransfer, NoopProbe};
    use crate::source::SqliteSource;
    use crate::target::MemoryTargetStore;

    /// SQLite source at `dir/legacy.db` built from `sql`.
    pub fn sqlite_source(dir: &Path, sql: &str) -> Arc<SqliteSource> {
        let path = dir.join("legacy.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(sql).unwrap();
        Arc::new(SqliteSource::new(&path))
    }

    /// Media transfer wired to the context's target, without a probe.
    pub fn media(ctx: &MigrationContext) -> MediaTransfer {
        MediaTransfer::new(
            &ctx.settings.media,
            &ctx.settings.media_cache_dir(),
            ctx.target.clone(),
            Arc::new(NoopProbe),
        )
        .unwrap()
    }

    pub fn context(
        dir: &Path,
        sql: &str,
        settings: Settings,
    ) -> (MigrationContext, Arc<MemoryTargetStore>) {
        let target = Arc::new(MemoryTargetStore::new());
        let ctx = MigrationContext::new(sqlite_source(dir, sql), target.clone(), Arc::new(settings));
        (ctx, target)
    }
}
