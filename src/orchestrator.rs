//! Run sequencing.
//!
//! The orchestrator owns the ID maps for a run. Phases run in dependency
//! order (tags, narrators, frames, music, meditations) and each migrator is
//! handed exactly the maps it reads or writes. The snapshot is saved after
//! every phase so an interrupted run can `--resume`.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::analyzer::SchemaAnalyzer;
use crate::config::{ConfigError, Settings};
use crate::error::{MigrateError, Result};
use crate::idmap::{IdMapSnapshot, IdMapStore, IdMaps, NullIdMapStore, Phase};
use crate::mapping::{generate_mappings, CollectionMappings};
use crate::media::{MediaProbe, MediaTransfer, NoopProbe};
use crate::migrators::{
    FramesMigrator, MeditationLookups, MeditationsMigrator, MigrationContext, Migrator,
    MusicMigrator, NarratorsMigrator, TagsMigrator,
};
use crate::models::{MigrationResult, MigrationSummary, TableSchema};
use crate::source::SourceStore;
use crate::target::{DryRunTargetStore, Filter, TargetStore};

/// Per-run switches, mirroring the `migrate` command line.
#[derive(Debug, Clone, Default)]
pub struct MigrateOptions {
    /// Transform and validate without writing to the target.
    pub dry_run: bool,
    /// Stop after schema introspection.
    pub analyze_only: bool,
    /// Previously saved mapping file to use instead of generated mappings.
    pub mappings_path: Option<PathBuf>,
    /// Where to write the mappings used for this run.
    pub save_mappings: Option<PathBuf>,
    /// Phase selectors; empty runs everything.
    pub tables: Vec<String>,
    /// Delete the selected collections before migrating.
    pub reset: bool,
    /// Skip phases completed by an earlier run.
    pub resume: bool,
}

/// What a run produced.
#[derive(Debug)]
pub enum RunOutcome {
    Analyzed(Vec<TableSchema>),
    Migrated(MigrationSummary),
}

/// Target collections written by a phase.
pub fn phase_collections(phase: Phase) -> &'static [&'static str] {
    match phase {
        Phase::Tags => &["meditation-tags", "music-tags"],
        Phase::Narrators => &["narrators"],
        Phase::Frames => &["frames"],
        Phase::Music => &["music"],
        Phase::Meditations => &["meditations"],
    }
}

/// Resolve `--tables` selectors into phases, in dependency order.
pub fn select_phases(selectors: &[String]) -> Result<Vec<Phase>> {
    if selectors.is_empty() {
        return Ok(Phase::ORDER.to_vec());
    }
    let mut selected = Vec::new();
    for selector in selectors.iter().flat_map(|s| s.split(',')) {
        if selector.trim().is_empty() {
            continue;
        }
        let phase = Phase::parse_selector(selector).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "unknown table or collection '{}' (expected one of: {})",
                selector.trim(),
                Phase::ORDER.map(|p| p.as_str()).join(", ")
            ))
        })?;
        selected.push(phase);
    }
    Ok(Phase::ORDER
        .into_iter()
        .filter(|p| selected.contains(p))
        .collect())
}

pub struct Orchestrator {
    source: Arc<dyn SourceStore>,
    target: Arc<dyn TargetStore>,
    settings: Arc<Settings>,
    id_store: Arc<dyn IdMapStore>,
    probe: Arc<dyn MediaProbe>,
    show_progress: bool,
}

impl Orchestrator {
    pub fn new(
        source: Arc<dyn SourceStore>,
        target: Arc<dyn TargetStore>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            source,
            target,
            settings,
            id_store: Arc::new(NullIdMapStore),
            probe: Arc::new(NoopProbe),
            show_progress: false,
        }
    }

    pub fn with_id_store(mut self, store: Arc<dyn IdMapStore>) -> Self {
        self.id_store = store;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn MediaProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Introspect every source table.
    pub async fn analyze(&self) -> Result<Vec<TableSchema>> {
        self.source.connect().await?;
        let schemas = SchemaAnalyzer::new(self.source.clone()).analyze_all().await?;
        info!("Analyzed {} tables from {}", schemas.len(), self.source.describe());
        Ok(schemas)
    }

    /// Mappings for this run: the saved file when given, otherwise proposals
    /// generated from the analyzed schema.
    pub async fn load_mappings(&self, options: &MigrateOptions) -> Result<CollectionMappings> {
        match &options.mappings_path {
            Some(path) => {
                let mappings = CollectionMappings::load_from_file(path)?;
                info!(
                    "Loaded mappings for {} collections from {}",
                    mappings.collections.len(),
                    path.display()
                );
                Ok(mappings)
            }
            None => {
                let schemas = self.analyze().await?;
                Ok(generate_mappings(&schemas))
            }
        }
    }

    /// Analyze, resolve mappings, then migrate, as one non-interactive run.
    pub async fn run(&self, options: &MigrateOptions) -> Result<RunOutcome> {
        if options.analyze_only {
            let schemas = self.analyze().await?;
            if let Some(path) = &options.save_mappings {
                generate_mappings(&schemas).save_to_file(path)?;
                info!("Saved mappings to {}", path.display());
            }
            return Ok(RunOutcome::Analyzed(schemas));
        }

        let mappings = self.load_mappings(options).await?;
        if let Some(path) = &options.save_mappings {
            mappings.save_to_file(path)?;
            info!("Saved mappings to {}", path.display());
        }
        self.migrate(mappings, options).await.map(RunOutcome::Migrated)
    }

    /// Target store for this run; dry runs read through to the real store
    /// when it is reachable.
    async fn prepare_target(&self, dry_run: bool) -> Result<Arc<dyn TargetStore>> {
        if !dry_run {
            self.target.init().await?;
            return Ok(self.target.clone());
        }
        match self.target.init().await {
            Ok(()) => Ok(Arc::new(DryRunTargetStore::new(Some(self.target.clone())))),
            Err(e) => {
                warn!(
                    "Target {} unreachable ({}), dry run will not detect existing records",
                    self.target.describe(),
                    e
                );
                Ok(Arc::new(DryRunTargetStore::new(None)))
            }
        }
    }

    /// Delete the documents of the selected phases and forget their maps.
    pub async fn reset(
        &self,
        target: &dyn TargetStore,
        phases: &[Phase],
        snapshot: &mut IdMapSnapshot,
    ) -> Result<usize> {
        let mut removed = 0;
        for phase in phases {
            for collection in phase_collections(*phase) {
                let n = target.delete_where(collection, &Filter::new()).await?;
                info!("Reset {}: removed {} documents", collection, n);
                removed += n;
            }
            snapshot.reset_phase(*phase);
        }
        Ok(removed)
    }

    /// Run the selected phases with the given mappings.
    pub async fn migrate(
        &self,
        mappings: CollectionMappings,
        options: &MigrateOptions,
    ) -> Result<MigrationSummary> {
        let phases = select_phases(&options.tables)?;
        self.source.connect().await?;
        let target = self.prepare_target(options.dry_run).await?;
        let id_store: Arc<dyn IdMapStore> = if options.dry_run {
            Arc::new(NullIdMapStore)
        } else {
            self.id_store.clone()
        };

        let mut snapshot = id_store.load()?.unwrap_or_default();
        debug!(
            "Loaded {} ID mappings from {}",
            snapshot.maps.total(),
            id_store.describe()
        );

        if options.reset {
            self.reset(target.as_ref(), &phases, &mut snapshot).await?;
            id_store.save(&snapshot)?;
        }

        std::fs::create_dir_all(self.settings.media_cache_dir())?;
        let mut media = MediaTransfer::new(
            &self.settings.media,
            &self.settings.media_cache_dir(),
            target.clone(),
            self.probe.clone(),
        )
        .map_err(|e| MigrateError::Aborted(format!("media transfer setup failed: {}", e)))?;

        let ctx = MigrationContext::new(self.source.clone(), target, self.settings.clone())
            .with_mappings(mappings)
            .with_progress(self.show_progress);
        let mut summary = MigrationSummary::new(options.dry_run);

        for phase in phases {
            if options.resume && snapshot.is_completed(phase) {
                info!("Skipping {} (completed in an earlier run)", phase);
                continue;
            }
            info!("Migrating {}", phase);
            let result = run_phase(phase, &ctx, &mut snapshot.maps, &mut media).await?;
            if result.is_success() {
                snapshot.mark_completed(phase);
            } else {
                warn!("{} stopped early after {} failures", phase, result.failed);
            }
            id_store.save(&snapshot)?;
            summary.results.push(result);
        }

        summary.media = media.stats();
        summary.finish();
        if let Err(e) = self.source.disconnect().await {
            debug!("Source disconnect failed: {}", e);
        }
        Ok(summary)
    }
}

/// Build and run the migrator for one phase, lending it the maps it needs.
async fn run_phase(
    phase: Phase,
    ctx: &MigrationContext,
    maps: &mut IdMaps,
    media: &mut MediaTransfer,
) -> Result<MigrationResult> {
    let IdMaps {
        narrators,
        meditation_tags,
        music_tags,
        frames,
        media: media_map,
        music,
        meditations,
    } = maps;

    let mut migrator: Box<dyn Migrator + '_> = match phase {
        Phase::Tags => Box::new(TagsMigrator::new(ctx, meditation_tags, music_tags)),
        Phase::Narrators => Box::new(NarratorsMigrator::new(ctx, narrators)),
        Phase::Frames => Box::new(FramesMigrator::new(ctx, frames, media_map, media)),
        Phase::Music => Box::new(MusicMigrator::new(ctx, music, music_tags, media)),
        Phase::Meditations => Box::new(MeditationsMigrator::new(
            ctx,
            meditations,
            MeditationLookups {
                narrators,
                tags: meditation_tags,
                frames,
                music,
            },
            media_map,
            media,
        )),
    };
    migrator.migrate().await
}
