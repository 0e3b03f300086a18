//! The `migrate` command.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use console::style;

use super::helpers::{build_id_store, build_source, build_target, confirm};
use crate::config::{ExistingMode, Settings};
use crate::mapping::{ConsoleReviewer, MappingReviewer};
use crate::media::detect_probe;
use crate::orchestrator::{phase_collections, select_phases, MigrateOptions, Orchestrator};
use crate::report::{print_errors, print_summary, save_report, RunStatus};

/// Errors shown per collection after the summary.
const ERRORS_SHOWN: usize = 10;

#[derive(Args, Debug)]
pub struct MigrateArgs {
    /// Transform and validate without writing to the target
    #[arg(long)]
    pub dry_run: bool,

    /// Only introspect the source schema
    #[arg(long)]
    pub analyze_only: bool,

    /// Saved mapping file to use instead of generated mappings
    #[arg(short, long, value_name = "MAPPINGS")]
    pub config: Option<PathBuf>,

    /// Write the mappings used for this run to a file
    #[arg(long, value_name = "PATH")]
    pub save_mappings: Option<PathBuf>,

    /// Limit the run to these tables or collections (comma-separated)
    #[arg(short, long, value_delimiter = ',')]
    pub tables: Vec<String>,

    /// Delete the selected collections in the target first
    #[arg(long)]
    pub reset: bool,

    /// Skip confirmation prompts
    #[arg(short, long)]
    pub yes: bool,

    /// What to do with records that already exist in the target
    #[arg(long, value_enum)]
    pub mode: Option<ExistingMode>,

    /// Skip phases completed by an earlier run
    #[arg(long)]
    pub resume: bool,

    /// Rows read per source page
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Failures tolerated per collection before it aborts
    #[arg(long)]
    pub max_errors: Option<usize>,

    /// Review each proposed field mapping before migrating
    #[arg(short, long)]
    pub interactive: bool,

    /// ID map location (.db/.sqlite for SQLite, anything else for JSON)
    #[arg(long, value_name = "PATH")]
    pub id_map: Option<PathBuf>,

    /// Where to write the JSON run report
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,

    /// Hide progress bars
    #[arg(long)]
    pub no_progress: bool,
}

impl MigrateArgs {
    fn apply(&self, settings: &mut Settings) {
        if let Some(mode) = self.mode {
            settings.run.mode = mode;
        }
        if let Some(batch_size) = self.batch_size {
            settings.run.batch_size = batch_size.max(1);
        }
        if let Some(max_errors) = self.max_errors {
            settings.run.max_errors = max_errors;
        }
    }

    fn options(&self) -> MigrateOptions {
        MigrateOptions {
            dry_run: self.dry_run,
            analyze_only: self.analyze_only,
            mappings_path: self.config.clone(),
            save_mappings: self.save_mappings.clone(),
            tables: self.tables.clone(),
            reset: self.reset,
            resume: self.resume,
        }
    }
}

/// Run a migration and return the process exit code.
pub async fn cmd_migrate(mut settings: Settings, args: MigrateArgs) -> anyhow::Result<i32> {
    args.apply(&mut settings);
    settings.ensure_directories()?;
    let options = args.options();
    let phases = select_phases(&options.tables)?;

    let source = build_source(&settings)?;
    let target = build_target(&settings, options.dry_run)?;
    let id_map_path = args.id_map.clone().unwrap_or_else(|| settings.id_map_path());
    let id_store = build_id_store(&id_map_path)?;
    let report_path = args
        .report
        .clone()
        .unwrap_or_else(|| settings.cache_dir.join("last-run.json"));

    let orchestrator = Orchestrator::new(source.clone(), target.clone(), Arc::new(settings))
        .with_id_store(id_store.clone())
        .with_probe(detect_probe())
        .with_progress(!args.no_progress);

    if options.analyze_only {
        let schemas = orchestrator.analyze().await?;
        super::analyze::print_schemas(&schemas);
        if let Some(path) = &options.save_mappings {
            crate::mapping::generate_mappings(&schemas).save_to_file(path)?;
            println!("{} Saved mappings to {}", style("✓").green(), path.display());
        }
        return Ok(0);
    }

    println!(
        "{} Migrating {} -> {}{}",
        style("→").cyan(),
        style(source.describe()).bold(),
        style(target.describe()).bold(),
        if options.dry_run {
            style(" (dry run)").yellow().to_string()
        } else {
            String::new()
        }
    );
    println!("  {:<20} {}", "ID map:", id_store.describe());
    println!(
        "  {:<20} {}",
        "Phases:",
        phases.iter().map(|p| p.as_str()).collect::<Vec<_>>().join(", ")
    );

    let mut mappings = orchestrator.load_mappings(&options).await?;
    if args.interactive {
        mappings = ConsoleReviewer::stdio().review_all(mappings)?;
    }
    if let Some(path) = &options.save_mappings {
        mappings.save_to_file(path)?;
        println!("{} Saved mappings to {}", style("✓").green(), path.display());
    }

    if options.reset && !options.dry_run && !args.yes {
        let collections: Vec<&str> = phases
            .iter()
            .flat_map(|p| phase_collections(*p).iter().copied())
            .collect();
        println!(
            "\n{} Reset will delete every document in: {}",
            style("!").yellow(),
            collections.join(", ")
        );
        if !confirm("Proceed?")? {
            return Ok(0);
        }
    }

    let summary = orchestrator.migrate(mappings, &options).await?;
    print_summary(&summary);
    print_errors(&summary, ERRORS_SHOWN);

    if let Err(e) = save_report(&summary, &report_path) {
        tracing::warn!("Could not write report to {}: {}", report_path.display(), e);
    } else {
        println!("  {:<20} {}", "Report:", report_path.display());
    }

    Ok(RunStatus::classify(&summary).exit_code())
}
