//! Shared helpers for CLI commands.

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use console::style;

use crate::config::{Settings, SourceKind};
use crate::idmap::{IdMapStore, JsonFileStore, SqliteIdMapStore};
use crate::source::{ApiSource, SourceStore, SqliteSource};
use crate::target::{DryRunTargetStore, HttpTargetStore, TargetStore};

/// Build the configured source store.
pub fn build_source(settings: &Settings) -> anyhow::Result<Arc<dyn SourceStore>> {
    match &settings.source {
        Some(SourceKind::Sqlite(path)) => {
            if !path.exists() {
                bail!("Source database not found: {}", path.display());
            }
            Ok(Arc::new(SqliteSource::new(path)))
        }
        Some(SourceKind::Api {
            base_url,
            tables,
            token,
        }) => Ok(Arc::new(ApiSource::new(
            base_url,
            tables.clone(),
            token.clone(),
            Duration::from_secs(settings.target.timeout_secs),
        )?)),
        None => bail!(
            "No source configured. Set source.database or source.api_url in the settings file, \
             or CMSPORT_SOURCE_DATABASE in the environment."
        ),
    }
}

/// Build the target store. A dry run without a target URL writes nowhere.
pub fn build_target(settings: &Settings, dry_run: bool) -> anyhow::Result<Arc<dyn TargetStore>> {
    match &settings.target.url {
        Some(url) => Ok(Arc::new(HttpTargetStore::new(
            url,
            settings.target.api_key.as_deref(),
            &settings.target.auth_collection,
            &settings.media.collection,
            Duration::from_secs(settings.target.timeout_secs),
        )?)),
        None if dry_run => Ok(Arc::new(DryRunTargetStore::new(None))),
        None => bail!(
            "No target configured. Set target.url in the settings file or CMSPORT_TARGET_URL."
        ),
    }
}

/// ID map persistence: SQLite for `.db`/`.sqlite` paths, JSON otherwise.
pub fn build_id_store(path: &Path) -> anyhow::Result<Arc<dyn IdMapStore>> {
    let is_sqlite = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("db" | "sqlite" | "sqlite3")
    );
    if is_sqlite {
        let store = SqliteIdMapStore::new(path)
            .with_context(|| format!("opening ID map database {}", path.display()))?;
        Ok(Arc::new(store))
    } else {
        Ok(Arc::new(JsonFileStore::new(path)))
    }
}

/// Ask a yes/no question, defaulting to no.
pub fn confirm(prompt: &str) -> io::Result<bool> {
    print!("\n{} [y/N] ", prompt);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let yes = input.trim().eq_ignore_ascii_case("y");
    if !yes {
        println!("{} Cancelled", style("!").yellow());
    }
    Ok(yes)
}
