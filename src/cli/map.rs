//! The `map` command.

use std::path::Path;

use console::style;

use super::helpers::build_source;
use crate::analyzer::SchemaAnalyzer;
use crate::config::Settings;
use crate::mapping::{generate_mappings, AcceptAll, ConsoleReviewer, MappingReviewer};

/// Propose mappings, review them, and write the result for later runs.
pub async fn cmd_map(settings: &Settings, output: &Path, accept_all: bool) -> anyhow::Result<()> {
    let source = build_source(settings)?;
    source.connect().await?;
    let schemas = SchemaAnalyzer::new(source.clone()).analyze_all().await?;
    source.disconnect().await?;

    let proposals = generate_mappings(&schemas);
    let mappings = if accept_all {
        AcceptAll.review_all(proposals)?
    } else {
        ConsoleReviewer::stdio().review_all(proposals)?
    };
    mappings.save_to_file(output)?;

    println!(
        "{} Saved mappings for {} collections to {}",
        style("✓").green(),
        mappings.collections.len(),
        output.display()
    );
    for (collection, mapping) in &mappings.collections {
        println!(
            "  {:<20} <- {} ({} fields)",
            collection,
            mapping.source_table,
            mapping.mappings.len()
        );
    }
    Ok(())
}
