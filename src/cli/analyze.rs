//! The `analyze` command.

use console::style;

use super::helpers::build_source;
use crate::analyzer::SchemaAnalyzer;
use crate::config::Settings;
use crate::models::TableSchema;

/// Print the source schema as a table listing or JSON.
pub async fn cmd_analyze(settings: &Settings, tables: &[String], json: bool) -> anyhow::Result<()> {
    let source = build_source(settings)?;
    source.connect().await?;
    let analyzer = SchemaAnalyzer::new(source.clone());
    let schemas = if tables.is_empty() {
        analyzer.analyze_all().await?
    } else {
        analyzer.analyze_tables(tables).await
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&schemas)?);
    } else {
        println!(
            "{} {} ({} tables)",
            style("Schema").bold(),
            source.describe(),
            schemas.len()
        );
        print_schemas(&schemas);
    }
    source.disconnect().await?;
    Ok(())
}

pub(super) fn print_schemas(schemas: &[TableSchema]) {
    for schema in schemas {
        println!("\n  {}", style(&schema.table_name).cyan().bold());
        for column in &schema.columns {
            let mut notes = Vec::new();
            if schema.primary_key.contains(&column.name) {
                notes.push("pk".to_string());
            }
            if let Some(fk) = schema.foreign_key(&column.name) {
                notes.push(format!("-> {}.{}", fk.referenced_table, fk.referenced_column));
            }
            if !column.nullable {
                notes.push("not null".to_string());
            }
            println!(
                "    {:<24} {:<16} {}",
                column.name,
                column.data_type,
                style(notes.join(", ")).dim()
            );
        }
    }
}
