//! Source schema introspection.

use std::sync::Arc;

use crate::models::TableSchema;
use crate::source::{Result, SourceStore};

/// Builds [`TableSchema`] descriptions from a source store.
pub struct SchemaAnalyzer {
    source: Arc<dyn SourceStore>,
}

impl SchemaAnalyzer {
    pub fn new(source: Arc<dyn SourceStore>) -> Self {
        Self { source }
    }

    /// All tables known to the source catalog.
    pub async fn get_tables(&self) -> Result<Vec<String>> {
        self.source.list_tables().await
    }

    /// Introspect one table; columns and keys are queried concurrently.
    pub async fn analyze_table(&self, table: &str) -> Result<TableSchema> {
        let (columns, primary_key, foreign_keys) = tokio::try_join!(
            self.source.columns(table),
            self.source.primary_key(table),
            self.source.foreign_keys(table),
        )?;
        Ok(TableSchema {
            table_name: table.to_string(),
            columns,
            primary_key,
            foreign_keys,
        })
    }

    /// Introspect several tables. A table that fails is logged and left out.
    pub async fn analyze_tables(&self, tables: &[String]) -> Vec<TableSchema> {
        let mut schemas = Vec::with_capacity(tables.len());
        for table in tables {
            match self.analyze_table(table).await {
                Ok(schema) => {
                    tracing::debug!(
                        "Analyzed {}: {} columns, {} foreign keys",
                        table,
                        schema.columns.len(),
                        schema.foreign_keys.len()
                    );
                    schemas.push(schema);
                }
                Err(e) => tracing::warn!("Failed to analyze table {}: {}", table, e),
            }
        }
        schemas
    }

    /// Introspect every table in the catalog.
    pub async fn analyze_all(&self) -> Result<Vec<TableSchema>> {
        let tables = self.get_tables().await?;
        Ok(self.analyze_tables(&tables).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SqliteSource;

    fn fixture() -> (tempfile::TempDir, Arc<dyn SourceStore>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.db");
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE musics (id INTEGER PRIMARY KEY, title VARCHAR(120) NOT NULL, tags TEXT);
            CREATE TABLE meditations (
                id INTEGER PRIMARY KEY,
                title TEXT,
                music_id INTEGER REFERENCES musics(id)
            );
            "#,
        )
        .unwrap();
        (dir, Arc::new(SqliteSource::new(&path)))
    }

    #[tokio::test]
    async fn test_analyze_table() {
        let (_dir, source) = fixture();
        let analyzer = SchemaAnalyzer::new(source);

        let schema = analyzer.analyze_table("meditations").await.unwrap();
        assert_eq!(schema.primary_key, vec!["id"]);
        assert_eq!(schema.columns.len(), 3);
        let fk = schema.foreign_key("music_id").unwrap();
        assert_eq!(fk.referenced_table, "musics");

        let musics = analyzer.analyze_table("musics").await.unwrap();
        assert_eq!(musics.column("title").unwrap().max_length, Some(120));
    }

    #[tokio::test]
    async fn test_analyze_tables_skips_failures() {
        let (_dir, source) = fixture();
        let analyzer = SchemaAnalyzer::new(source);

        let tables = vec![
            "musics".to_string(),
            "missing".to_string(),
            "bad name;".to_string(),
            "meditations".to_string(),
        ];
        let schemas = analyzer.analyze_tables(&tables).await;
        let names: Vec<_> = schemas.iter().map(|s| s.table_name.as_str()).collect();
        assert_eq!(names, vec!["musics", "meditations"]);
    }
}
