//! SQLite-backed source store for relational dumps.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection, OpenFlags};

use super::{check_identifier, Result, SourceError, SourceQuery, SourceStore};
use crate::models::{parse_max_length, ColumnInfo, ForeignKey, SourceRow, SqlValue};

/// Legacy relational dump loaded into a SQLite file.
///
/// Opens a fresh read-only connection per operation; all queries run on the
/// blocking thread pool.
pub struct SqliteSource {
    db_path: PathBuf,
}

impl SqliteSource {
    pub fn new(db_path: &Path) -> Self {
        Self {
            db_path: db_path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn open(path: &Path) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(conn)
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Self::open(&path)?;
            f(&conn)
        })
        .await
        .map_err(|e| SourceError::Connection(format!("blocking task failed: {}", e)))?
    }
}

fn quote(ident: &str) -> Result<String> {
    Ok(format!("\"{}\"", check_identifier(ident)?))
}

fn to_sql_value(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::Integer(*i),
        SqlValue::Real(f) => Value::Real(*f),
        SqlValue::Text(s) => Value::Text(s.clone()),
        SqlValue::Blob(b) => Value::Blob(b.clone()),
    }
}

fn from_value_ref(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => SqlValue::Integer(i),
        ValueRef::Real(f) => SqlValue::Real(f),
        ValueRef::Text(t) => SqlValue::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => SqlValue::Blob(b.to_vec()),
    }
}

/// Build `WHERE`/`ORDER BY`/`LIMIT` clauses and their bound parameters.
fn build_clauses(query: &SourceQuery, paged: bool) -> Result<(String, Vec<Value>)> {
    let mut sql = String::new();
    let mut params = Vec::new();

    if !query.filters.is_empty() {
        let mut conditions = Vec::with_capacity(query.filters.len());
        for (column, value) in &query.filters {
            if value.is_null() {
                conditions.push(format!("{} IS NULL", quote(column)?));
            } else {
                params.push(to_sql_value(value));
                conditions.push(format!("{} = ?{}", quote(column)?, params.len()));
            }
        }
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }

    if !paged {
        return Ok((sql, params));
    }

    if let Some(order) = &query.order_by {
        sql.push_str(&format!(
            " ORDER BY {} {}",
            quote(&order.column)?,
            if order.descending { "DESC" } else { "ASC" }
        ));
    } else {
        // Stable paging needs a deterministic order.
        sql.push_str(" ORDER BY rowid ASC");
    }

    let limit = query.limit.map(|l| l as i64).unwrap_or(-1);
    sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, query.offset));

    Ok((sql, params))
}

fn table_info(conn: &Connection, table: &str) -> Result<Vec<(ColumnInfo, i64)>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote(table)?))?;
    let rows = stmt
        .query_map([], |row| {
            let data_type: String = row.get(2)?;
            let not_null: bool = row.get(3)?;
            Ok((
                ColumnInfo {
                    name: row.get(1)?,
                    max_length: parse_max_length(&data_type),
                    data_type: data_type.to_uppercase(),
                    nullable: !not_null,
                    default: row.get(4)?,
                },
                row.get::<_, i64>(5)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if rows.is_empty() {
        return Err(SourceError::UnknownTable(table.to_string()));
    }
    Ok(rows)
}

#[async_trait]
impl SourceStore for SqliteSource {
    fn describe(&self) -> String {
        format!("sqlite:{}", self.db_path.display())
    }

    async fn connect(&self) -> Result<()> {
        if !self.db_path.exists() {
            return Err(SourceError::Connection(format!(
                "database file not found: {}",
                self.db_path.display()
            )));
        }
        self.with_conn(|conn| {
            conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| {
                row.get::<_, i64>(0)
            })?;
            Ok(())
        })
        .await
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )?;
            let names = stmt
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(names)
        })
        .await
    }

    async fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let table = table.to_string();
        self.with_conn(move |conn| {
            Ok(table_info(conn, &table)?
                .into_iter()
                .map(|(col, _)| col)
                .collect())
        })
        .await
    }

    async fn primary_key(&self, table: &str) -> Result<Vec<String>> {
        let table = table.to_string();
        self.with_conn(move |conn| {
            let mut keyed: Vec<(i64, String)> = table_info(conn, &table)?
                .into_iter()
                .filter(|(_, pk)| *pk > 0)
                .map(|(col, pk)| (pk, col.name))
                .collect();
            keyed.sort();
            Ok(keyed.into_iter().map(|(_, name)| name).collect())
        })
        .await
    }

    async fn foreign_keys(&self, table: &str) -> Result<Vec<ForeignKey>> {
        let table = table.to_string();
        self.with_conn(move |conn| {
            let mut stmt =
                conn.prepare(&format!("PRAGMA foreign_key_list({})", quote(&table)?))?;
            let keys = stmt
                .query_map([], |row| {
                    Ok(ForeignKey {
                        referenced_table: row.get(2)?,
                        column_name: row.get(3)?,
                        referenced_column: row
                            .get::<_, Option<String>>(4)?
                            .unwrap_or_else(|| "id".to_string()),
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(keys)
        })
        .await
    }

    async fn count(&self, table: &str, query: &SourceQuery) -> Result<usize> {
        let sql_table = quote(table)?;
        let (clauses, params) = build_clauses(query, false)?;
        self.with_conn(move |conn| {
            let sql = format!("SELECT count(*) FROM {}{}", sql_table, clauses);
            let count: i64 = conn.query_row(&sql, params_from_iter(params.iter()), |row| {
                row.get(0)
            })?;
            Ok(count.max(0) as usize)
        })
        .await
    }

    async fn fetch(&self, table: &str, query: &SourceQuery) -> Result<Vec<SourceRow>> {
        let sql_table = quote(table)?;
        let (clauses, params) = build_clauses(query, true)?;
        self.with_conn(move |conn| {
            let sql = format!("SELECT * FROM {}{}", sql_table, clauses);
            let mut stmt = conn.prepare(&sql)?;
            let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
            let mut rows = stmt.query(params_from_iter(params.iter()))?;

            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let mut source_row = SourceRow::new();
                for (i, name) in names.iter().enumerate() {
                    source_row.insert(name, from_value_ref(row.get_ref(i)?));
                }
                out.push(source_row);
            }
            Ok(out)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn setup_db(dir: &Path) -> PathBuf {
        let path = dir.join("legacy.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE narrators_legacy (id INTEGER PRIMARY KEY, name VARCHAR(80) NOT NULL);
            CREATE TABLE meditations (
                id INTEGER PRIMARY KEY,
                title VARCHAR(255) NOT NULL,
                narrator INTEGER REFERENCES narrators_legacy(id),
                duration REAL DEFAULT 0
            );
            INSERT INTO narrators_legacy (id, name) VALUES (0, 'Anna'), (1, 'Ben');
            INSERT INTO meditations (id, title, narrator, duration) VALUES
                (1, 'Morning', 0, 300), (2, 'Evening', 1, 600.5), (3, 'Night', NULL, 900);
            "#,
        )
        .unwrap();
        path
    }

    #[tokio::test]
    async fn test_introspection() {
        let dir = tempdir().unwrap();
        let source = SqliteSource::new(&setup_db(dir.path()));
        source.connect().await.unwrap();

        let tables = source.list_tables().await.unwrap();
        assert_eq!(tables, vec!["meditations", "narrators_legacy"]);

        let columns = source.columns("meditations").await.unwrap();
        assert_eq!(columns.len(), 4);
        assert_eq!(columns[1].name, "title");
        assert_eq!(columns[1].max_length, Some(255));
        assert!(!columns[1].nullable);
        assert_eq!(columns[3].default.as_deref(), Some("0"));

        assert_eq!(source.primary_key("meditations").await.unwrap(), vec!["id"]);

        let fks = source.foreign_keys("meditations").await.unwrap();
        assert_eq!(fks.len(), 1);
        assert_eq!(fks[0].column_name, "narrator");
        assert_eq!(fks[0].referenced_table, "narrators_legacy");

        assert!(matches!(
            source.columns("missing").await,
            Err(SourceError::UnknownTable(_))
        ));
    }

    #[tokio::test]
    async fn test_paged_fetch_and_filters() {
        let dir = tempdir().unwrap();
        let source = SqliteSource::new(&setup_db(dir.path()));

        assert_eq!(source.count("meditations", &SourceQuery::new()).await.unwrap(), 3);

        let page = source
            .fetch("meditations", &SourceQuery::new().page(1, 1))
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].text("title").as_deref(), Some("Evening"));
        assert_eq!(page[0].real("duration"), Some(600.5));

        let filtered = source
            .fetch(
                "meditations",
                &SourceQuery::new().filter("narrator", SqlValue::Integer(0)),
            )
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].integer("id"), Some(1));

        let nulls = source
            .count("meditations", &SourceQuery::new().filter("narrator", SqlValue::Null))
            .await
            .unwrap();
        assert_eq!(nulls, 1);
    }

    #[tokio::test]
    async fn test_connect_missing_file_fails() {
        let dir = tempdir().unwrap();
        let source = SqliteSource::new(&dir.path().join("nope.db"));
        assert!(matches!(
            source.connect().await,
            Err(SourceError::Connection(_))
        ));
    }
}
