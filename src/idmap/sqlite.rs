//! SQLite snapshot store.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{EntityKind, IdMapSnapshot, IdMapStore, Phase, Result, SNAPSHOT_VERSION};

/// Keeps id maps in an embedded database, one row per mapping.
pub struct SqliteIdMapStore {
    db_path: PathBuf,
}

impl SqliteIdMapStore {
    pub fn new(db_path: &Path) -> Result<Self> {
        let store = Self {
            db_path: db_path.to_path_buf(),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn connect(&self) -> Result<Connection> {
        Ok(Connection::open(&self.db_path)?)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS id_maps (
                kind TEXT NOT NULL,
                source_key TEXT NOT NULL,
                target_id TEXT NOT NULL,
                PRIMARY KEY (kind, source_key)
            );
            CREATE TABLE IF NOT EXISTS completed_phases (
                phase TEXT PRIMARY KEY,
                position INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS snapshot_meta (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );
        "#,
        )?;
        Ok(())
    }
}

impl IdMapStore for SqliteIdMapStore {
    fn describe(&self) -> String {
        format!("sqlite:{}", self.db_path.display())
    }

    fn load(&self) -> Result<Option<IdMapSnapshot>> {
        let conn = self.connect()?;
        let meta: Option<(u32, String)> = conn
            .query_row(
                "SELECT version, updated_at FROM snapshot_meta WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((version, updated_at)) = meta else {
            return Ok(None);
        };

        let mut snapshot = IdMapSnapshot {
            version,
            updated_at: DateTime::parse_from_rfc3339(&updated_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            ..Default::default()
        };

        let mut stmt = conn.prepare("SELECT phase FROM completed_phases ORDER BY position")?;
        let phases = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        snapshot.completed_phases = phases
            .iter()
            .filter_map(|p| Phase::ORDER.into_iter().find(|phase| phase.as_str() == p))
            .collect();

        let mut stmt = conn.prepare("SELECT kind, source_key, target_id FROM id_maps")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for (kind, key, id) in rows {
            let kind: EntityKind = kind.parse()?;
            snapshot.maps.get_mut(kind).insert(key, id);
        }

        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &IdMapSnapshot) -> Result<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM id_maps", [])?;
        tx.execute("DELETE FROM completed_phases", [])?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO id_maps (kind, source_key, target_id) VALUES (?1, ?2, ?3)",
            )?;
            for kind in EntityKind::ALL {
                for (key, id) in snapshot.maps.get(kind).iter() {
                    insert.execute(params![kind.as_str(), key, id])?;
                }
            }
            let mut insert_phase =
                tx.prepare("INSERT INTO completed_phases (phase, position) VALUES (?1, ?2)")?;
            for (position, phase) in snapshot.completed_phases.iter().enumerate() {
                insert_phase.execute(params![phase.as_str(), position as i64])?;
            }
        }
        tx.execute(
            r#"
            INSERT INTO snapshot_meta (id, version, updated_at) VALUES (1, ?1, ?2)
            ON CONFLICT(id) DO UPDATE SET
                version = excluded.version,
                updated_at = excluded.updated_at
            "#,
            params![SNAPSHOT_VERSION, snapshot.updated_at.to_rfc3339()],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            "DELETE FROM id_maps; DELETE FROM completed_phases; DELETE FROM snapshot_meta;",
        )?;
        Ok(())
    }
}
