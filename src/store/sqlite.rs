use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{params, Connection, ErrorCode};
use rusqlite_migration::{Migrations, M};

use crate::app::{Result, TributaryError};
use crate::dedup::SeenSet;
use crate::fetcher::{ConditionalEntry, ValidatorKey};
use crate::store::{SeenCount, Store};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn is_corruption(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt)
    )
}

/// Open and read the header, so a garbage file fails here rather than
/// halfway through a migration.
fn open_checked(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.query_row("PRAGMA schema_version", [], |row| row.get::<_, i64>(0))?;
    Ok(conn)
}

/// `<name>.corrupt-<unix ts>` next to the original.
fn corrupt_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "tributary.db".to_string());
    path.with_file_name(format!("{}.corrupt-{}", name, Utc::now().timestamp()))
}

impl SqliteStore {
    /// Open (or create) the database at `path`. An unreadable file is moved
    /// aside and replaced with an empty database.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let conn = match open_checked(path) {
            Ok(conn) => conn,
            Err(e) if is_corruption(&e) && path.exists() => {
                let aside = corrupt_path(path);
                tracing::warn!(
                    path = %path.display(),
                    moved_to = %aside.display(),
                    error = %e,
                    "Cache database is corrupt; starting with an empty cache"
                );
                std::fs::rename(path, &aside)?;
                Connection::open(path)?
            }
            Err(e) => return Err(e.into()),
        };

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| {
            TributaryError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(1),
                Some(e.to_string()),
            ))
        })
    }

    fn run_migrations(&self) -> Result<()> {
        let migrations = Migrations::new(vec![
            M::up(include_str!("../../migrations/001-initial/up.sql")),
            M::up(include_str!(
                "../../migrations/002-validators-per-destination/up.sql"
            )),
        ]);

        let mut conn = self.lock()?;
        migrations
            .to_latest(&mut conn)
            .map_err(|e| TributaryError::Other(format!("Database migration failed: {}", e)))?;

        Ok(())
    }
}

impl Store for SqliteStore {
    fn load_seen(&self, destination: usize, source_url: &str, capacity: usize) -> Result<SeenSet> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT item_id FROM seen_ids
             WHERE destination = ?1 AND source_url = ?2
             ORDER BY position ASC",
        )?;

        let ids = stmt
            .query_map(params![destination as i64, source_url], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(SeenSet::from_ids(ids, capacity))
    }

    fn save_seen(&self, destination: usize, source_url: &str, seen: &SeenSet) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM seen_ids WHERE destination = ?1 AND source_url = ?2",
            params![destination as i64, source_url],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO seen_ids (destination, source_url, position, item_id)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (position, id) in seen.iter().enumerate() {
                stmt.execute(params![destination as i64, source_url, position as i64, id])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn seen_counts(&self) -> Result<Vec<SeenCount>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT destination, source_url, COUNT(*) FROM seen_ids
             GROUP BY destination, source_url
             ORDER BY destination ASC, source_url ASC",
        )?;

        let counts = stmt
            .query_map([], |row| {
                Ok(SeenCount {
                    destination: row.get::<_, i64>(0)? as usize,
                    source_url: row.get(1)?,
                    count: row.get::<_, i64>(2)? as usize,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(counts)
    }

    fn load_conditional(&self) -> Result<HashMap<ValidatorKey, ConditionalEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT destination, source_url, etag, last_modified FROM conditional_cache",
        )?;

        let entries = stmt
            .query_map([], |row| {
                Ok((
                    ValidatorKey {
                        destination: row.get::<_, i64>(0)? as usize,
                        url: row.get(1)?,
                    },
                    ConditionalEntry {
                        etag: row.get(2)?,
                        last_modified: row.get(3)?,
                    },
                ))
            })?
            .collect::<std::result::Result<HashMap<_, _>, _>>()?;

        Ok(entries)
    }

    fn save_conditional(&self, entries: &HashMap<ValidatorKey, ConditionalEntry>) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        tx.execute("DELETE FROM conditional_cache", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO conditional_cache (destination, source_url, etag, last_modified, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (key, entry) in entries.iter().filter(|(_, e)| !e.is_empty()) {
                stmt.execute(params![
                    key.destination as i64,
                    key.url,
                    entry.etag,
                    entry.last_modified,
                    now
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }
}
