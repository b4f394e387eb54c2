use rusqlite::{Connection, Result};
use std::time::Duration;
use tracing::debug;

const SCHEMA_VERSION: i64 = 2;
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &str) -> Result<Self> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Open with a bound on how long any statement may wait for a lock.
    /// Waits past `timeout` fail with `SQLITE_BUSY`, which surfaces as a
    /// transient store error.
    pub fn open_with_timeout(path: &str, timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Database { conn };
        db.configure_pragmas(timeout)?;
        db.migrate_schema()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.configure_pragmas(DEFAULT_BUSY_TIMEOUT)?;
        db.migrate_schema()?;
        Ok(db)
    }

    fn configure_pragmas(&self, timeout: Duration) -> Result<()> {
        self.conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA cache_size = -64000;",
        )?;
        self.conn.busy_timeout(timeout)?;
        debug!(
            "SQLite pragmas configured (WAL mode, busy timeout {}ms)",
            timeout.as_millis()
        );
        Ok(())
    }

    /// Check schema version and migrate if needed.
    /// Older layouts are dropped; records are recomputable from the files.
    fn migrate_schema(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;

        if version >= SCHEMA_VERSION {
            return Ok(());
        }

        debug!(
            "Schema version {} < {}, recreating tables",
            version, SCHEMA_VERSION
        );
        self.conn.execute_batch(
            "DROP TABLE IF EXISTS record_token;
             DROP TABLE IF EXISTS record;
             DROP TABLE IF EXISTS ingest_job;
             DROP TABLE IF EXISTS extraction;
             DROP TABLE IF EXISTS store_meta;",
        )?;
        self.conn.execute_batch(include_str!("schema.sql"))?;
        debug!("SQLite schema initialized (version {})", SCHEMA_VERSION);
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn truncate_all(&self) -> Result<()> {
        self.conn.execute_batch(
            "DELETE FROM record_token;
             DELETE FROM record;
             DELETE FROM ingest_job;
             DELETE FROM extraction;
             UPDATE store_meta SET value = 0;",
        )?;
        debug!("All tables truncated");
        Ok(())
    }
}
