use rusqlite::{Connection, Result};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use crate::error::Error;

const SCHEMA_VERSION: i64 = 1;

pub struct Database {
    conn: Connection,
}

/// Connection shared by the ledger, review queue and orchestrator.
pub type SharedDatabase = Arc<Mutex<Database>>;

impl Database {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Database { conn };
        db.configure_pragmas()?;
        db.migrate_schema()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.configure_pragmas()?;
        db.migrate_schema()?;
        Ok(db)
    }

    pub fn into_shared(self) -> SharedDatabase {
        Arc::new(Mutex::new(self))
    }

    /// `synchronous = FULL`: a snapshot row must survive power loss before
    /// the mutation it describes is allowed to start.
    fn configure_pragmas(&self) -> Result<()> {
        self.conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = FULL;
             PRAGMA foreign_keys = ON;
             PRAGMA cache_size = -16000;
             PRAGMA busy_timeout = 5000;",
        )?;
        debug!("SQLite pragmas configured (WAL mode, synchronous FULL)");
        Ok(())
    }

    fn migrate_schema(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;

        if version > SCHEMA_VERSION {
            debug!(
                "Schema version {} is newer than {}, leaving tables untouched",
                version, SCHEMA_VERSION
            );
            return Ok(());
        }

        self.conn.execute_batch(include_str!("schema.sql"))?;
        debug!("SQLite schema initialized (version {})", SCHEMA_VERSION);
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

/// Lock the shared connection, turning a poisoned mutex into an error.
pub fn lock(db: &SharedDatabase) -> crate::error::Result<MutexGuard<'_, Database>> {
    db.lock()
        .map_err(|_| Error::Other("database mutex poisoned".to_string()))
}
