use rusqlite::{Connection, Transaction};
use std::path::Path;
use tracing::debug;

use crate::error::Result;
use crate::schema::{self, DimensionTable};

/// Warehouse - the single store handle owned by a pipeline run.
///
/// Components never open their own connection; they borrow this one (or a
/// stage transaction started from it).
pub struct Warehouse {
    conn: Connection,
}

impl Warehouse {
    /// Open (or create) the warehouse database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for crash recovery
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        debug!(path = %path.display(), "opened warehouse");
        Ok(Warehouse { conn })
    }

    /// In-memory warehouse with the full schema (tests, dry runs)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let warehouse = Warehouse { conn };
        warehouse.setup()?;
        Ok(warehouse)
    }

    /// Create all warehouse tables and indexes if missing
    pub fn setup(&self) -> Result<()> {
        schema::create_tables(&self.conn)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Start a stage transaction. Dropping it without `commit()` rolls back.
    pub fn begin_stage(&mut self) -> Result<Transaction<'_>> {
        Ok(self.conn.transaction()?)
    }
}

// ============================================================================
// COUNTS
// ============================================================================

/// Total rows in a dimension table, all versions
pub fn count_versions(conn: &Connection, table: &DimensionTable) -> Result<i64> {
    let count = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table.name), [], |row| {
        row.get(0)
    })?;
    Ok(count)
}

/// Rows currently active in a dimension table
pub fn count_active(conn: &Connection, table: &DimensionTable) -> Result<i64> {
    let count = conn.query_row(
        &format!("SELECT COUNT(*) FROM {} WHERE is_active = 'Y'", table.name),
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn count_facts(conn: &Connection) -> Result<i64> {
    let count = conn.query_row("SELECT COUNT(*) FROM fact_donations", [], |row| row.get(0))?;
    Ok(count)
}
