// 🏛️ Warehouse Schema - table metadata, DDL and the calendar dimension
//
// Every SQL statement issued against a dimension table is generated from
// the static metadata below. Identifiers never come from input data and
// every value is a bound parameter.

use chrono::{Datelike, NaiveDate};
use rusqlite::{params, Connection};

use crate::error::Result;

// ============================================================================
// DIMENSION TABLE METADATA
// ============================================================================

/// Shape of an SCD2 dimension table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionTable {
    pub name: &'static str,
    pub surrogate_key: &'static str,
    pub natural_key: &'static [&'static str],
    pub attributes: &'static [&'static str],
}

pub const DIM_REGION: DimensionTable = DimensionTable {
    name: "dim_region",
    surrogate_key: "region_key",
    natural_key: &["region"],
    attributes: &["is_london"],
};

pub const DIM_CUSTOMER: DimensionTable = DimensionTable {
    name: "dim_customer",
    surrogate_key: "customer_key",
    natural_key: &["customer_id"],
    attributes: &["email", "shirt_size", "donates_to_charity", "bikes_to_work"],
};

pub const DIM_PAYMENT_METHOD: DimensionTable = DimensionTable {
    name: "dim_payment_method",
    surrogate_key: "payment_method_key",
    natural_key: &["payment_method"],
    attributes: &[],
};

/// All SCD2 dimensions, in load order
pub const DIMENSIONS: [&DimensionTable; 3] = [&DIM_REGION, &DIM_CUSTOMER, &DIM_PAYMENT_METHOD];

impl DimensionTable {
    /// Resolve a CLI alias ("region", "customer", "payment-method") or table name
    pub fn by_alias(alias: &str) -> Option<&'static DimensionTable> {
        match alias.trim().to_lowercase().as_str() {
            "region" | "dim_region" => Some(&DIM_REGION),
            "customer" | "dim_customer" => Some(&DIM_CUSTOMER),
            "payment-method" | "payment_method" | "dim_payment_method" => {
                Some(&DIM_PAYMENT_METHOD)
            }
            _ => None,
        }
    }

    /// Natural key columns followed by attribute columns
    pub fn source_columns(&self) -> Vec<&'static str> {
        self.natural_key
            .iter()
            .chain(self.attributes.iter())
            .copied()
            .collect()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.natural_key.contains(&column) || self.attributes.contains(&column)
    }

    /// "k1 = ?{offset+1} AND k2 = ?{offset+2}"
    fn key_predicate(&self, offset: usize) -> String {
        self.natural_key
            .iter()
            .enumerate()
            .map(|(i, k)| format!("{} = ?{}", k, offset + i + 1))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    /// Surrogate key, start date and attributes of the active version; binds the natural key
    pub fn select_active_sql(&self) -> String {
        let mut columns = vec![self.surrogate_key, "effective_start_date"];
        columns.extend(self.attributes.iter().copied());
        format!(
            "SELECT {} FROM {} WHERE {} AND is_active = 'Y'",
            columns.join(", "),
            self.name,
            self.key_predicate(0)
        )
    }

    /// Surrogate key lookup used by the fact loader
    pub fn active_key_sql(&self) -> String {
        format!(
            "SELECT {} FROM {} WHERE {} AND is_active = 'Y'",
            self.surrogate_key,
            self.name,
            self.key_predicate(0)
        )
    }

    /// Binds ?1 = end timestamp, then the natural key
    pub fn expire_sql(&self) -> String {
        format!(
            "UPDATE {} SET effective_end_date = ?1, is_active = 'N' WHERE {} AND is_active = 'Y'",
            self.name,
            self.key_predicate(1)
        )
    }

    /// Binds every source column in `source_columns()` order, then the start timestamp
    pub fn insert_sql(&self) -> String {
        let columns = self.source_columns();
        let placeholders: Vec<String> = (1..=columns.len() + 1).map(|i| format!("?{}", i)).collect();
        format!(
            "INSERT INTO {} ({}, effective_start_date, effective_end_date, is_active) \
             VALUES ({}, NULL, 'Y')",
            self.name,
            columns.join(", "),
            placeholders.join(", ")
        )
    }

    /// All versions of one natural key, oldest first
    pub fn history_sql(&self) -> String {
        let mut columns = vec![self.surrogate_key];
        columns.extend(self.source_columns());
        columns.extend(["effective_start_date", "effective_end_date", "is_active"]);
        format!(
            "SELECT {} FROM {} WHERE {} ORDER BY {}",
            columns.join(", "),
            self.name,
            self.key_predicate(0),
            self.surrogate_key
        )
    }
}

// ============================================================================
// DDL
// ============================================================================

pub fn create_tables(conn: &Connection) -> Result<()> {
    // ==========================================================================
    // SCD2 dimensions
    // ==========================================================================
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS dim_region (
            region_key INTEGER PRIMARY KEY AUTOINCREMENT,
            region TEXT NOT NULL,
            is_london INTEGER NOT NULL DEFAULT 0,
            effective_start_date TEXT NOT NULL,
            effective_end_date TEXT,
            is_active TEXT NOT NULL DEFAULT 'Y' CHECK (is_active IN ('Y', 'N'))
        );

        CREATE TABLE IF NOT EXISTS dim_customer (
            customer_key INTEGER PRIMARY KEY AUTOINCREMENT,
            customer_id TEXT NOT NULL,
            email TEXT,
            shirt_size TEXT,
            donates_to_charity TEXT,
            bikes_to_work TEXT,
            effective_start_date TEXT NOT NULL,
            effective_end_date TEXT,
            is_active TEXT NOT NULL DEFAULT 'Y' CHECK (is_active IN ('Y', 'N'))
        );

        CREATE TABLE IF NOT EXISTS dim_payment_method (
            payment_method_key INTEGER PRIMARY KEY AUTOINCREMENT,
            payment_method TEXT NOT NULL,
            effective_start_date TEXT NOT NULL,
            effective_end_date TEXT,
            is_active TEXT NOT NULL DEFAULT 'Y' CHECK (is_active IN ('Y', 'N'))
        );",
    )?;

    // ==========================================================================
    // Calendar dimension (pre-populated, read-only for the loader)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS dim_date (
            date_id INTEGER PRIMARY KEY,
            full_date TEXT UNIQUE NOT NULL,
            year INTEGER NOT NULL,
            quarter INTEGER NOT NULL,
            month INTEGER NOT NULL,
            day INTEGER NOT NULL,
            day_of_week INTEGER NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Fact table
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS fact_donations (
            fact_key INTEGER PRIMARY KEY AUTOINCREMENT,
            payment_id TEXT NOT NULL UNIQUE,
            customer_key INTEGER NOT NULL REFERENCES dim_customer(customer_key),
            date_key INTEGER NOT NULL REFERENCES dim_date(date_id),
            payment_method_key INTEGER NOT NULL REFERENCES dim_payment_method(payment_method_key),
            region_key INTEGER NOT NULL REFERENCES dim_region(region_key),
            amount REAL NOT NULL,
            status TEXT,
            loaded_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Operational log (written by extraction)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS file_processing_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_name TEXT NOT NULL,
            checksum TEXT,
            record_count INTEGER NOT NULL,
            processing_time_seconds REAL NOT NULL,
            status TEXT NOT NULL,
            error_message TEXT,
            processed_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // At most one active version per natural key, enforced by the store
    // ==========================================================================
    for table in DIMENSIONS {
        conn.execute(
            &format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_{name}_active ON {name}({keys}) WHERE is_active = 'Y'",
                name = table.name,
                keys = table.natural_key.join(", ")
            ),
            [],
        )?;
    }

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_file_log_name ON file_processing_log(file_name, checksum)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// DATE DIMENSION
// ============================================================================

/// Surrogate key of a calendar day: yyyymmdd
pub fn date_id(date: NaiveDate) -> i64 {
    (date.year() as i64) * 10_000 + (date.month() as i64) * 100 + date.day() as i64
}

/// Insert one row per day in `from..=to`; existing days are left alone.
/// Returns the number of rows inserted.
pub fn seed_date_dimension(conn: &Connection, from: NaiveDate, to: NaiveDate) -> Result<usize> {
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO dim_date (date_id, full_date, year, quarter, month, day, day_of_week)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;

    let mut inserted = 0;
    for day in from.iter_days().take_while(|d| *d <= to) {
        inserted += stmt.execute(params![
            date_id(day),
            day.format("%Y-%m-%d").to_string(),
            day.year(),
            (day.month0() / 3 + 1) as i64,
            day.month(),
            day.day(),
            day.weekday().number_from_monday(),
        ])?;
    }

    Ok(inserted)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_generated_sql_uses_metadata() {
        assert_eq!(
            DIM_REGION.select_active_sql(),
            "SELECT region_key, effective_start_date, is_london FROM dim_region \
             WHERE region = ?1 AND is_active = 'Y'"
        );
        assert_eq!(
            DIM_PAYMENT_METHOD.expire_sql(),
            "UPDATE dim_payment_method SET effective_end_date = ?1, is_active = 'N' \
             WHERE payment_method = ?2 AND is_active = 'Y'"
        );
        assert_eq!(
            DIM_REGION.insert_sql(),
            "INSERT INTO dim_region (region, is_london, effective_start_date, effective_end_date, is_active) \
             VALUES (?1, ?2, ?3, NULL, 'Y')"
        );
    }

    #[test]
    fn test_by_alias() {
        assert_eq!(DimensionTable::by_alias("region"), Some(&DIM_REGION));
        assert_eq!(DimensionTable::by_alias("Payment-Method"), Some(&DIM_PAYMENT_METHOD));
        assert_eq!(DimensionTable::by_alias("dim_customer"), Some(&DIM_CUSTOMER));
        assert!(DimensionTable::by_alias("fact_donations").is_none());
    }

    #[test]
    fn test_create_tables_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        create_tables(&conn).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name LIKE 'dim_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 4);
    }

    #[test]
    fn test_active_unique_index_rejects_second_active_row() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();

        conn.execute(
            "INSERT INTO dim_payment_method (payment_method, effective_start_date) VALUES ('PayPal', 'x')",
            [],
        )
        .unwrap();
        let second = conn.execute(
            "INSERT INTO dim_payment_method (payment_method, effective_start_date) VALUES ('PayPal', 'y')",
            [],
        );
        assert!(second.is_err());
    }

    #[test]
    fn test_seed_date_dimension() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();

        let inserted = seed_date_dimension(&conn, d("2023-01-01"), d("2023-01-31")).unwrap();
        assert_eq!(inserted, 31);

        // Overlapping range only adds the new days
        let inserted = seed_date_dimension(&conn, d("2023-01-15"), d("2023-02-15")).unwrap();
        assert_eq!(inserted, 15);

        let (id, quarter): (i64, i64) = conn
            .query_row(
                "SELECT date_id, quarter FROM dim_date WHERE full_date = '2023-02-15'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(id, 20230215);
        assert_eq!(quarter, 1);
    }

    #[test]
    fn test_date_id() {
        assert_eq!(date_id(d("2023-01-15")), 20230115);
        assert_eq!(date_id(d("1999-12-31")), 19991231);
    }
}
