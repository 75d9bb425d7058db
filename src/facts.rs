// 📊 Fact Loader - resolve surrogate keys and insert donation facts
//
// Each fact row is handled on its own. Expected problems (missing payment_id,
// no active dimension version, unparseable date, bad amount, per-row
// constraint violations) become a RowOutcome and the loop moves on. Only
// store-level failures (I/O, locking, corruption, read-only) abort the batch.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde::Serialize;
use std::fmt;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::models::FactRow;
use crate::schema::{DIM_CUSTOMER, DIM_PAYMENT_METHOD, DIM_REGION};
use crate::temporal::format_timestamp;

// ============================================================================
// ROW OUTCOME
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    /// A field the fact table cannot do without
    MissingField(&'static str),

    /// Dimensions with no active (or, for dates, no calendar) row
    MissingDimensions(Vec<&'static str>),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MissingField(field) => write!(f, "missing field {}", field),
            SkipReason::MissingDimensions(dims) => {
                write!(f, "missing dimension keys: {}", dims.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RowOutcome {
    /// New fact row inserted
    Loaded,

    /// payment_id already in the fact table; conflict-safe insert did nothing
    AlreadyPresent,

    /// Expected data gap, row not attempted
    Skipped(SkipReason),

    /// Row attempted and rejected (bad value, constraint violation)
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolvedKeys {
    pub customer_key: i64,
    pub date_key: i64,
    pub payment_method_key: i64,
    pub region_key: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FactLoadSummary {
    pub loaded: usize,
    pub already_present: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl FactLoadSummary {
    fn record(&mut self, outcome: &RowOutcome) {
        match outcome {
            RowOutcome::Loaded => self.loaded += 1,
            RowOutcome::AlreadyPresent => self.already_present += 1,
            RowOutcome::Skipped(_) => self.skipped += 1,
            RowOutcome::Failed(_) => self.failed += 1,
        }
    }

    /// Rows that did not make it into the fact table for a reason
    pub fn skipped_total(&self) -> usize {
        self.skipped + self.failed
    }

    pub fn total(&self) -> usize {
        self.loaded + self.already_present + self.skipped + self.failed
    }

    pub fn summary(&self) -> String {
        format!(
            "Loaded: {}, Already present: {}, Skipped: {} ({} missing keys, {} failed)",
            self.loaded,
            self.already_present,
            self.skipped_total(),
            self.skipped,
            self.failed
        )
    }
}

// ============================================================================
// VALUE NORMALIZATION
// ============================================================================

/// Calendar day of an ISO-like payment date
pub fn normalize_payment_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt.date());
        }
    }

    None
}

/// Amount as a finite number; numeric strings are accepted
pub fn parse_amount(value: &serde_json::Value) -> Option<f64> {
    let amount = match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    amount.is_finite().then_some(amount)
}

// ============================================================================
// KEY RESOLUTION
// ============================================================================

fn lookup(conn: &Connection, sql: &str, value: Option<&str>) -> rusqlite::Result<Option<i64>> {
    match value {
        Some(v) => conn
            .prepare_cached(sql)?
            .query_row([v], |row| row.get(0))
            .optional(),
        None => Ok(None),
    }
}

/// Resolve the four surrogate keys of a fact row against active dimension
/// versions and the calendar. Err lists every dimension that did not resolve.
pub fn resolve_keys(
    conn: &Connection,
    row: &FactRow,
) -> rusqlite::Result<std::result::Result<ResolvedKeys, SkipReason>> {
    let customer_key = lookup(conn, &DIM_CUSTOMER.active_key_sql(), row.customer_id.as_deref())?;
    let region_key = lookup(conn, &DIM_REGION.active_key_sql(), Some(row.region.as_str()))?;
    let payment_method_key = lookup(
        conn,
        &DIM_PAYMENT_METHOD.active_key_sql(),
        row.payment_method.as_deref(),
    )?;

    let full_date = row
        .payment_date
        .as_deref()
        .and_then(normalize_payment_date)
        .map(|d| d.format("%Y-%m-%d").to_string());
    let date_key = lookup(
        conn,
        "SELECT date_id FROM dim_date WHERE full_date = ?1",
        full_date.as_deref(),
    )?;

    match (customer_key, region_key, payment_method_key, date_key) {
        (Some(customer_key), Some(region_key), Some(payment_method_key), Some(date_key)) => {
            Ok(Ok(ResolvedKeys {
                customer_key,
                date_key,
                payment_method_key,
                region_key,
            }))
        }
        _ => {
            let missing = [
                ("customer", customer_key.is_none()),
                ("region", region_key.is_none()),
                ("payment_method", payment_method_key.is_none()),
                ("date", date_key.is_none()),
            ]
            .into_iter()
            .filter_map(|(name, absent)| absent.then_some(name))
            .collect();
            Ok(Err(SkipReason::MissingDimensions(missing)))
        }
    }
}

// ============================================================================
// LOAD
// ============================================================================

/// Store-level failures that must abort the whole fact batch
fn is_fatal(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => matches!(
            e.code,
            ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::SystemIoFailure
                | ErrorCode::DatabaseCorrupt
                | ErrorCode::NotADatabase
                | ErrorCode::DiskFull
                | ErrorCode::CannotOpen
                | ErrorCode::ReadOnly
                | ErrorCode::OutOfMemory
                | ErrorCode::PermissionDenied
                | ErrorCode::FileLockingProtocolFailed
        ),
        _ => false,
    }
}

/// Load one fact row. Store errors are returned as-is for the caller to classify.
pub fn load_fact(conn: &Connection, row: &FactRow, loaded_at: &str) -> rusqlite::Result<RowOutcome> {
    let payment_id = match row.payment_id.as_deref() {
        Some(id) => id,
        None => return Ok(RowOutcome::Skipped(SkipReason::MissingField("payment_id"))),
    };

    let keys = match resolve_keys(conn, row)? {
        Ok(keys) => keys,
        Err(reason) => return Ok(RowOutcome::Skipped(reason)),
    };

    let amount = match parse_amount(&row.amount) {
        Some(amount) => amount,
        None => return Ok(RowOutcome::Failed(format!("invalid amount {}", row.amount))),
    };

    let inserted = conn
        .prepare_cached(
            "INSERT INTO fact_donations (
                payment_id, customer_key, date_key, payment_method_key, region_key,
                amount, status, loaded_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT (payment_id) DO NOTHING",
        )?
        .execute(params![
            payment_id,
            keys.customer_key,
            keys.date_key,
            keys.payment_method_key,
            keys.region_key,
            amount,
            row.status,
            loaded_at,
        ])?;

    Ok(if inserted == 0 {
        RowOutcome::AlreadyPresent
    } else {
        RowOutcome::Loaded
    })
}

/// Load every fact row in order. Per-row problems are counted; a fatal
/// store error is returned and the caller rolls the stage back.
pub fn load_facts(conn: &Connection, rows: &[FactRow]) -> Result<FactLoadSummary> {
    info!(rows = rows.len(), "loading fact records");

    let loaded_at = format_timestamp(Utc::now());
    let mut summary = FactLoadSummary::default();

    for row in rows {
        let outcome = match load_fact(conn, row, &loaded_at) {
            Ok(outcome) => outcome,
            Err(e) if is_fatal(&e) => {
                error!(payment_id = row.label(), error = %e, "fatal store error during fact load");
                return Err(e.into());
            }
            Err(e) => RowOutcome::Failed(e.to_string()),
        };

        match &outcome {
            RowOutcome::Loaded => debug!(payment_id = row.label(), "fact loaded"),
            RowOutcome::AlreadyPresent => debug!(payment_id = row.label(), "fact already present"),
            RowOutcome::Skipped(reason) => {
                warn!(payment_id = row.label(), "Skipping row: {}", reason)
            }
            RowOutcome::Failed(msg) => {
                error!(payment_id = row.label(), "Error loading fact row: {}", msg)
            }
        }

        summary.record(&outcome);
    }

    info!("Fact table load complete. {}", summary.summary());
    Ok(summary)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{count_facts, Warehouse};
    use crate::error::EtlError;
    use crate::models::{CustomerDim, PaymentMethodDim, RegionDim};
    use crate::schema::seed_date_dimension;
    use crate::scd2::{load_dimension, Scd2Policy};
    use serde_json::json;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    /// Warehouse with CUST001 / London / PayPal active and January 2023 in dim_date
    fn seeded_warehouse() -> Warehouse {
        let warehouse = Warehouse::open_in_memory().unwrap();
        let conn = warehouse.connection();

        let customers = vec![CustomerDim {
            customer_id: Some("CUST001".to_string()),
            email: None,
            shirt_size: None,
            donates_to_charity: None,
            bikes_to_work: None,
        }];
        let now = Utc::now();
        load_dimension(conn, &customers, Scd2Policy::AlwaysVersion, now).unwrap();
        load_dimension(conn, &[RegionDim::new("London")], Scd2Policy::AlwaysVersion, now).unwrap();
        load_dimension(
            conn,
            &[PaymentMethodDim { payment_method: Some("PayPal".to_string()) }],
            Scd2Policy::AlwaysVersion,
            now,
        )
        .unwrap();
        seed_date_dimension(conn, d("2023-01-01"), d("2023-01-31")).unwrap();

        warehouse
    }

    fn fact(payment_id: Option<&str>, region: &str, date: &str) -> FactRow {
        FactRow {
            payment_id: payment_id.map(str::to_string),
            customer_id: Some("CUST001".to_string()),
            amount: json!(25.0),
            status: Some("success".to_string()),
            payment_method: Some("PayPal".to_string()),
            payment_date: Some(date.to_string()),
            region: region.to_string(),
        }
    }

    #[test]
    fn test_load_and_resolve() {
        let warehouse = seeded_warehouse();
        let conn = warehouse.connection();

        let summary = load_facts(conn, &[fact(Some("PAY001"), "London", "2023-01-15")]).unwrap();

        assert_eq!(summary.loaded, 1);
        assert_eq!(summary.skipped_total(), 0);

        let (date_key, amount): (i64, f64) = conn
            .query_row(
                "SELECT date_key, amount FROM fact_donations WHERE payment_id = 'PAY001'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(date_key, 20230115);
        assert_eq!(amount, 25.0);
    }

    #[test]
    fn test_fact_load_is_idempotent() {
        let warehouse = seeded_warehouse();
        let conn = warehouse.connection();
        let rows = vec![fact(Some("PAY001"), "London", "2023-01-15")];

        let first = load_facts(conn, &rows).unwrap();
        let second = load_facts(conn, &rows).unwrap();

        assert_eq!(first.loaded, 1);
        assert_eq!(second.loaded, 0);
        assert_eq!(second.already_present, 1);
        assert_eq!(second.skipped_total(), 0);
        assert_eq!(count_facts(conn).unwrap(), 1);
    }

    #[test]
    fn test_duplicate_within_batch() {
        let warehouse = seeded_warehouse();
        let conn = warehouse.connection();
        let row = fact(Some("PAY001"), "London", "2023-01-15");

        let summary = load_facts(conn, &[row.clone(), row]).unwrap();

        assert_eq!(summary.loaded, 1);
        assert_eq!(summary.already_present, 1);
        assert_eq!(count_facts(conn).unwrap(), 1);
    }

    #[test]
    fn test_skip_on_missing_region() {
        let warehouse = seeded_warehouse();
        let conn = warehouse.connection();

        let rows = vec![
            fact(Some("PAY001"), "Atlantis", "2023-01-15"),
            fact(Some("PAY002"), "London", "2023-01-16"),
        ];
        let summary = load_facts(conn, &rows).unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.loaded, 1);
        assert_eq!(count_facts(conn).unwrap(), 1);
    }

    #[test]
    fn test_resolve_reports_every_missing_dimension() {
        let warehouse = seeded_warehouse();
        let conn = warehouse.connection();

        let mut row = fact(Some("PAY001"), "Atlantis", "2031-06-01");
        row.customer_id = None;

        let resolved = resolve_keys(conn, &row).unwrap();
        assert_eq!(
            resolved,
            Err(SkipReason::MissingDimensions(vec!["customer", "region", "date"]))
        );
    }

    #[test]
    fn test_missing_payment_id_skipped() {
        let warehouse = seeded_warehouse();
        let conn = warehouse.connection();

        let outcome = load_fact(conn, &fact(None, "London", "2023-01-15"), "now").unwrap();
        assert_eq!(outcome, RowOutcome::Skipped(SkipReason::MissingField("payment_id")));
    }

    #[test]
    fn test_invalid_amount_fails_row_only() {
        let warehouse = seeded_warehouse();
        let conn = warehouse.connection();

        let mut bad = fact(Some("PAY001"), "London", "2023-01-15");
        bad.amount = json!("lots");
        let mut textual = fact(Some("PAY002"), "London", "2023-01-15");
        textual.amount = json!(" 12.50 ");

        let summary = load_facts(conn, &[bad, textual]).unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.loaded, 1);
        assert_eq!(summary.skipped_total(), 1);
    }

    #[test]
    fn test_constraint_violation_is_per_row() {
        let warehouse = seeded_warehouse();
        let conn = warehouse.connection();
        conn.execute_batch(
            "CREATE TRIGGER reject_bad BEFORE INSERT ON fact_donations
             WHEN NEW.payment_id = 'BAD'
             BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
        )
        .unwrap();

        let rows = vec![
            fact(Some("BAD"), "London", "2023-01-15"),
            fact(Some("PAY002"), "London", "2023-01-15"),
        ];
        let summary = load_facts(conn, &rows).unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.loaded, 1);
    }

    #[test]
    fn test_read_only_store_is_fatal() {
        let warehouse = seeded_warehouse();
        let conn = warehouse.connection();
        conn.execute_batch("PRAGMA query_only = ON;").unwrap();

        let err = load_facts(conn, &[fact(Some("PAY001"), "London", "2023-01-15")]).unwrap_err();
        assert!(matches!(err, EtlError::Database(_)));
    }

    #[test]
    fn test_timestamp_payment_dates_resolve() {
        let warehouse = seeded_warehouse();
        let conn = warehouse.connection();

        let rows = vec![
            fact(Some("P1"), "London", "2023-01-15T10:30:00Z"),
            fact(Some("P2"), "London", "2023-01-16T08:00:00"),
            fact(Some("P3"), "London", "2023-01-17 23:59:59.250"),
            fact(Some("P4"), "London", "15/01/2023"),
        ];
        let summary = load_facts(conn, &rows).unwrap();

        assert_eq!(summary.loaded, 3);
        assert_eq!(summary.skipped, 1);
    }

    #[test]
    fn test_normalize_payment_date() {
        assert_eq!(normalize_payment_date("2023-01-15"), Some(d("2023-01-15")));
        assert_eq!(normalize_payment_date(" 2023-01-15 "), Some(d("2023-01-15")));
        assert_eq!(normalize_payment_date("2023-01-15T10:30:00+01:00"), Some(d("2023-01-15")));
        assert_eq!(normalize_payment_date("2023-01-15T10:30:00.123"), Some(d("2023-01-15")));
        assert_eq!(normalize_payment_date("not a date"), None);
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount(&json!(100.5)), Some(100.5));
        assert_eq!(parse_amount(&json!(50)), Some(50.0));
        assert_eq!(parse_amount(&json!("75.25")), Some(75.25));
        assert_eq!(parse_amount(&json!("NaN")), None);
        assert_eq!(parse_amount(&json!(null)), None);
        assert_eq!(parse_amount(&json!(true)), None);
    }
}
