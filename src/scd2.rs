// 🕰️ SCD2 Upsert Engine - Slowly Changing Dimension Type 2
//
// One generic routine over {table, natural key columns, record}:
//   1. look up the active version for the natural key
//   2. if found, expire it (end date = now, is_active = 'N')
//   3. insert the candidate as the new active version (start date = now)
//
// Under the default policy step 2 always runs when an active version exists,
// even if nothing changed, so identical re-loads add history rows.
// `Scd2Policy::SkipUnchanged` compares attributes first and leaves the
// store untouched when they match.
//
// The version timestamp is never earlier than the active version's start,
// so an expired row cannot end before it began.

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde::Serialize;
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::{EtlError, Result};
use crate::models::DimensionRecord;
use crate::schema::DimensionTable;
use crate::temporal::{format_timestamp, parse_timestamp};

// ============================================================================
// POLICY & OUTCOME
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Scd2Policy {
    /// Expire and re-insert on every upsert that finds an active version
    #[default]
    AlwaysVersion,

    /// Keep the active version when its attributes equal the candidate's
    SkipUnchanged,
}

impl FromStr for Scd2Policy {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "always" | "always-version" => Ok(Scd2Policy::AlwaysVersion),
            "skip-unchanged" | "skip_unchanged" => Ok(Scd2Policy::SkipUnchanged),
            other => Err(EtlError::Config(format!("unknown SCD2 policy '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No active version existed
    Inserted { surrogate_key: i64 },

    /// Active version(s) expired and a new one inserted
    Versioned { expired: usize, surrogate_key: i64 },

    /// Active version kept as-is (SkipUnchanged only)
    Unchanged { surrogate_key: i64 },
}

impl UpsertOutcome {
    pub fn surrogate_key(&self) -> i64 {
        match self {
            UpsertOutcome::Inserted { surrogate_key }
            | UpsertOutcome::Versioned { surrogate_key, .. }
            | UpsertOutcome::Unchanged { surrogate_key } => *surrogate_key,
        }
    }
}

/// Aggregate outcome of loading one dimension row set
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DimensionLoadStats {
    pub table: String,
    pub candidates: usize,
    pub inserted: usize,
    pub versioned: usize,
    pub unchanged: usize,
}

impl DimensionLoadStats {
    fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted { .. } => self.inserted += 1,
            UpsertOutcome::Versioned { .. } => self.versioned += 1,
            UpsertOutcome::Unchanged { .. } => self.unchanged += 1,
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{}: {} candidates → {} new, {} new versions, {} unchanged",
            self.table, self.candidates, self.inserted, self.versioned, self.unchanged
        )
    }
}

// ============================================================================
// UPSERT
// ============================================================================

/// Order candidate values by the table's source columns.
/// Unknown columns are rejected; a missing or NULL natural key is rejected;
/// missing attributes become NULL.
fn bind_columns(table: &DimensionTable, record: &[(&str, Value)]) -> Result<Vec<Value>> {
    if let Some((column, _)) = record.iter().find(|(c, _)| !table.has_column(c)) {
        return Err(EtlError::UnknownColumn {
            table: table.name.to_string(),
            column: column.to_string(),
        });
    }

    table
        .source_columns()
        .into_iter()
        .map(|column| {
            let value = record
                .iter()
                .find(|(c, _)| *c == column)
                .map(|(_, v)| v.clone())
                .unwrap_or(Value::Null);

            if value == Value::Null && table.natural_key.contains(&column) {
                return Err(EtlError::MissingNaturalKey {
                    table: table.name.to_string(),
                    column: column.to_string(),
                });
            }
            Ok(value)
        })
        .collect()
}

/// SCD2 upsert of one candidate record into `table` at time `now`
pub fn upsert(
    conn: &Connection,
    table: &DimensionTable,
    record: &[(&str, Value)],
    policy: Scd2Policy,
    now: DateTime<Utc>,
) -> Result<UpsertOutcome> {
    let values = bind_columns(table, record)?;
    let key_len = table.natural_key.len();
    let (key_values, attribute_values) = values.split_at(key_len);

    // 1. Active version(s) for this natural key
    let mut select = conn.prepare_cached(&table.select_active_sql())?;
    let active: Vec<(i64, String, Vec<Value>)> = select
        .query_map(params_from_iter(key_values.iter()), |row| {
            let key: i64 = row.get(0)?;
            let start: String = row.get(1)?;
            let mut attrs = Vec::with_capacity(table.attributes.len());
            for i in 0..table.attributes.len() {
                attrs.push(row.get::<_, Value>(i + 2)?);
            }
            Ok((key, start, attrs))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if policy == Scd2Policy::SkipUnchanged {
        if let [(surrogate_key, _, attrs)] = active.as_slice() {
            if attrs.as_slice() == attribute_values {
                debug!(table = table.name, surrogate_key, "active version unchanged");
                return Ok(UpsertOutcome::Unchanged {
                    surrogate_key: *surrogate_key,
                });
            }
        }
    }

    let latest_start = active
        .iter()
        .filter_map(|(_, start, _)| parse_timestamp(start))
        .max();
    let ts = match latest_start {
        Some(start) if start > now => {
            debug!(table = table.name, "clock behind active version, using its start");
            format_timestamp(start)
        }
        _ => format_timestamp(now),
    };

    // 2. Expire
    let mut expired = 0;
    if !active.is_empty() {
        let mut params: Vec<Value> = Vec::with_capacity(key_len + 1);
        params.push(Value::Text(ts.clone()));
        params.extend(key_values.iter().cloned());
        expired = conn
            .prepare_cached(&table.expire_sql())?
            .execute(params_from_iter(params.iter()))?;
    }

    // 3. Insert the new active version
    let mut params = values.clone();
    params.push(Value::Text(ts));
    conn.prepare_cached(&table.insert_sql())?
        .execute(params_from_iter(params.iter()))?;
    let surrogate_key = conn.last_insert_rowid();

    debug!(table = table.name, surrogate_key, expired, "upserted dimension version");

    if expired > 0 {
        Ok(UpsertOutcome::Versioned { expired, surrogate_key })
    } else {
        Ok(UpsertOutcome::Inserted { surrogate_key })
    }
}

/// Typed wrapper over `upsert` for a dimension row
pub fn upsert_record<R: DimensionRecord>(
    conn: &Connection,
    record: &R,
    policy: Scd2Policy,
    now: DateTime<Utc>,
) -> Result<UpsertOutcome> {
    upsert(conn, R::table(), &record.column_values(), policy, now)
}

/// Upsert every row of a dimension set in order, all stamped with `now`.
/// The first error aborts the set and is returned to the caller.
pub fn load_dimension<R: DimensionRecord>(
    conn: &Connection,
    rows: &[R],
    policy: Scd2Policy,
    now: DateTime<Utc>,
) -> Result<DimensionLoadStats> {
    let table = R::table();
    info!(table = table.name, rows = rows.len(), "loading dimension");

    let mut stats = DimensionLoadStats {
        table: table.name.to_string(),
        candidates: rows.len(),
        ..Default::default()
    };

    for row in rows {
        let outcome = upsert_record(conn, row, policy, now)?;
        stats.record(outcome);
    }

    info!("{}", stats.summary());
    Ok(stats)
}

// ============================================================================
// TESTS
// ============================================================================
