// ⏰ Temporal Model - SCD2 validity periods
//
// A dimension entity is identified by its natural key. Each version of it
// is a row with its own surrogate key and a validity period:
//
//   effective_start_date  when this version became true
//   effective_end_date    when it stopped being true (None = still current)
//   is_active             'Y' for the current version, 'N' once expired

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde::Serialize;

use crate::error::{EtlError, Result};
use crate::schema::DimensionTable;

/// Timestamps are stored as fixed-width RFC 3339 UTC strings
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// ============================================================================
// SCD PERIOD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScdPeriod {
    pub effective_start: DateTime<Utc>,
    pub effective_end: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl ScdPeriod {
    /// Open period starting at `start`
    pub fn open(start: DateTime<Utc>) -> Self {
        ScdPeriod {
            effective_start: start,
            effective_end: None,
            is_active: true,
        }
    }

    /// Current = active flag set and no end date
    pub fn is_current(&self) -> bool {
        self.is_active && self.effective_end.is_none()
    }

    pub fn was_valid_at(&self, time: DateTime<Utc>) -> bool {
        self.effective_start <= time && self.effective_end.map_or(true, |end| end > time)
    }

    /// Close this period at `at`
    pub fn close(&mut self, at: DateTime<Utc>) {
        self.effective_end = Some(at);
        self.is_active = false;
    }
}

// ============================================================================
// DIMENSION VERSION
// ============================================================================

/// One persisted version of a dimension entity
#[derive(Debug, Clone, PartialEq)]
pub struct DimensionVersion {
    pub surrogate_key: i64,

    /// Source columns (natural key + attributes) in table order
    pub values: Vec<(&'static str, Value)>,

    pub period: ScdPeriod,
}

impl DimensionVersion {
    pub fn value(&self, column: &str) -> Option<&Value> {
        self.values.iter().find(|(c, _)| *c == column).map(|(_, v)| v)
    }
}

/// All versions of one natural key, oldest first
pub fn dimension_history(
    conn: &Connection,
    table: &DimensionTable,
    natural_key: &[Value],
) -> Result<Vec<DimensionVersion>> {
    let columns = table.source_columns();
    let mut stmt = conn.prepare(&table.history_sql())?;

    let raw = stmt
        .query_map(params_from_iter(natural_key.iter()), |row| {
            let surrogate_key: i64 = row.get(0)?;
            let mut values = Vec::with_capacity(columns.len());
            for (i, column) in columns.iter().enumerate() {
                let value: Value = row.get(i + 1)?;
                values.push((*column, value));
            }
            let base = columns.len() + 1;
            let start: String = row.get(base)?;
            let end: Option<String> = row.get(base + 1)?;
            let active: String = row.get(base + 2)?;
            Ok((surrogate_key, values, start, end, active))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    raw.into_iter()
        .map(|(surrogate_key, values, start, end, active)| {
            let effective_start = parse_timestamp(&start).ok_or_else(|| {
                EtlError::InvalidData(format!(
                    "{}: unparseable effective_start_date '{}' on key {}",
                    table.name, start, surrogate_key
                ))
            })?;
            let mut period = ScdPeriod::open(effective_start);
            if let Some(end) = end.as_deref().and_then(parse_timestamp) {
                period.close(end);
            }
            // Stored flag is authoritative
            period.is_active = active == "Y";

            Ok(DimensionVersion {
                surrogate_key,
                values,
                period,
            })
        })
        .collect()
}

/// Version of an entity as it was at `time`
pub fn version_as_of(history: &[DimensionVersion], time: DateTime<Utc>) -> Option<&DimensionVersion> {
    history.iter().find(|v| v.period.was_valid_at(time))
}

/// Check the SCD2 invariant over one natural key's history: exactly one
/// current version, every other version inactive with an end date no later
/// than the newest start date.
pub fn check_scd2_invariant(history: &[DimensionVersion]) -> std::result::Result<(), String> {
    let current: Vec<&DimensionVersion> = history.iter().filter(|v| v.period.is_current()).collect();
    if current.len() != 1 {
        return Err(format!("expected exactly one current version, found {}", current.len()));
    }

    let newest = current[0];
    for version in history.iter().filter(|v| v.surrogate_key != newest.surrogate_key) {
        if version.period.is_active {
            return Err(format!("version {} is still flagged active", version.surrogate_key));
        }
        match version.period.effective_end {
            None => return Err(format!("version {} has no end date", version.surrogate_key)),
            Some(end) if end > newest.period.effective_start => {
                return Err(format!(
                    "version {} ends after the current version starts",
                    version.surrogate_key
                ))
            }
            Some(_) => {}
        }
    }

    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn version(key: i64, start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> DimensionVersion {
        DimensionVersion {
            surrogate_key: key,
            values: vec![("region", Value::Text("London".to_string()))],
            period: ScdPeriod {
                effective_start: start,
                effective_end: end,
                is_active: end.is_none(),
            },
        }
    }

    #[test]
    fn test_timestamp_round_trip_preserves_order() {
        let t1 = Utc::now();
        let t2 = t1 + Duration::milliseconds(5);

        let s1 = format_timestamp(t1);
        let s2 = format_timestamp(t2);

        assert!(s1 < s2);
        assert_eq!(parse_timestamp(&s1).unwrap().timestamp_micros(), t1.timestamp_micros());
    }

    #[test]
    fn test_period_validity() {
        let t0 = Utc::now();
        let mut period = ScdPeriod::open(t0);
        assert!(period.is_current());
        assert!(period.was_valid_at(t0 + Duration::days(365)));
        assert!(!period.was_valid_at(t0 - Duration::seconds(1)));

        let t1 = t0 + Duration::seconds(10);
        period.close(t1);

        assert!(!period.is_current());
        assert!(period.was_valid_at(t0 + Duration::seconds(5)));
        assert!(!period.was_valid_at(t1));
    }

    #[test]
    fn test_version_as_of() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(10);
        let history = vec![version(1, t0, Some(t1)), version(2, t1, None)];

        assert_eq!(version_as_of(&history, t0).unwrap().surrogate_key, 1);
        assert_eq!(version_as_of(&history, t1).unwrap().surrogate_key, 2);
        assert!(version_as_of(&history, t0 - Duration::seconds(1)).is_none());
    }

    #[test]
    fn test_invariant_holds_for_clean_history() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(10);
        let t2 = t1 + Duration::seconds(10);
        let history = vec![
            version(1, t0, Some(t1)),
            version(2, t1, Some(t2)),
            version(3, t2, None),
        ];

        assert!(check_scd2_invariant(&history).is_ok());
    }

    #[test]
    fn test_invariant_rejects_two_current_versions() {
        let t0 = Utc::now();
        let history = vec![version(1, t0, None), version(2, t0, None)];

        assert!(check_scd2_invariant(&history).is_err());
    }

    #[test]
    fn test_invariant_rejects_overlap() {
        let t0 = Utc::now();
        let history = vec![
            version(1, t0, Some(t0 + Duration::seconds(20))),
            version(2, t0 + Duration::seconds(10), None),
        ];

        assert!(check_scd2_invariant(&history).is_err());
    }

    #[test]
    fn test_history_reads_periods_from_store() {
        let warehouse = crate::db::Warehouse::open_in_memory().unwrap();
        let conn = warehouse.connection();
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(10);

        conn.execute(
            "INSERT INTO dim_region (region, is_london, effective_start_date, effective_end_date, is_active)
             VALUES ('London', 1, ?1, ?2, 'N'), ('London', 1, ?2, NULL, 'Y')",
            [format_timestamp(t0), format_timestamp(t1)],
        )
        .unwrap();

        let key = vec![Value::Text("London".to_string())];
        let history = dimension_history(conn, &crate::schema::DIM_REGION, &key).unwrap();

        assert_eq!(history.len(), 2);
        assert!(!history[0].period.is_active);
        assert_eq!(
            history[0].period.effective_end.map(|t| t.timestamp_micros()),
            Some(t1.timestamp_micros())
        );
        assert!(history[1].period.is_current());
        assert!(check_scd2_invariant(&history).is_ok());
    }

    #[test]
    fn test_history_keeps_stored_active_flag() {
        let warehouse = crate::db::Warehouse::open_in_memory().unwrap();
        let conn = warehouse.connection();

        // Ended but still flagged active
        conn.execute(
            "INSERT INTO dim_region (region, is_london, effective_start_date, effective_end_date, is_active)
             VALUES ('Leeds', 0, ?1, ?2, 'Y')",
            [format_timestamp(Utc::now()), format_timestamp(Utc::now() + Duration::seconds(1))],
        )
        .unwrap();

        let key = vec![Value::Text("Leeds".to_string())];
        let history = dimension_history(conn, &crate::schema::DIM_REGION, &key).unwrap();

        assert!(history[0].period.is_active);
        assert!(!history[0].period.is_current());
        assert!(check_scd2_invariant(&history).is_err());
    }

    #[test]
    fn test_invariant_rejects_empty_history() {
        assert!(check_scd2_invariant(&[]).is_err());
    }
}
