// 🔍 Deduplication - collapse dimension rows to one per natural key
//
// Last write wins: a later occurrence replaces the attributes of an earlier
// one, while the output keeps the position of the key's first appearance.

use std::collections::HashMap;
use std::hash::Hash;

use crate::models::DimensionRecord;

/// Keep one row per distinct key, later rows overwriting earlier ones
pub fn deduplicate_by<T, K, F>(rows: Vec<T>, key_fn: F) -> Vec<T>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut positions: HashMap<K, usize> = HashMap::with_capacity(rows.len());
    let mut unique: Vec<T> = Vec::with_capacity(rows.len());

    for row in rows {
        let key = key_fn(&row);
        match positions.get(&key) {
            Some(&idx) => unique[idx] = row,
            None => {
                positions.insert(key, unique.len());
                unique.push(row);
            }
        }
    }

    unique
}

/// Deduplicate a dimension row set on its natural key
pub fn deduplicate<T: DimensionRecord>(rows: Vec<T>) -> Vec<T> {
    deduplicate_by(rows, |row| row.natural_key())
}

/// Number of distinct natural keys in a row set
pub fn distinct_keys<T: DimensionRecord>(rows: &[T]) -> usize {
    let mut seen = std::collections::HashSet::new();
    rows.iter().filter(|row| seen.insert(row.natural_key())).count()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PaymentMethodDim, RegionDim};

    fn method(name: Option<&str>) -> PaymentMethodDim {
        PaymentMethodDim {
            payment_method: name.map(str::to_string),
        }
    }

    #[test]
    fn test_last_write_wins() {
        let rows = vec![
            RegionDim { region: "London".to_string(), is_london: false },
            RegionDim::new("Manchester"),
            RegionDim { region: "London".to_string(), is_london: true },
        ];

        let unique = deduplicate(rows);

        assert_eq!(unique.len(), 2);
        // First-seen order, last-seen values
        assert_eq!(unique[0].region, "London");
        assert!(unique[0].is_london);
        assert_eq!(unique[1].region, "Manchester");
    }

    #[test]
    fn test_dedup_is_idempotent() {
        let rows = vec![
            method(Some("Credit Card")),
            method(Some("PayPal")),
            method(Some("Credit Card")),
            method(Some("Debit Card")),
        ];

        let once = deduplicate(rows);
        let twice = deduplicate(once.clone());

        assert_eq!(once, twice);
        assert_eq!(once.len(), 3);
    }

    #[test]
    fn test_missing_key_is_its_own_value() {
        let rows = vec![method(None), method(Some("")), method(None)];

        let unique = deduplicate(rows);

        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].payment_method, None);
        assert_eq!(unique[1].payment_method.as_deref(), Some(""));
    }

    #[test]
    fn test_empty_input() {
        let unique: Vec<RegionDim> = deduplicate(Vec::new());
        assert!(unique.is_empty());
    }

    #[test]
    fn test_deduplicate_by_custom_key() {
        let rows = vec![("a", 1), ("b", 2), ("a", 3)];
        let unique = deduplicate_by(rows, |(k, _)| *k);
        assert_eq!(unique, vec![("a", 3), ("b", 2)]);
    }

    #[test]
    fn test_distinct_keys() {
        let rows = vec![RegionDim::new("London"), RegionDim::new("London"), RegionDim::new("Leeds")];
        assert_eq!(distinct_keys(&rows), 2);
    }
}
