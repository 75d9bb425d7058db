// 📦 Record Model - raw donor input and the row sets derived from it
//
// Raw records are deserialized leniently: every field is optional and
// `amount` stays a raw JSON value. Validation happens at load time.

use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

use crate::schema::{DimensionTable, DIM_CUSTOMER, DIM_PAYMENT_METHOD, DIM_REGION};

/// Region used when a profile has none
pub const UNKNOWN_REGION: &str = "Unknown";

// ============================================================================
// RAW INPUT
// ============================================================================

/// RawCustomerRecord - one element of an input file's JSON array
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawCustomerRecord {
    #[serde(default)]
    pub customer_id: Option<String>,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub customer_profile: Option<CustomerProfile>,

    /// Absent, null and empty all mean "no donations"
    #[serde(default)]
    pub donations: Option<Vec<Donation>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerProfile {
    #[serde(default)]
    pub region: Option<String>,

    #[serde(default)]
    pub shirt_size: Option<String>,

    #[serde(default)]
    pub donates_to_charity: Option<String>,

    #[serde(default)]
    pub bikes_to_work: Option<String>,
}

/// Donation nested under a customer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Donation {
    #[serde(default)]
    pub payment_id: Option<String>,

    /// Kept as raw JSON so non-numeric amounts reach the fact loader untouched
    #[serde(default)]
    pub amount: serde_json::Value,

    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub payment_method: Option<String>,

    #[serde(default)]
    pub payment_date: Option<String>,
}

// ============================================================================
// DERIVED ROWS
// ============================================================================

/// FactRow - one per donation, dimension references still natural keys
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactRow {
    pub payment_id: Option<String>,
    pub customer_id: Option<String>,
    pub amount: serde_json::Value,
    pub status: Option<String>,
    pub payment_method: Option<String>,
    pub payment_date: Option<String>,
    pub region: String,
}

impl FactRow {
    /// Identifier used in log lines
    pub fn label(&self) -> &str {
        self.payment_id.as_deref().unwrap_or("<missing payment_id>")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerDim {
    pub customer_id: Option<String>,
    pub email: Option<String>,
    pub shirt_size: Option<String>,
    pub donates_to_charity: Option<String>,
    pub bikes_to_work: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionDim {
    pub region: String,
    pub is_london: bool,
}

impl RegionDim {
    /// London detection is a case-insensitive substring match on the trimmed name
    pub fn new(region: impl Into<String>) -> Self {
        let region = region.into();
        let is_london = region.trim().to_lowercase().contains("london");
        RegionDim { region, is_london }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentMethodDim {
    pub payment_method: Option<String>,
}

// ============================================================================
// DIMENSION RECORD TRAIT
// ============================================================================

/// A row that can be written to an SCD2 dimension table.
pub trait DimensionRecord {
    /// Target table metadata
    fn table() -> &'static DimensionTable;

    /// Natural key rendered as text, for deduplication and logs
    fn natural_key(&self) -> Option<String>;

    /// (column, value) pairs for every source column: natural key + attributes
    fn column_values(&self) -> Vec<(&'static str, Value)>;
}

fn text(value: &Option<String>) -> Value {
    value.clone().map_or(Value::Null, Value::Text)
}

impl DimensionRecord for CustomerDim {
    fn table() -> &'static DimensionTable {
        &DIM_CUSTOMER
    }

    fn natural_key(&self) -> Option<String> {
        self.customer_id.clone()
    }

    fn column_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("customer_id", text(&self.customer_id)),
            ("email", text(&self.email)),
            ("shirt_size", text(&self.shirt_size)),
            ("donates_to_charity", text(&self.donates_to_charity)),
            ("bikes_to_work", text(&self.bikes_to_work)),
        ]
    }
}

impl DimensionRecord for RegionDim {
    fn table() -> &'static DimensionTable {
        &DIM_REGION
    }

    fn natural_key(&self) -> Option<String> {
        Some(self.region.clone())
    }

    fn column_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("region", Value::Text(self.region.clone())),
            ("is_london", Value::Integer(self.is_london as i64)),
        ]
    }
}

impl DimensionRecord for PaymentMethodDim {
    fn table() -> &'static DimensionTable {
        &DIM_PAYMENT_METHOD
    }

    fn natural_key(&self) -> Option<String> {
        self.payment_method.clone()
    }

    fn column_values(&self) -> Vec<(&'static str, Value)> {
        vec![("payment_method", text(&self.payment_method))]
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_record_lenient_deserialize() {
        let json = r#"{
            "customer_id": "CUST001",
            "donations": [
                {"payment_id": "PAY001", "amount": "not-a-number", "payment_method": "PayPal"}
            ]
        }"#;

        let record: RawCustomerRecord = serde_json::from_str(json).unwrap();

        assert_eq!(record.customer_id.as_deref(), Some("CUST001"));
        assert!(record.email.is_none());
        assert!(record.customer_profile.is_none());

        let donations = record.donations.unwrap();
        assert_eq!(donations.len(), 1);
        assert_eq!(donations[0].amount, serde_json::json!("not-a-number"));
        assert!(donations[0].payment_date.is_none());
    }

    #[test]
    fn test_null_donations() {
        let record: RawCustomerRecord =
            serde_json::from_str(r#"{"customer_id": "C", "donations": null}"#).unwrap();
        assert!(record.donations.is_none());
    }

    #[test]
    fn test_region_london_detection() {
        assert!(RegionDim::new("Greater London").is_london);
        assert!(RegionDim::new("london").is_london);
        assert!(RegionDim::new(" LONDON ").is_london);
        assert!(!RegionDim::new("Manchester").is_london);
        assert!(!RegionDim::new(UNKNOWN_REGION).is_london);
    }

    #[test]
    fn test_region_keeps_original_spelling() {
        let region = RegionDim::new(" LONDON ");
        assert_eq!(region.region, " LONDON ");
        assert_eq!(region.natural_key().as_deref(), Some(" LONDON "));
    }

    #[test]
    fn test_customer_column_values() {
        let customer = CustomerDim {
            customer_id: Some("CUST001".to_string()),
            email: None,
            shirt_size: Some("M".to_string()),
            donates_to_charity: None,
            bikes_to_work: None,
        };

        let values = customer.column_values();
        assert_eq!(values.len(), 5);
        assert_eq!(values[0], ("customer_id", Value::Text("CUST001".to_string())));
        assert_eq!(values[1], ("email", Value::Null));
        assert_eq!(values[2], ("shirt_size", Value::Text("M".to_string())));
    }
}
