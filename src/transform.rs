// 🔄 Transform - flatten nested customer records into fact and dimension rows
//
// Pure functions, no I/O. Field values pass through unvalidated; the fact
// loader and the store constraints decide what is loadable.

use serde::Serialize;
use tracing::info;

use crate::deduplication::{deduplicate, distinct_keys};
use crate::models::{
    CustomerDim, FactRow, PaymentMethodDim, RawCustomerRecord, RegionDim, UNKNOWN_REGION,
};

/// The four row sets produced from a batch of raw records
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlattenedBatch {
    pub facts: Vec<FactRow>,
    pub customers: Vec<CustomerDim>,
    pub payment_methods: Vec<PaymentMethodDim>,
    pub regions: Vec<RegionDim>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransformStats {
    pub input_records: usize,
    pub fact_rows: usize,
    pub customers: usize,
    pub unique_regions: usize,
    pub unique_payment_methods: usize,
}

impl TransformStats {
    pub fn summary(&self) -> String {
        format!(
            "{} records → {} fact rows, {} customers, {} regions, {} payment methods",
            self.input_records,
            self.fact_rows,
            self.customers,
            self.unique_regions,
            self.unique_payment_methods
        )
    }
}

/// Flatten raw records. Dimension sets are NOT deduplicated here:
/// one customer and one region row per record, one payment-method row per donation.
pub fn flatten(records: &[RawCustomerRecord]) -> FlattenedBatch {
    let mut batch = FlattenedBatch::default();

    for record in records {
        let profile = record.customer_profile.clone().unwrap_or_default();
        let region = profile
            .region
            .clone()
            .unwrap_or_else(|| UNKNOWN_REGION.to_string());

        batch.customers.push(CustomerDim {
            customer_id: record.customer_id.clone(),
            email: record.email.clone(),
            shirt_size: profile.shirt_size,
            donates_to_charity: profile.donates_to_charity,
            bikes_to_work: profile.bikes_to_work,
        });

        batch.regions.push(RegionDim::new(region.clone()));

        for donation in record.donations.iter().flatten() {
            batch.payment_methods.push(PaymentMethodDim {
                payment_method: donation.payment_method.clone(),
            });

            batch.facts.push(FactRow {
                payment_id: donation.payment_id.clone(),
                customer_id: record.customer_id.clone(),
                amount: donation.amount.clone(),
                status: donation.status.clone(),
                payment_method: donation.payment_method.clone(),
                payment_date: donation.payment_date.clone(),
                region: region.clone(),
            });
        }
    }

    batch
}

/// Flatten, then deduplicate the region and payment-method sets.
/// Customers are left as-is; SCD2 handles them against the store.
pub fn transform(records: &[RawCustomerRecord]) -> (FlattenedBatch, TransformStats) {
    info!(records = records.len(), "starting transformation");

    let flat = flatten(records);

    let stats = TransformStats {
        input_records: records.len(),
        fact_rows: flat.facts.len(),
        customers: flat.customers.len(),
        unique_regions: distinct_keys(&flat.regions),
        unique_payment_methods: distinct_keys(&flat.payment_methods),
    };

    let batch = FlattenedBatch {
        facts: flat.facts,
        customers: flat.customers,
        payment_methods: deduplicate(flat.payment_methods),
        regions: deduplicate(flat.regions),
    };

    info!("transformation complete: {}", stats.summary());
    (batch, stats)
}

// ============================================================================
// TESTS
// ============================================================================
