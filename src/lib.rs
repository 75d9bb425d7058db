// Donor ETL - Core Library
// Flattens donor JSON into a dimensional model and loads it with SCD2 history

pub mod config;
pub mod db;
pub mod deduplication;
pub mod error;
pub mod extract;
pub mod facts;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod scd2;
pub mod schema;
pub mod temporal;
pub mod transform;

// Re-export commonly used types
pub use config::EtlConfig;
pub use db::{count_active, count_facts, count_versions, Warehouse};
pub use deduplication::{deduplicate, deduplicate_by};
pub use error::{EtlError, Result};
pub use extract::{extract, log_file_outcomes, ExtractionOutcome, FileOutcome, FileStatus};
pub use facts::{load_facts, FactLoadSummary, RowOutcome, SkipReason};
pub use models::{
    CustomerDim, CustomerProfile, DimensionRecord, Donation, FactRow, PaymentMethodDim,
    RawCustomerRecord, RegionDim,
};
pub use pipeline::{run_etl, DimensionStageReport, Pipeline, RunReport};
pub use scd2::{load_dimension, upsert, DimensionLoadStats, Scd2Policy, UpsertOutcome};
pub use schema::{seed_date_dimension, DimensionTable, DIM_CUSTOMER, DIM_PAYMENT_METHOD, DIM_REGION};
pub use temporal::{check_scd2_invariant, dimension_history, DimensionVersion, ScdPeriod};
pub use transform::{flatten, transform, FlattenedBatch, TransformStats};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
