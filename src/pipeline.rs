// 🚚 Pipeline - transform → dimension stage → fact stage
//
// Stage boundaries are transactions:
//   - dimension stage: regions, customers, payment methods. Any error rolls
//     the whole stage back and fails the run.
//   - fact stage: starts only after the dimension stage committed. Per-row
//     skips are tolerated; a fatal store error rolls the stage back.
//
// File processing log rows commit together with the fact stage. A run that
// fails records its files as failed, so the next run reads them again.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;
use tracing::{error, info, info_span};

use crate::config::EtlConfig;
use crate::db::Warehouse;
use crate::error::Result;
use crate::extract::{extract, log_file_outcomes, ExtractionOutcome, FileOutcome};
use crate::facts::{load_facts, FactLoadSummary};
use crate::models::{FactRow, RawCustomerRecord};
use crate::scd2::{load_dimension, DimensionLoadStats, Scd2Policy};
use crate::transform::{transform, FlattenedBatch, TransformStats};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DimensionStageReport {
    pub regions: DimensionLoadStats,
    pub customers: DimensionLoadStats,
    pub payment_methods: DimensionLoadStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub transform: TransformStats,
    pub dimensions: DimensionStageReport,
    pub facts: FactLoadSummary,
    pub duration_seconds: f64,
}

pub struct Pipeline<'a> {
    warehouse: &'a mut Warehouse,
    policy: Scd2Policy,
}

impl<'a> Pipeline<'a> {
    pub fn new(warehouse: &'a mut Warehouse, policy: Scd2Policy) -> Self {
        Pipeline { warehouse, policy }
    }

    /// Transform and load one batch of raw records
    pub fn run(&mut self, records: &[RawCustomerRecord]) -> Result<RunReport> {
        self.run_batch(records, &[])
    }

    /// Load an extraction and record its files in the same commit as the facts
    pub fn run_extraction(&mut self, extraction: &ExtractionOutcome) -> Result<RunReport> {
        self.run_batch(&extraction.records, &extraction.files)
    }

    fn run_batch(&mut self, records: &[RawCustomerRecord], files: &[FileOutcome]) -> Result<RunReport> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let span = info_span!("etl_run", run_id = %run_id);
        let _guard = span.enter();
        let started = Instant::now();

        info!(records = records.len(), policy = ?self.policy, "Starting ETL run");

        let (batch, transform_stats) = transform(records);

        let dimensions = self.load_dimensions(&batch, Utc::now()).map_err(|e| {
            error!("Dimension load failed, stage rolled back: {}", e);
            e
        })?;

        let facts = self.load_fact_stage(&batch.facts, files).map_err(|e| {
            error!("Fact load failed, stage rolled back: {}", e);
            e
        })?;

        let report = RunReport {
            run_id,
            transform: transform_stats,
            dimensions,
            facts,
            duration_seconds: started.elapsed().as_secs_f64(),
        };

        info!(seconds = report.duration_seconds, "ETL run complete");
        Ok(report)
    }

    /// Every version written by this stage carries the stage timestamp `now`
    fn load_dimensions(&mut self, batch: &FlattenedBatch, now: DateTime<Utc>) -> Result<DimensionStageReport> {
        let tx = self.warehouse.begin_stage()?;

        info!("Loading {} unique region records", batch.regions.len());
        let regions = load_dimension(&tx, &batch.regions, self.policy, now)?;

        info!("Loading {} customer records", batch.customers.len());
        let customers = load_dimension(&tx, &batch.customers, self.policy, now)?;

        info!("Loading {} unique payment method records", batch.payment_methods.len());
        let payment_methods = load_dimension(&tx, &batch.payment_methods, self.policy, now)?;

        tx.commit()?;
        Ok(DimensionStageReport {
            regions,
            customers,
            payment_methods,
        })
    }

    fn load_fact_stage(&mut self, facts: &[FactRow], files: &[FileOutcome]) -> Result<FactLoadSummary> {
        let tx = self.warehouse.begin_stage()?;
        let summary = load_facts(&tx, facts)?;
        log_file_outcomes(&tx, files);
        tx.commit()?;
        Ok(summary)
    }
}

/// Full run from configuration: open the warehouse, extract, transform, load
pub fn run_etl(config: &EtlConfig) -> anyhow::Result<RunReport> {
    use anyhow::Context;

    let mut warehouse = Warehouse::open(&config.database_path)
        .with_context(|| format!("Failed to open warehouse {}", config.database_path.display()))?;
    warehouse.setup().context("Failed to create warehouse schema")?;

    info!("Starting extraction phase");
    let mut extraction = extract(warehouse.connection(), &config.data_dir, config.process_all)?;
    info!("Extraction complete: {} customer records loaded", extraction.records.len());

    let result = Pipeline::new(&mut warehouse, config.scd2_policy).run_extraction(&extraction);

    match result {
        Ok(report) => Ok(report),
        Err(e) => {
            extraction.mark_run_failed(&e.to_string());
            log_file_outcomes(warehouse.connection(), &extraction.files);
            Err(anyhow::Error::new(e).context("ETL run failed"))
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
