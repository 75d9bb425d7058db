use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use rusqlite::types::Value;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

use donor_etl::temporal::{dimension_history, version_as_of};
use donor_etl::{logging, run_etl, seed_date_dimension, DimensionTable, EtlConfig, Scd2Policy, Warehouse};

#[derive(Parser)]
#[command(name = "donor-etl", version)]
#[command(about = "Load donor JSON drops into the donations warehouse")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract, transform and load every new JSON file
    Run {
        /// Directory containing JSON files
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Warehouse database file
        #[arg(long)]
        database: Option<PathBuf>,

        /// Directory for per-run log files
        #[arg(long)]
        log_dir: Option<PathBuf>,

        /// Process all files, including already processed ones
        #[arg(long)]
        process_all: bool,

        /// Keep the active dimension version when nothing changed
        #[arg(long)]
        skip_unchanged: bool,
    },

    /// Create the warehouse schema and seed the date dimension
    Init {
        #[arg(long)]
        database: Option<PathBuf>,

        /// First calendar day (YYYY-MM-DD)
        #[arg(long, default_value = "2020-01-01")]
        from: NaiveDate,

        /// Last calendar day (YYYY-MM-DD)
        #[arg(long, default_value = "2030-12-31")]
        to: NaiveDate,
    },

    /// Show every SCD2 version of one natural key
    History {
        #[arg(long)]
        database: Option<PathBuf>,

        /// region, customer or payment-method
        #[arg(long)]
        table: String,

        /// Natural key value
        #[arg(long)]
        key: String,
    },
}

fn main() -> ExitCode {
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let mut config = match EtlConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Command::Run {
            data_dir,
            database,
            log_dir,
            process_all,
            skip_unchanged,
        } => {
            if let Some(dir) = data_dir {
                config.data_dir = dir;
            }
            if let Some(path) = database {
                config.database_path = path;
            }
            if log_dir.is_some() {
                config.log_dir = log_dir;
            }
            config.process_all |= process_all;
            if skip_unchanged {
                config.scd2_policy = Scd2Policy::SkipUnchanged;
            }
            run(&config)
        }
        Command::Init { database, from, to } => {
            if let Some(path) = database {
                config.database_path = path;
            }
            init(&config, from, to)
        }
        Command::History { database, table, key } => {
            if let Some(path) = database {
                config.database_path = path;
            }
            history(&config, &table, &key)
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(config: &EtlConfig) -> Result<()> {
    let log_path = logging::init(config.log_dir.as_deref())?;

    info!("{}", "=".repeat(50));
    info!("Starting donor ETL process (v{})", donor_etl::VERSION);
    if let Some(path) = log_path {
        info!(log_file = %path.display(), "logging to file");
    }
    info!("{}", "=".repeat(50));

    match run_etl(config) {
        Ok(report) => {
            info!(run_id = %report.run_id, "{}", report.transform.summary());
            info!("{}", report.dimensions.regions.summary());
            info!("{}", report.dimensions.customers.summary());
            info!("{}", report.dimensions.payment_methods.summary());
            info!("{}", report.facts.summary());
            info!("{}", "=".repeat(50));
            info!("ETL process completed successfully");
            info!("{}", "=".repeat(50));
            Ok(())
        }
        Err(e) => {
            info!("{}", "=".repeat(50));
            info!("ETL process failed");
            info!("{}", "=".repeat(50));
            Err(e)
        }
    }
}

fn init(config: &EtlConfig, from: NaiveDate, to: NaiveDate) -> Result<()> {
    if from > to {
        bail!("--from {} is after --to {}", from, to);
    }

    println!("🔧 Setting up warehouse at {}...", config.database_path.display());
    let warehouse = Warehouse::open(&config.database_path)?;
    warehouse.setup()?;

    let inserted = seed_date_dimension(warehouse.connection(), from, to)?;
    println!("✓ Schema ready, {} calendar days added ({} → {})", inserted, from, to);

    Ok(())
}

fn history(config: &EtlConfig, table: &str, key: &str) -> Result<()> {
    let table = DimensionTable::by_alias(table)
        .with_context(|| format!("Unknown dimension '{}' (region, customer, payment-method)", table))?;

    let warehouse = Warehouse::open(&config.database_path)?;
    let versions = dimension_history(warehouse.connection(), table, &[Value::Text(key.to_string())])?;

    if versions.is_empty() {
        println!("No versions of '{}' in {}", key, table.name);
        return Ok(());
    }

    let current = version_as_of(&versions, Utc::now()).map(|v| v.surrogate_key);

    println!("📜 {} '{}' - {} version(s)", table.name, key, versions.len());
    for version in &versions {
        let marker = if Some(version.surrogate_key) == current { "*" } else { " " };
        let attributes: Vec<String> = version
            .values
            .iter()
            .map(|(column, value)| format!("{}={}", column, display_value(value)))
            .collect();
        println!(
            "{} #{:<6} {} → {}  {}",
            marker,
            version.surrogate_key,
            version.period.effective_start.to_rfc3339(),
            version
                .period
                .effective_end
                .map(|end| end.to_rfc3339())
                .unwrap_or_else(|| "open".to_string()),
            attributes.join(" ")
        );
    }

    Ok(())
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(r) => r.to_string(),
        Value::Text(t) => t.clone(),
        Value::Blob(b) => format!("<{} bytes>", b.len()),
    }
}
