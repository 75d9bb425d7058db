// 📂 Extraction - JSON file discovery, parsing and the processing log
//
// A bad file never stops extraction: it is marked failed and the next
// file is read. Files already loaded (same name and content checksum) are
// skipped unless `process_all` is set.
//
// Extraction itself writes nothing. Outcomes go to `file_processing_log`
// through `log_file_outcomes` once the run's load has succeeded or failed.

use anyhow::Context;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::models::RawCustomerRecord;
use crate::temporal::format_timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FileStatus {
    Completed,
    Failed,
    Skipped,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Completed => "completed",
            FileStatus::Failed => "failed",
            FileStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileOutcome {
    pub file_name: String,
    pub checksum: Option<String>,
    pub record_count: usize,
    pub processing_time_seconds: f64,
    pub status: FileStatus,
    pub error_message: Option<String>,
}

#[derive(Debug, Default)]
pub struct ExtractionOutcome {
    pub records: Vec<RawCustomerRecord>,
    pub files: Vec<FileOutcome>,
}

impl ExtractionOutcome {
    pub fn count(&self, status: FileStatus) -> usize {
        self.files.iter().filter(|f| f.status == status).count()
    }

    /// Downgrade every completed file to failed when the load did not commit
    pub fn mark_run_failed(&mut self, reason: &str) {
        for file in self.files.iter_mut().filter(|f| f.status == FileStatus::Completed) {
            file.status = FileStatus::Failed;
            file.error_message = Some(format!("load failed: {}", reason));
        }
    }
}

/// SHA-256 of the file contents, hex encoded
pub fn file_checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// `*.json` files directly under `dir`, sorted by name
pub fn discover_json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_json = path
            .extension()
            .map_or(false, |ext| ext.eq_ignore_ascii_case("json"));

        if path.is_file() && is_json {
            files.push(path);
        } else {
            debug!(path = %path.display(), "skipping non-JSON entry");
        }
    }

    files.sort();
    Ok(files)
}

/// Parse one file's JSON array of customer records
pub fn parse_records(bytes: &[u8]) -> Result<Vec<RawCustomerRecord>> {
    Ok(serde_json::from_slice(bytes)?)
}

/// True when this exact file content has already been loaded successfully
pub fn already_processed(conn: &Connection, file_name: &str, checksum: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM file_processing_log
             WHERE file_name = ?1 AND checksum = ?2 AND status = 'completed'
             LIMIT 1",
            params![file_name, checksum],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn log_file_outcome(conn: &Connection, outcome: &FileOutcome) -> Result<()> {
    conn.execute(
        "INSERT INTO file_processing_log (
            file_name, checksum, record_count, processing_time_seconds,
            status, error_message, processed_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            outcome.file_name,
            outcome.checksum,
            outcome.record_count as i64,
            outcome.processing_time_seconds,
            outcome.status.as_str(),
            outcome.error_message,
            format_timestamp(Utc::now()),
        ],
    )?;
    Ok(())
}

/// Write one log row per non-skipped file. A failed write is logged and the
/// remaining rows are still attempted.
pub fn log_file_outcomes(conn: &Connection, files: &[FileOutcome]) {
    for outcome in files.iter().filter(|f| f.status != FileStatus::Skipped) {
        if let Err(e) = log_file_outcome(conn, outcome) {
            error!(file = %outcome.file_name, "Failed to log file processing status: {}", e);
        }
    }
}

fn process_file(conn: &Connection, path: &Path, process_all: bool) -> (FileOutcome, Vec<RawCustomerRecord>) {
    let started = Instant::now();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut outcome = FileOutcome {
        file_name: file_name.clone(),
        checksum: None,
        record_count: 0,
        processing_time_seconds: 0.0,
        status: FileStatus::Completed,
        error_message: None,
    };

    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            outcome.status = FileStatus::Failed;
            outcome.error_message = Some(e.to_string());
            outcome.processing_time_seconds = started.elapsed().as_secs_f64();
            return (outcome, Vec::new());
        }
    };

    let checksum = file_checksum(&bytes);
    outcome.checksum = Some(checksum.clone());

    if !process_all {
        match already_processed(conn, &file_name, &checksum) {
            Ok(true) => {
                outcome.status = FileStatus::Skipped;
                return (outcome, Vec::new());
            }
            Ok(false) => {}
            Err(e) => error!(file = %file_name, "Failed to check processing log: {}", e),
        }
    }

    let records = match parse_records(&bytes) {
        Ok(records) => records,
        Err(e) => {
            outcome.status = FileStatus::Failed;
            outcome.error_message = Some(e.to_string());
            Vec::new()
        }
    };

    outcome.record_count = records.len();
    outcome.processing_time_seconds = started.elapsed().as_secs_f64();
    (outcome, records)
}

/// Read every JSON file in `data_dir` in name order
pub fn extract(conn: &Connection, data_dir: &Path, process_all: bool) -> anyhow::Result<ExtractionOutcome> {
    info!(data_dir = %data_dir.display(), process_all, "Starting to process JSON files");

    let mut extraction = ExtractionOutcome::default();
    let files = discover_json_files(data_dir)
        .with_context(|| format!("Failed to read data directory {}", data_dir.display()))?;

    for path in files {
        let (outcome, records) = process_file(conn, &path, process_all);

        match outcome.status {
            FileStatus::Completed => info!(
                file = %outcome.file_name,
                records = outcome.record_count,
                seconds = outcome.processing_time_seconds,
                "Successfully loaded records"
            ),
            FileStatus::Failed => error!(
                file = %outcome.file_name,
                "File failed: {}",
                outcome.error_message.as_deref().unwrap_or("unknown error")
            ),
            FileStatus::Skipped => info!(file = %outcome.file_name, "Already processed, skipping"),
        }

        extraction.records.extend(records);
        extraction.files.push(outcome);
    }

    info!(
        records = extraction.records.len(),
        completed = extraction.count(FileStatus::Completed),
        failed = extraction.count(FileStatus::Failed),
        skipped = extraction.count(FileStatus::Skipped),
        "Completed processing all JSON files"
    );
    Ok(extraction)
}

// ============================================================================
// TESTS
// ============================================================================
