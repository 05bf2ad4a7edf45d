//! Spreadsheet import pipeline: grid -> metadata -> header -> columns -> rows
//! -> aggregation.

use crate::aggregate;
use crate::config::ImportConfig;
use crate::error::ImportError;
use crate::grid::{self, Grid};
use crate::layout::{self, ColumnMap, HeaderRow};
use crate::model::Test;
use crate::reconcile::{self, Change, RowOutcome};
use crate::store::{self, ImportRunRecord};
use rusqlite::Connection;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::Path;
use std::thread::JoinHandle;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub processed: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
    pub students_created: usize,
    pub students_updated: usize,
    pub test_results_created: usize,
    pub test_results_updated: usize,
    pub test: Option<Test>,
}

impl ImportSummary {
    fn record(&mut self, outcome: RowOutcome) -> Option<String> {
        match outcome {
            RowOutcome::Reconciled(ids) => {
                self.processed += 1;
                match ids.student {
                    Change::Created => self.students_created += 1,
                    Change::Updated => self.students_updated += 1,
                    Change::Unchanged => {}
                }
                match ids.result {
                    Change::Created => self.test_results_created += 1,
                    Change::Updated => self.test_results_updated += 1,
                    Change::Unchanged => {}
                }
                Some(ids.student_id)
            }
            RowOutcome::Skipped(reason) => {
                tracing::warn!(reason = %reason, "row skipped");
                self.skipped += 1;
                self.errors.push(reason);
                None
            }
        }
    }
}

/// Sheet rows that hold data: everything below the header that is not
/// entirely blank.
pub fn data_rows(grid: &Grid, header: HeaderRow) -> Vec<u32> {
    (header.row + 1..=grid.last_row())
        .filter(|&r| !grid.is_row_blank(r))
        .collect()
}

fn file_sha256(path: &Path) -> anyhow::Result<String> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

enum TestSource {
    Given(Test),
    FromMetadata {
        name: String,
        date: String,
        max_marks: i64,
    },
}

fn resolve_test_source(
    conn: &Connection,
    grid: &Grid,
    test_id: Option<&str>,
    cfg: &ImportConfig,
) -> Result<TestSource, ImportError> {
    if let Some(id) = test_id {
        return match store::get_test(conn, id)? {
            Some(t) => Ok(TestSource::Given(t)),
            None => Err(ImportError::TestNotFound(id.to_string())),
        };
    }
    let meta = layout::extract_metadata(grid, cfg);
    let Some(name) = meta.test_name else {
        return Err(ImportError::MissingTestMetadata);
    };
    let date = meta
        .test_date
        .unwrap_or_else(|| chrono::Local::now().date_naive());
    tracing::debug!(test_name = %name, %date, max_marks = meta.max_marks, "test metadata extracted");
    Ok(TestSource::FromMetadata {
        name,
        date: date.format("%Y-%m-%d").to_string(),
        max_marks: meta.max_marks,
    })
}

/// Reads, validates and reconciles one spreadsheet. Every fatal check runs
/// before the first row is touched (and before a test is created from
/// metadata).
///
/// The returned handle is set only for detached aggregation.
pub fn import_file(
    conn: &Connection,
    path: &Path,
    test_id: Option<&str>,
    cfg: &ImportConfig,
    db_path: Option<&Path>,
) -> Result<(ImportSummary, Option<JoinHandle<()>>), ImportError> {
    tracing::info!(path = %path.display(), test_id = ?test_id, "import started");
    let grid = grid::load_grid(path).map_err(|e| ImportError::Unreadable {
        path: path.to_string_lossy().to_string(),
        message: format!("{:#}", e),
    })?;

    let source = resolve_test_source(conn, &grid, test_id, cfg)?;
    let header = layout::locate_header_row(&grid, cfg);
    tracing::debug!(row = header.row, source = ?header.source, "header row located");
    let columns: ColumnMap = layout::map_columns(&grid, header.row)?;
    let rows = data_rows(&grid, header);
    if rows.is_empty() {
        return Err(ImportError::EmptySheet {
            header_row: header.row,
        });
    }

    let test = match source {
        TestSource::Given(t) => t,
        TestSource::FromMetadata {
            name,
            date,
            max_marks,
        } => {
            let created = store::find_or_create_test(conn, &name, &date, max_marks)?;
            if created.was_inserted() {
                tracing::info!(test_name = %name, %date, "test created from sheet metadata");
            }
            created.into_inner()
        }
    };

    let mut summary = ImportSummary::default();
    let mut touched: BTreeSet<String> = BTreeSet::new();
    for row in rows {
        let outcome = match reconcile::validate_row(&grid, row, &columns) {
            Ok(parsed) => reconcile::reconcile_row(conn, &test.id, &parsed),
            Err(reason) => RowOutcome::Skipped(reason),
        };
        tracing::debug!(row, outcome = ?outcome, "row reconciled");
        if let Some(student_id) = summary.record(outcome) {
            touched.insert(student_id);
        }
    }

    let handle = aggregate::schedule_recompute(
        conn,
        db_path,
        cfg.aggregation_mode,
        touched.into_iter().collect(),
    );

    record_run(conn, path, &test, &summary);
    tracing::info!(
        test_id = %test.id,
        processed = summary.processed,
        skipped = summary.skipped,
        students_created = summary.students_created,
        students_updated = summary.students_updated,
        results_created = summary.test_results_created,
        results_updated = summary.test_results_updated,
        "import finished"
    );
    summary.test = Some(test);
    Ok((summary, handle))
}

/// [`import_file`] for callers that do not wait on detached aggregation.
pub fn run_import(
    conn: &Connection,
    path: &Path,
    test_id: Option<&str>,
    cfg: &ImportConfig,
    db_path: Option<&Path>,
) -> Result<ImportSummary, ImportError> {
    import_file(conn, path, test_id, cfg, db_path).map(|(summary, _)| summary)
}

// The audit row is informational; failing to write it does not fail the import.
fn record_run(conn: &Connection, path: &Path, test: &Test, summary: &ImportSummary) {
    let sha = match file_sha256(path) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "could not fingerprint import file");
            return;
        }
    };
    match store::count_import_runs_for_sha(conn, &sha) {
        Ok(n) if n > 0 => tracing::info!(sha256 = %sha, previous = n, "same file imported before"),
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "could not read import history"),
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let run = ImportRunRecord {
        file_name: &file_name,
        file_sha256: &sha,
        test_id: Some(test.id.as_str()),
        processed: summary.processed,
        skipped: summary.skipped,
        students_created: summary.students_created,
        students_updated: summary.students_updated,
        results_created: summary.test_results_created,
        results_updated: summary.test_results_updated,
    };
    if let Err(e) = store::record_import_run(conn, &run) {
        tracing::warn!(error = %e, "could not record import run");
    }
}
