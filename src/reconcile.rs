//! Per-row reconciliation: validate a data row, then create-or-merge the
//! student and create-or-update the result without touching curated
//! annotations.

use crate::grid::Grid;
use crate::layout::{
    ColumnMap, ProfileField, COL_BATCH, COL_NAME, COL_PERCENTAGE, COL_RANK, COL_ROLL, COL_TOTAL_R,
    COL_TOTAL_S, COL_TOTAL_U, COL_TOTAL_W,
};
use crate::model::{
    ExamResult, ResultScores, SourceType, Student, StudentInput, StudentProfile, Subject,
    SubjectScores, Totals,
};
use crate::store::{self, Upserted};
use rusqlite::Connection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Created,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciledIds {
    pub student_id: String,
    pub result_id: String,
    pub student: Change,
    pub result: Change,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    Reconciled(ReconciledIds),
    Skipped(String),
}

/// A data row that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRow {
    /// 1-based sheet row.
    pub row: u32,
    pub student: StudentInput,
    pub scores: ResultScores,
}

/// Empty cells and the literal strings `undefined`/`null` (left behind by
/// some exporters) count as missing.
pub fn is_missing_value(s: &str) -> bool {
    let t = s.trim();
    t.is_empty() || t.eq_ignore_ascii_case("undefined") || t.eq_ignore_ascii_case("null")
}

fn text(grid: &Grid, row: u32, map: &ColumnMap, canonical: &str) -> String {
    map.column(canonical)
        .map(|c| grid.text_at(row, c))
        .unwrap_or_default()
}

fn number(grid: &Grid, row: u32, map: &ColumnMap, canonical: &str) -> Option<f64> {
    map.column(canonical)
        .and_then(|c| grid.cell_at(row, c))
        .and_then(|v| v.as_number())
}

fn count(grid: &Grid, row: u32, map: &ColumnMap, canonical: &str) -> i64 {
    number(grid, row, map, canonical)
        .map(|f| f.round() as i64)
        .unwrap_or(0)
}

fn profile_text(grid: &Grid, row: u32, map: &ColumnMap, field: ProfileField) -> Option<String> {
    map.profile_column(field)
        .map(|c| grid.text_at(row, c))
        .filter(|s| !is_missing_value(s))
}

fn subject_scores(grid: &Grid, row: u32, map: &ColumnMap, subject: Subject) -> SubjectScores {
    let p = subject.column_prefix();
    SubjectScores {
        right: count(grid, row, map, &format!("{}-R", p)),
        wrong: count(grid, row, map, &format!("{}-W", p)),
        unattempted: count(grid, row, map, &format!("{}-U", p)),
        score: number(grid, row, map, &format!("{}-T", p)).unwrap_or(0.0),
    }
}

/// Checks roll number and name, then reads the remaining fields. The error
/// string is the row-tagged message reported in the import summary.
pub fn validate_row(grid: &Grid, row: u32, map: &ColumnMap) -> Result<ParsedRow, String> {
    let roll_number = text(grid, row, map, COL_ROLL);
    if is_missing_value(&roll_number) {
        return Err(format!("Row {}: {} is missing or invalid", row, COL_ROLL));
    }
    let name = text(grid, row, map, COL_NAME);
    if is_missing_value(&name) {
        return Err(format!("Row {}: {} is missing or invalid", row, COL_NAME));
    }
    let batch = text(grid, row, map, COL_BATCH);

    let student = StudentInput {
        roll_number,
        name,
        batch: if is_missing_value(&batch) { String::new() } else { batch },
        profile: StudentProfile {
            parent_name: profile_text(grid, row, map, ProfileField::ParentName),
            parent_occupation: profile_text(grid, row, map, ProfileField::ParentOccupation),
            address: profile_text(grid, row, map, ProfileField::Address),
            contact_number: profile_text(grid, row, map, ProfileField::ContactNumber),
            general_remark: profile_text(grid, row, map, ProfileField::GeneralRemark),
        },
    };

    let scores = ResultScores {
        totals: Totals {
            correct: count(grid, row, map, COL_TOTAL_R),
            wrong: count(grid, row, map, COL_TOTAL_W),
            unattempted: count(grid, row, map, COL_TOTAL_U),
            score: number(grid, row, map, COL_TOTAL_S).unwrap_or(0.0),
            percentage: number(grid, row, map, COL_PERCENTAGE).unwrap_or(0.0),
            rank: number(grid, row, map, COL_RANK).map(|f| f.round() as i64),
        },
        physics: subject_scores(grid, row, map, Subject::Physics),
        chemistry: subject_scores(grid, row, map, Subject::Chemistry),
        maths: subject_scores(grid, row, map, Subject::Maths),
    };

    Ok(ParsedRow {
        row,
        student,
        scores,
    })
}

// ---------------------------------------------------------------------------
// Students

/// Append-only remark merge: a new remark is added on its own line unless the
/// stored remark already contains that line.
pub fn merge_remark(old: Option<&str>, new: Option<&str>) -> Option<String> {
    let old = old.map(str::trim).filter(|s| !s.is_empty());
    let new = new.map(str::trim).filter(|s| !s.is_empty());
    match (old, new) {
        (Some(o), Some(n)) => {
            if o.lines().any(|l| l.trim() == n) {
                Some(o.to_string())
            } else {
                Some(format!("{}\n{}", o, n))
            }
        }
        (Some(o), None) => Some(o.to_string()),
        (None, Some(n)) => Some(n.to_string()),
        (None, None) => None,
    }
}

fn take_if_changed(current: &mut String, new: &str) -> bool {
    let new = new.trim();
    if new.is_empty() || current == new {
        return false;
    }
    *current = new.to_string();
    true
}

fn take_optional_if_changed(current: &mut Option<String>, new: Option<&str>) -> bool {
    let Some(new) = new.map(str::trim).filter(|s| !s.is_empty()) else {
        return false;
    };
    if current.as_deref() == Some(new) {
        return false;
    }
    *current = Some(new.to_string());
    true
}

/// Applies non-empty, differing fields of `input` to `existing`. Returns the
/// merged student only when something changed.
pub fn merge_student(existing: &Student, input: &StudentInput) -> Option<Student> {
    let mut merged = existing.clone();
    let mut changed = false;
    changed |= take_if_changed(&mut merged.name, &input.name);
    changed |= take_if_changed(&mut merged.batch, &input.batch);

    let p = &mut merged.profile;
    let n = &input.profile;
    changed |= take_optional_if_changed(&mut p.parent_name, n.parent_name.as_deref());
    changed |= take_optional_if_changed(&mut p.parent_occupation, n.parent_occupation.as_deref());
    changed |= take_optional_if_changed(&mut p.address, n.address.as_deref());
    changed |= take_optional_if_changed(&mut p.contact_number, n.contact_number.as_deref());

    let remark = merge_remark(p.general_remark.as_deref(), n.general_remark.as_deref());
    if remark != p.general_remark {
        p.general_remark = remark;
        changed = true;
    }

    changed.then_some(merged)
}

fn merge_existing(conn: &Connection, existing: Student, input: &StudentInput) -> anyhow::Result<(Student, Change)> {
    match merge_student(&existing, input) {
        Some(merged) => {
            store::update_student(conn, &merged)?;
            Ok((merged, Change::Updated))
        }
        None => Ok((existing, Change::Unchanged)),
    }
}

/// Create-or-merge keyed by roll number. A concurrent create of the same roll
/// number is absorbed by re-reading the winner and merging into it.
pub fn reconcile_student(
    conn: &Connection,
    input: &StudentInput,
    source: SourceType,
) -> anyhow::Result<(Student, Change)> {
    let roll = input.roll_number.trim();
    if let Some(existing) = store::find_student_by_roll(conn, roll)? {
        return merge_existing(conn, existing, input);
    }
    let created = store::insert_or_get(
        "student",
        || store::insert_student(conn, input, source),
        || store::find_student_by_roll(conn, roll),
    )?;
    match created {
        Upserted::Inserted(s) => Ok((s, Change::Created)),
        Upserted::Existing(s) => {
            tracing::warn!(roll_number = roll, "student created concurrently; merging into it");
            merge_existing(conn, s, input)
        }
    }
}

// ---------------------------------------------------------------------------
// Results

fn scores_match(existing: &ExamResult, scores: &ResultScores) -> bool {
    existing.totals == scores.totals
        && Subject::ALL
            .iter()
            .all(|s| existing.per_subject.get(*s).scores == *scores.subject(*s))
}

fn update_existing_result(
    conn: &Connection,
    existing: ExamResult,
    scores: &ResultScores,
) -> anyhow::Result<(String, Change)> {
    if scores_match(&existing, scores) {
        return Ok((existing.id, Change::Unchanged));
    }
    store::update_result_scores(conn, &existing.id, scores)?;
    Ok((existing.id, Change::Updated))
}

/// Create-or-update keyed by `(student_id, test_id)`. Numbers always follow
/// the sheet; annotation arrays and remarks are never written here.
pub fn reconcile_result(
    conn: &Connection,
    student_id: &str,
    test_id: &str,
    scores: &ResultScores,
) -> anyhow::Result<(String, Change)> {
    if let Some(existing) = store::find_result(conn, student_id, test_id)? {
        return update_existing_result(conn, existing, scores);
    }
    let created = store::insert_or_get(
        "result",
        || store::insert_result(conn, student_id, test_id, scores),
        || store::find_result(conn, student_id, test_id),
    )?;
    match created {
        Upserted::Inserted(r) => Ok((r.id, Change::Created)),
        Upserted::Existing(r) => update_existing_result(conn, r, scores),
    }
}

pub fn reconcile_row(conn: &Connection, test_id: &str, parsed: &ParsedRow) -> RowOutcome {
    let run = || -> anyhow::Result<ReconciledIds> {
        let (student, student_change) = reconcile_student(conn, &parsed.student, SourceType::Import)?;
        let (result_id, result_change) = reconcile_result(conn, &student.id, test_id, &parsed.scores)?;
        Ok(ReconciledIds {
            student_id: student.id,
            result_id,
            student: student_change,
            result: result_change,
        })
    };
    match run() {
        Ok(ids) => RowOutcome::Reconciled(ids),
        Err(e) => RowOutcome::Skipped(format!("Row {}: {:#}", parsed.row, e)),
    }
}
