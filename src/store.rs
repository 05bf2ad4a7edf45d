//! Typed access to the workspace database.
//!
//! Creation paths go through [`insert_or_get`]: insert optimistically and, if a
//! uniqueness constraint fires because someone else inserted the same key in
//! the meantime, read the winner back instead of failing.

use crate::db::is_unique_violation;
use crate::model::{
    ExamResult, PerSubject, QuestionRef, ResultScores, SourceType, Student, StudentInput,
    StudentProfile, Subject, SubjectResult, SubjectScores, Test, TopicStatus, Totals,
};
use anyhow::Context;
use rusqlite::{Connection, OptionalExtension, Row};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum Upserted<T> {
    Inserted(T),
    /// The insert lost a race (or the key already existed); this is the stored row.
    Existing(T),
}

impl<T> Upserted<T> {
    pub fn was_inserted(&self) -> bool {
        matches!(self, Upserted::Inserted(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Upserted::Inserted(v) | Upserted::Existing(v) => v,
        }
    }
}

pub fn insert_or_get<T>(
    what: &str,
    insert: impl FnOnce() -> rusqlite::Result<T>,
    refetch: impl FnOnce() -> anyhow::Result<Option<T>>,
) -> anyhow::Result<Upserted<T>> {
    match insert() {
        Ok(v) => Ok(Upserted::Inserted(v)),
        Err(e) if is_unique_violation(&e) => {
            tracing::debug!(what, "unique conflict on insert, re-reading existing row");
            match refetch()? {
                Some(v) => Ok(Upserted::Existing(v)),
                None => Err(anyhow::anyhow!(
                    "{} insert conflicted but no existing row was found",
                    what
                )),
            }
        }
        Err(e) => Err(e).with_context(|| format!("failed to insert {}", what)),
    }
}

pub fn now_string() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// Tests

fn test_from_row(r: &Row<'_>) -> rusqlite::Result<Test> {
    Ok(Test {
        id: r.get(0)?,
        name: r.get(1)?,
        date: r.get(2)?,
        max_marks: r.get(3)?,
    })
}

pub fn get_test(conn: &Connection, id: &str) -> anyhow::Result<Option<Test>> {
    Ok(conn
        .query_row(
            "SELECT id, name, test_date, max_marks FROM tests WHERE id = ?",
            [id],
            test_from_row,
        )
        .optional()?)
}

pub fn find_test(conn: &Connection, name: &str, date: &str) -> anyhow::Result<Option<Test>> {
    Ok(conn
        .query_row(
            "SELECT id, name, test_date, max_marks FROM tests WHERE name = ? AND test_date = ?",
            [name, date],
            test_from_row,
        )
        .optional()?)
}

pub fn list_tests(conn: &Connection) -> anyhow::Result<Vec<Test>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, test_date, max_marks FROM tests ORDER BY test_date DESC, name",
    )?;
    let rows = stmt
        .query_map([], test_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Find-or-create keyed by `(name, date)`; `max_marks` only applies to new rows.
pub fn find_or_create_test(
    conn: &Connection,
    name: &str,
    date: &str,
    max_marks: i64,
) -> anyhow::Result<Upserted<Test>> {
    if let Some(t) = find_test(conn, name, date)? {
        return Ok(Upserted::Existing(t));
    }
    let test = Test {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        date: date.to_string(),
        max_marks,
    };
    insert_or_get(
        "test",
        || {
            conn.execute(
                "INSERT INTO tests(id, name, test_date, max_marks, created_at) VALUES(?, ?, ?, ?, ?)",
                (&test.id, &test.name, &test.date, test.max_marks, now_string()),
            )?;
            Ok(test.clone())
        },
        || find_test(conn, name, date),
    )
}

// ---------------------------------------------------------------------------
// Students

const STUDENT_COLUMNS: &str = "id, roll_number, name, batch, parent_name, parent_occupation, \
     address, contact_number, general_remark, source_type";

fn student_from_row(r: &Row<'_>) -> rusqlite::Result<Student> {
    let source: String = r.get(9)?;
    Ok(Student {
        id: r.get(0)?,
        roll_number: r.get(1)?,
        name: r.get(2)?,
        batch: r.get(3)?,
        profile: StudentProfile {
            parent_name: r.get(4)?,
            parent_occupation: r.get(5)?,
            address: r.get(6)?,
            contact_number: r.get(7)?,
            general_remark: r.get(8)?,
        },
        source_type: SourceType::parse(&source),
    })
}

pub fn find_student_by_roll(conn: &Connection, roll_number: &str) -> anyhow::Result<Option<Student>> {
    let sql = format!("SELECT {} FROM students WHERE roll_number = ?", STUDENT_COLUMNS);
    Ok(conn.query_row(&sql, [roll_number], student_from_row).optional()?)
}

pub fn get_student(conn: &Connection, id: &str) -> anyhow::Result<Option<Student>> {
    let sql = format!("SELECT {} FROM students WHERE id = ?", STUDENT_COLUMNS);
    Ok(conn.query_row(&sql, [id], student_from_row).optional()?)
}

pub fn list_students(conn: &Connection, batch: Option<&str>) -> anyhow::Result<Vec<Student>> {
    let rows = match batch {
        Some(b) => {
            let sql = format!(
                "SELECT {} FROM students WHERE batch = ? ORDER BY roll_number",
                STUDENT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([b], student_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let sql = format!("SELECT {} FROM students ORDER BY roll_number", STUDENT_COLUMNS);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], student_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
    };
    Ok(rows)
}

pub fn list_student_ids(conn: &Connection) -> anyhow::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT id FROM students ORDER BY roll_number")?;
    let ids = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Plain insert; a duplicate roll number surfaces as a unique violation so
/// callers can route it through [`insert_or_get`].
pub fn insert_student(
    conn: &Connection,
    input: &StudentInput,
    source: SourceType,
) -> rusqlite::Result<Student> {
    let student = Student {
        id: Uuid::new_v4().to_string(),
        roll_number: input.roll_number.trim().to_string(),
        name: input.name.trim().to_string(),
        batch: input.batch.trim().to_string(),
        profile: StudentProfile {
            parent_name: non_empty(input.profile.parent_name.clone()),
            parent_occupation: non_empty(input.profile.parent_occupation.clone()),
            address: non_empty(input.profile.address.clone()),
            contact_number: non_empty(input.profile.contact_number.clone()),
            general_remark: non_empty(input.profile.general_remark.clone()),
        },
        source_type: source,
    };
    let now = now_string();
    conn.execute(
        "INSERT INTO students(id, roll_number, name, batch, parent_name, parent_occupation,
            address, contact_number, general_remark, source_type, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &student.id,
            &student.roll_number,
            &student.name,
            &student.batch,
            &student.profile.parent_name,
            &student.profile.parent_occupation,
            &student.profile.address,
            &student.profile.contact_number,
            &student.profile.general_remark,
            student.source_type.as_str(),
            &now,
            &now,
        ),
    )?;
    Ok(student)
}

pub fn update_student(conn: &Connection, student: &Student) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE students SET name = ?, batch = ?, parent_name = ?, parent_occupation = ?,
            address = ?, contact_number = ?, general_remark = ?, updated_at = ?
         WHERE id = ?",
        (
            &student.name,
            &student.batch,
            &student.profile.parent_name,
            &student.profile.parent_occupation,
            &student.profile.address,
            &student.profile.contact_number,
            &student.profile.general_remark,
            now_string(),
            &student.id,
        ),
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Results

const RESULT_COLUMNS: &str =
    "id, student_id, test_id, correct, wrong, unattempted, score, percentage, rank, remarks";

fn result_from_row(r: &Row<'_>) -> rusqlite::Result<ExamResult> {
    Ok(ExamResult {
        id: r.get(0)?,
        student_id: r.get(1)?,
        test_id: r.get(2)?,
        totals: Totals {
            correct: r.get(3)?,
            wrong: r.get(4)?,
            unattempted: r.get(5)?,
            score: r.get(6)?,
            percentage: r.get(7)?,
            rank: r.get(8)?,
        },
        per_subject: PerSubject::default(),
        remarks: r.get(9)?,
    })
}

fn load_subjects(conn: &Connection, result: &mut ExamResult) -> anyhow::Result<()> {
    let mut stmt = conn.prepare(
        "SELECT subject, right_count, wrong_count, unattempted_count, score,
                unattempted_questions, negative_questions
         FROM result_subjects WHERE result_id = ?",
    )?;
    let mut rows = stmt.query([&result.id])?;
    while let Some(r) = rows.next()? {
        let subject_raw: String = r.get(0)?;
        let Some(subject) = Subject::parse(&subject_raw) else {
            continue;
        };
        let unattempted_json: String = r.get(5)?;
        let negative_json: String = r.get(6)?;
        *result.per_subject.get_mut(subject) = SubjectResult {
            scores: SubjectScores {
                right: r.get(1)?,
                wrong: r.get(2)?,
                unattempted: r.get(3)?,
                score: r.get(4)?,
            },
            unattempted_questions: serde_json::from_str(&unattempted_json).with_context(|| {
                format!("bad unattempted_questions for result {} {}", result.id, subject_raw)
            })?,
            negative_questions: serde_json::from_str(&negative_json).with_context(|| {
                format!("bad negative_questions for result {} {}", result.id, subject_raw)
            })?,
        };
    }
    Ok(())
}

pub fn find_result(
    conn: &Connection,
    student_id: &str,
    test_id: &str,
) -> anyhow::Result<Option<ExamResult>> {
    let sql = format!(
        "SELECT {} FROM results WHERE student_id = ? AND test_id = ?",
        RESULT_COLUMNS
    );
    let found = conn
        .query_row(&sql, [student_id, test_id], result_from_row)
        .optional()?;
    match found {
        Some(mut res) => {
            load_subjects(conn, &mut res)?;
            Ok(Some(res))
        }
        None => Ok(None),
    }
}

pub fn get_result(conn: &Connection, id: &str) -> anyhow::Result<Option<ExamResult>> {
    let sql = format!("SELECT {} FROM results WHERE id = ?", RESULT_COLUMNS);
    let found = conn.query_row(&sql, [id], result_from_row).optional()?;
    match found {
        Some(mut res) => {
            load_subjects(conn, &mut res)?;
            Ok(Some(res))
        }
        None => Ok(None),
    }
}

pub fn list_results_for_student(conn: &Connection, student_id: &str) -> anyhow::Result<Vec<ExamResult>> {
    let sql = format!(
        "SELECT r.{} FROM results r JOIN tests t ON t.id = r.test_id
         WHERE r.student_id = ? ORDER BY t.test_date, t.name",
        RESULT_COLUMNS.replace(", ", ", r.")
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut results = stmt
        .query_map([student_id], result_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    for res in results.iter_mut() {
        load_subjects(conn, res)?;
    }
    Ok(results)
}

/// Inserts a result with empty annotation arrays and empty remarks.
pub fn insert_result(
    conn: &Connection,
    student_id: &str,
    test_id: &str,
    scores: &ResultScores,
) -> rusqlite::Result<ExamResult> {
    let id = Uuid::new_v4().to_string();
    let now = now_string();
    let t = &scores.totals;
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO results(id, student_id, test_id, correct, wrong, unattempted, score,
            percentage, rank, remarks, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, '', ?, ?)",
        (
            &id,
            student_id,
            test_id,
            t.correct,
            t.wrong,
            t.unattempted,
            t.score,
            t.percentage,
            t.rank,
            &now,
            &now,
        ),
    )?;
    for subject in Subject::ALL {
        let s = scores.subject(subject);
        tx.execute(
            "INSERT INTO result_subjects(result_id, subject, right_count, wrong_count,
                unattempted_count, score, unattempted_questions, negative_questions)
             VALUES(?, ?, ?, ?, ?, ?, '[]', '[]')",
            (&id, subject.as_str(), s.right, s.wrong, s.unattempted, s.score),
        )?;
    }
    tx.commit()?;

    let mut per_subject = PerSubject::default();
    for subject in Subject::ALL {
        per_subject.get_mut(subject).scores = *scores.subject(subject);
    }
    Ok(ExamResult {
        id,
        student_id: student_id.to_string(),
        test_id: test_id.to_string(),
        totals: *t,
        per_subject,
        remarks: String::new(),
    })
}

/// Replaces totals and per-subject numbers; annotation arrays are left alone
/// (subject rows that do not exist yet start with empty arrays).
pub fn update_result_scores(conn: &Connection, result_id: &str, scores: &ResultScores) -> anyhow::Result<()> {
    let t = &scores.totals;
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE results SET correct = ?, wrong = ?, unattempted = ?, score = ?,
            percentage = ?, rank = ?, updated_at = ?
         WHERE id = ?",
        (
            t.correct,
            t.wrong,
            t.unattempted,
            t.score,
            t.percentage,
            t.rank,
            now_string(),
            result_id,
        ),
    )?;
    for subject in Subject::ALL {
        let s = scores.subject(subject);
        tx.execute(
            "INSERT INTO result_subjects(result_id, subject, right_count, wrong_count,
                unattempted_count, score, unattempted_questions, negative_questions)
             VALUES(?, ?, ?, ?, ?, ?, '[]', '[]')
             ON CONFLICT(result_id, subject) DO UPDATE SET
                right_count = excluded.right_count,
                wrong_count = excluded.wrong_count,
                unattempted_count = excluded.unattempted_count,
                score = excluded.score",
            (result_id, subject.as_str(), s.right, s.wrong, s.unattempted, s.score),
        )?;
    }
    tx.commit()?;
    Ok(())
}

/// Manual annotation edit. `None` leaves the corresponding array untouched.
pub fn update_result_annotations(
    conn: &Connection,
    result_id: &str,
    subject: Subject,
    negative: Option<&[QuestionRef]>,
    unattempted: Option<&[QuestionRef]>,
    remarks: Option<&str>,
) -> anyhow::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO result_subjects(result_id, subject) VALUES(?, ?)
         ON CONFLICT(result_id, subject) DO NOTHING",
        (result_id, subject.as_str()),
    )?;
    if let Some(list) = negative {
        tx.execute(
            "UPDATE result_subjects SET negative_questions = ? WHERE result_id = ? AND subject = ?",
            (serde_json::to_string(list)?, result_id, subject.as_str()),
        )?;
    }
    if let Some(list) = unattempted {
        tx.execute(
            "UPDATE result_subjects SET unattempted_questions = ? WHERE result_id = ? AND subject = ?",
            (serde_json::to_string(list)?, result_id, subject.as_str()),
        )?;
    }
    if let Some(r) = remarks {
        tx.execute("UPDATE results SET remarks = ? WHERE id = ?", (r, result_id))?;
    }
    tx.execute(
        "UPDATE results SET updated_at = ? WHERE id = ?",
        (now_string(), result_id),
    )?;
    tx.commit()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Topic status

pub type TopicKey = (Subject, String, String);

fn topic_status_from_row(r: &Row<'_>) -> rusqlite::Result<Option<TopicStatus>> {
    let subject_raw: String = r.get(1)?;
    let Some(subject) = Subject::parse(&subject_raw) else {
        return Ok(None);
    };
    Ok(Some(TopicStatus {
        student_id: r.get(0)?,
        subject,
        topic_name: r.get(2)?,
        subtopic_name: r.get(3)?,
        negative_count: r.get(4)?,
        unattempted_count: r.get(5)?,
        is_completed: r.get::<_, i64>(6)? != 0,
        updated_at: r.get(7)?,
    }))
}

pub fn list_topic_status(conn: &Connection, student_id: &str) -> anyhow::Result<Vec<TopicStatus>> {
    let mut stmt = conn.prepare(
        "SELECT student_id, subject, topic_name, subtopic_name, negative_count,
                unattempted_count, is_completed, updated_at
         FROM topic_status WHERE student_id = ?
         ORDER BY subject, topic_name, subtopic_name",
    )?;
    let rows = stmt
        .query_map([student_id], topic_status_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows.into_iter().flatten().collect())
}

/// Zeroes every count of the student and writes the non-zero tallies, all in
/// one transaction. Completion flags are preserved.
pub fn replace_topic_counts(
    conn: &Connection,
    student_id: &str,
    tallies: &HashMap<TopicKey, (i64, i64)>,
) -> anyhow::Result<()> {
    let now = now_string();
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE topic_status SET negative_count = 0, unattempted_count = 0, updated_at = ?
         WHERE student_id = ?",
        (&now, student_id),
    )?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO topic_status(student_id, subject, topic_name, subtopic_name,
                negative_count, unattempted_count, is_completed, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, 0, ?)
             ON CONFLICT(student_id, subject, topic_name, subtopic_name) DO UPDATE SET
                negative_count = excluded.negative_count,
                unattempted_count = excluded.unattempted_count,
                updated_at = excluded.updated_at",
        )?;
        for ((subject, topic, subtopic), (negative, unattempted)) in tallies {
            if *negative == 0 && *unattempted == 0 {
                continue;
            }
            stmt.execute((
                student_id,
                subject.as_str(),
                topic,
                subtopic,
                negative,
                unattempted,
                &now,
            ))?;
        }
    }
    tx.commit()?;
    Ok(())
}

pub fn set_topic_completed(
    conn: &Connection,
    student_id: &str,
    key: &TopicKey,
    completed: bool,
) -> anyhow::Result<()> {
    let (subject, topic, subtopic) = key;
    conn.execute(
        "INSERT INTO topic_status(student_id, subject, topic_name, subtopic_name,
            negative_count, unattempted_count, is_completed, updated_at)
         VALUES(?, ?, ?, ?, 0, 0, ?, ?)
         ON CONFLICT(student_id, subject, topic_name, subtopic_name) DO UPDATE SET
            is_completed = excluded.is_completed,
            updated_at = excluded.updated_at",
        (
            student_id,
            subject.as_str(),
            topic,
            subtopic,
            completed as i64,
            now_string(),
        ),
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Import audit

#[derive(Debug, Clone)]
pub struct ImportRunRecord<'a> {
    pub file_name: &'a str,
    pub file_sha256: &'a str,
    pub test_id: Option<&'a str>,
    pub processed: usize,
    pub skipped: usize,
    pub students_created: usize,
    pub students_updated: usize,
    pub results_created: usize,
    pub results_updated: usize,
}

pub fn count_import_runs_for_sha(conn: &Connection, sha: &str) -> anyhow::Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM import_runs WHERE file_sha256 = ?",
        [sha],
        |r| r.get(0),
    )?)
}

pub fn record_import_run(conn: &Connection, run: &ImportRunRecord<'_>) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO import_runs(id, file_name, file_sha256, test_id, processed, skipped,
            students_created, students_updated, results_created, results_updated, finished_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            run.file_name,
            run.file_sha256,
            run.test_id,
            run.processed as i64,
            run.skipped as i64,
            run.students_created as i64,
            run.students_updated as i64,
            run.results_created as i64,
            run.results_updated as i64,
            now_string(),
        ),
    )?;
    Ok(())
}
