mod test_support;

use examsyncd::config::{AggregationMode, ImportConfig};
use examsyncd::db;
use examsyncd::import::{import_file, run_import};
use examsyncd::model::{QuestionRef, Subject, SyllabusSubject, SyllabusTopic};
use examsyncd::{store, syllabus};
use serde_json::{json, Value};
use std::path::Path;
use test_support::{header_row, result_row, temp_dir, write_workbook};

fn with_remarks(rows: Vec<(Vec<Value>, &str)>) -> Vec<Vec<Value>> {
    let mut header = header_row();
    header.push(json!("Remarks"));
    let mut out = vec![header];
    for (mut row, remark) in rows {
        row.push(json!(remark));
        out.push(row);
    }
    out
}

fn given_test(conn: &rusqlite::Connection, name: &str) -> String {
    store::find_or_create_test(conn, name, "2024-07-01", 300)
        .expect("create test")
        .into_inner()
        .id
}

#[test]
fn remarks_append_once_and_never_clear() {
    let workspace = temp_dir("examsync-remarks");
    let conn = db::open_db(&workspace).expect("open db");
    let test_id = given_test(&conn, "Remark Test");
    let cfg = ImportConfig::default();
    let sheet = workspace.join("remarks.xlsx");

    write_workbook(&sheet, &with_remarks(vec![(result_row("R1", "Asha", "B1", 1), "A")]));
    let s = run_import(&conn, &sheet, Some(test_id.as_str()), &cfg, None).expect("import 1");
    assert_eq!(s.students_created, 1);

    write_workbook(&sheet, &with_remarks(vec![(result_row("R1", "Asha", "B1", 1), "B")]));
    let s = run_import(&conn, &sheet, Some(test_id.as_str()), &cfg, None).expect("import 2");
    assert_eq!(s.students_updated, 1);
    let again = run_import(&conn, &sheet, Some(test_id.as_str()), &cfg, None).expect("import 3");
    assert_eq!(again.students_updated, 0);

    write_workbook(&sheet, &with_remarks(vec![(result_row("R1", "Asha", "B1", 1), "")]));
    run_import(&conn, &sheet, Some(test_id.as_str()), &cfg, None).expect("import 4");

    let student = store::find_student_by_roll(&conn, "R1")
        .expect("query")
        .expect("student");
    assert_eq!(student.profile.general_remark.as_deref(), Some("A\nB"));
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn case_and_whitespace_variants_of_headers_are_accepted() {
    let workspace = temp_dir("examsync-header-variants");
    let conn = db::open_db(&workspace).expect("open db");
    let test_id = given_test(&conn, "Header Test");
    let mut header = header_row();
    header[0] = json!("stuid ");
    header[20] = json!("RANK");
    let sheet = workspace.join("variants.xlsx");
    let mut row = result_row("", "Ravi", "B1", 2);
    row[0] = json!(1024);
    write_workbook(&sheet, &[header, row]);

    let s = run_import(&conn, &sheet, Some(test_id.as_str()), &ImportConfig::default(), None)
        .expect("import");
    assert_eq!(s.processed, 1);
    let student = store::find_student_by_roll(&conn, "1024")
        .expect("query")
        .expect("numeric roll number reads back without decimals");
    let result = store::find_result(&conn, &student.id, &test_id)
        .expect("query")
        .expect("result");
    assert_eq!(result.totals.rank, Some(2));
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn concurrent_imports_of_the_same_file_never_duplicate() {
    let workspace = temp_dir("examsync-concurrent");
    let conn = db::open_db(&workspace).expect("open db");
    let test_id = given_test(&conn, "Race Test");
    let sheet = workspace.join("race.xlsx");
    let rows: Vec<Vec<Value>> = std::iter::once(header_row())
        .chain((1..=40).map(|i| result_row(&format!("R{:03}", i), &format!("Student {}", i), "B1", i)))
        .collect();
    write_workbook(&sheet, &rows);

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let workspace = workspace.clone();
            let sheet = sheet.clone();
            let test_id = test_id.clone();
            std::thread::spawn(move || {
                let conn = db::open_db(&workspace).expect("open db in worker");
                run_import(&conn, &sheet, Some(test_id.as_str()), &ImportConfig::default(), None)
                    .expect("import in worker")
            })
        })
        .collect();
    let summaries: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("worker panicked"))
        .collect();

    for s in &summaries {
        assert_eq!(s.processed, 40, "errors: {:?}", s.errors);
    }
    let created: usize = summaries.iter().map(|s| s.students_created).sum();
    let results_created: usize = summaries.iter().map(|s| s.test_results_created).sum();
    assert_eq!(created, 40);
    assert_eq!(results_created, 40);

    assert_eq!(store::list_students(&conn, None).expect("students").len(), 40);
    let result_count: i64 = conn
        .query_row("SELECT COUNT(*) FROM results WHERE test_id = ?", [&test_id], |r| r.get(0))
        .expect("count results");
    assert_eq!(result_count, 40);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn detached_aggregation_runs_on_its_own_connection() {
    let workspace = temp_dir("examsync-detached");
    let conn = db::open_db(&workspace).expect("open db");
    let db_file = db::db_path(&workspace);
    syllabus::seed_syllabus(
        &conn,
        &[SyllabusSubject {
            subject: Subject::Maths,
            topics: vec![SyllabusTopic {
                name: "Calculus".into(),
                subtopics: vec!["Limits".into()],
            }],
        }],
        false,
    )
    .expect("seed");
    let test_id = given_test(&conn, "Detached Test");
    let sheet = workspace.join("detached.xlsx");
    write_workbook(&sheet, &[header_row(), result_row("R1", "Asha", "B1", 1)]);
    run_import(&conn, &sheet, Some(test_id.as_str()), &ImportConfig::default(), None).expect("import");

    let student = store::find_student_by_roll(&conn, "R1").expect("query").expect("student");
    let result = store::find_result(&conn, &student.id, &test_id).expect("query").expect("result");
    let limits = vec![QuestionRef {
        question_number: 61,
        subtopic: "Limits".into(),
    }];
    store::update_result_annotations(&conn, &result.id, Subject::Maths, Some(&limits[..]), None, None)
        .expect("annotate");

    write_workbook(&sheet, &[header_row(), result_row("R1", "Asha", "B1", 5)]);
    let cfg = ImportConfig {
        aggregation_mode: AggregationMode::Detached,
        ..ImportConfig::default()
    };
    let (summary, handle) =
        import_file(&conn, &sheet, Some(test_id.as_str()), &cfg, Some(db_file.as_path())).expect("import");
    assert_eq!(summary.test_results_updated, 1);
    handle.expect("detached handle").join().expect("aggregation thread");

    let rows = store::list_topic_status(&conn, &student.id).expect("topic status");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].topic_name, "Calculus");
    assert_eq!(rows[0].negative_count, 1);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn csv_sheets_follow_the_same_pipeline() {
    let workspace = temp_dir("examsync-csv");
    let conn = db::open_db(&workspace).expect("open db");
    let header = header_row()
        .iter()
        .map(|v| v.as_str().unwrap_or_default().to_string())
        .collect::<Vec<_>>()
        .join(",");
    let row = result_row("R9", "Zoya", "B3", 4)
        .iter()
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(",");
    let body = format!(
        ",,,,,,,,Test Name: Weekly 7\n,,,,,,,,2024-08-19\n\n\n\n\n\n{}\n{}\n",
        header, row
    );
    let sheet = workspace.join("weekly7.csv");
    std::fs::write(&sheet, body).expect("write csv");

    let s = run_import(&conn, Path::new(&sheet), None, &ImportConfig::default(), None).expect("import");
    assert_eq!(s.processed, 1);
    let test = s.test.expect("test");
    assert_eq!(test.name, "Weekly 7");
    assert_eq!(test.date, "2024-08-19");
    let _ = std::fs::remove_dir_all(workspace);
}
