mod test_support;

use serde_json::{json, Value};
use test_support::{
    error_code, header_row, request, request_ok, result_row, sheet_with_metadata, spawn_sidecar,
    temp_dir, write_workbook,
};

#[test]
fn import_creates_test_from_metadata_and_reimport_is_a_no_op() {
    let workspace = temp_dir("examsync-import-idem");
    let sheet = workspace.join("mock3.xlsx");
    write_workbook(
        &sheet,
        &sheet_with_metadata(
            "Mock JEE 3",
            "15/03/2024",
            vec![
                result_row("R1", "Asha", "B1", 1),
                result_row("R2", "Ravi", "B1", 2),
                result_row("R3", "Kiran", "B2", 3),
            ],
        ),
    );

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "results.import",
        json!({ "path": sheet.to_string_lossy() }),
    );
    assert_eq!(first["processed"], 3);
    assert_eq!(first["skipped"], 0);
    assert_eq!(first["studentsCreated"], 3);
    assert_eq!(first["testResultsCreated"], 3);
    assert_eq!(first["test"]["name"], "Mock JEE 3");
    assert_eq!(first["test"]["date"], "2024-03-15");
    assert_eq!(first["test"]["maxMarks"], 300);

    let second = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "results.import",
        json!({ "path": sheet.to_string_lossy() }),
    );
    assert_eq!(second["processed"], 3);
    for key in [
        "studentsCreated",
        "studentsUpdated",
        "testResultsCreated",
        "testResultsUpdated",
    ] {
        assert_eq!(second[key], 0, "{} on re-import", key);
    }
    assert_eq!(second["test"]["id"], first["test"]["id"]);

    let tests = request_ok(&mut stdin, &mut reader, "4", "tests.list", json!({}));
    assert_eq!(tests["tests"].as_array().map(|a| a.len()), Some(1));
    let students = request_ok(&mut stdin, &mut reader, "5", "students.list", json!({}));
    assert_eq!(students["students"].as_array().map(|a| a.len()), Some(3));
    assert_eq!(students["students"][0]["sourceType"], "import");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn row_without_roll_number_is_skipped_with_its_sheet_row() {
    let workspace = temp_dir("examsync-import-row12");
    let sheet = workspace.join("row12.xlsx");
    let mut john = result_row("", "John", "B1", 4);
    john[0] = Value::Null;
    write_workbook(
        &sheet,
        &sheet_with_metadata(
            "Mock JEE 4",
            "2024-04-01",
            vec![
                result_row("R1", "Asha", "B1", 1),
                result_row("R2", "Ravi", "B1", 2),
                result_row("R3", "Kiran", "B2", 3),
                john,
            ],
        ),
    );

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "results.import",
        json!({ "path": sheet.to_string_lossy() }),
    );
    assert_eq!(summary["processed"], 3);
    assert_eq!(summary["skipped"], 1);
    assert_eq!(summary["errors"], json!(["Row 12: StuID is missing or invalid"]));
    let students = request_ok(&mut stdin, &mut reader, "3", "students.list", json!({}));
    assert!(students["students"]
        .as_array()
        .expect("students")
        .iter()
        .all(|s| s["name"] != "John"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn fatal_sheet_problems_abort_before_any_row() {
    let workspace = temp_dir("examsync-import-fatal");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    // Header without %age and Rank.
    let short_header: Vec<Value> = header_row().into_iter().take(19).collect();
    let mut short_row = result_row("R1", "Asha", "B1", 1);
    short_row.truncate(19);
    let missing_cols = workspace.join("missing.xlsx");
    write_workbook(&missing_cols, &[short_header, short_row]);
    let test = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "tests.create",
        json!({ "name": "Unit Test 1", "date": "2024-05-05" }),
    );
    let test_id = test["test"]["id"].as_str().expect("test id").to_string();

    let resp = request(
        &mut stdin,
        &mut reader,
        "3",
        "results.import",
        json!({ "path": missing_cols.to_string_lossy(), "testId": test_id }),
    );
    assert_eq!(error_code(&resp), "missing_columns");
    assert_eq!(resp["error"]["message"], "missing required columns: %age, Rank");
    assert_eq!(resp["error"]["details"]["status"], 400);
    assert_eq!(resp["error"]["details"]["found"][0], "StuID");

    let empty = workspace.join("empty.xlsx");
    write_workbook(&empty, &[header_row()]);
    let resp = request(
        &mut stdin,
        &mut reader,
        "4",
        "results.import",
        json!({ "path": empty.to_string_lossy(), "testId": test_id }),
    );
    assert_eq!(error_code(&resp), "empty_sheet");

    let resp = request(
        &mut stdin,
        &mut reader,
        "5",
        "results.import",
        json!({ "path": empty.to_string_lossy(), "testId": "no-such-test" }),
    );
    assert_eq!(error_code(&resp), "test_not_found");
    assert_eq!(resp["error"]["details"]["status"], 500);

    let no_meta = workspace.join("nometa.xlsx");
    let mut rows: Vec<Vec<Value>> = vec![Vec::new(); 7];
    rows.push(header_row());
    rows.push(result_row("R1", "Asha", "B1", 1));
    write_workbook(&no_meta, &rows);
    let resp = request(
        &mut stdin,
        &mut reader,
        "6",
        "results.import",
        json!({ "path": no_meta.to_string_lossy() }),
    );
    assert_eq!(error_code(&resp), "missing_test_metadata");

    let students = request_ok(&mut stdin, &mut reader, "7", "students.list", json!({}));
    assert_eq!(students["students"].as_array().map(|a| a.len()), Some(0));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn reimport_keeps_annotations_and_topic_counts() {
    let workspace = temp_dir("examsync-import-annotations");
    let sheet = workspace.join("mock5.xlsx");
    write_workbook(
        &sheet,
        &sheet_with_metadata("Mock JEE 5", "2024-06-10", vec![result_row("R1", "Asha", "B1", 1)]),
    );

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "syllabus.seed",
        json!({ "subjects": [
            { "subject": "chemistry", "topics": [ { "name": "Hydrocarbons", "subtopics": ["Alkanes", "Alkenes"] } ] }
        ] }),
    );
    let first = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "results.import",
        json!({ "path": sheet.to_string_lossy() }),
    );
    let test_id = first["test"]["id"].as_str().expect("test id").to_string();
    let student = request_ok(&mut stdin, &mut reader, "4", "students.get", json!({ "rollNumber": "R1" }));
    let student_id = student["student"]["id"].as_str().expect("student id").to_string();
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "results.get",
        json!({ "studentId": student_id, "testId": test_id }),
    );
    let result_id = result["result"]["id"].as_str().expect("result id").to_string();

    let annotated = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "results.updateAnnotations",
        json!({
            "resultId": result_id,
            "subject": "chemistry",
            "negativeQuestions": [
                { "questionNumber": 31, "subtopic": "Alkenes" },
                { "questionNumber": 37, "subtopic": "Alkenes" }
            ],
            "unattemptedQuestions": [ { "questionNumber": 40, "subtopic": "Alkanes" } ],
            "remarks": "silly mistakes"
        }),
    );
    assert_eq!(
        annotated["result"]["perSubject"]["chemistry"]["negativeQuestions"]
            .as_array()
            .map(|a| a.len()),
        Some(2)
    );

    // New numbers for the same student and test.
    write_workbook(
        &sheet,
        &sheet_with_metadata("Mock JEE 5", "2024-06-10", vec![result_row("R1", "Asha", "B1", 7)]),
    );
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "results.import",
        json!({ "path": sheet.to_string_lossy() }),
    );
    assert_eq!(second["testResultsUpdated"], 1);
    assert_eq!(second["testResultsCreated"], 0);

    let after = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "results.get",
        json!({ "studentId": student_id, "testId": test_id }),
    );
    let chem = &after["result"]["perSubject"]["chemistry"];
    assert_eq!(chem["right"], 17);
    assert_eq!(chem["negativeQuestions"][1]["questionNumber"], 37);
    assert_eq!(chem["unattemptedQuestions"][0]["subtopic"], "Alkanes");
    assert_eq!(after["result"]["remarks"], "silly mistakes");

    let status = request_ok(&mut stdin, &mut reader, "9", "topicStatus.get", json!({ "studentId": student_id }));
    let rows = status["rows"].as_array().expect("rows");
    let find = |name: &str| {
        rows.iter()
            .find(|r| r["subtopicName"] == name)
            .cloned()
            .unwrap_or(Value::Null)
    };
    assert_eq!(find("Alkenes")["negativeCount"], 2);
    assert_eq!(find("Alkanes")["unattemptedCount"], 1);
    assert_eq!(find("Alkenes")["topicName"], "Hydrocarbons");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
