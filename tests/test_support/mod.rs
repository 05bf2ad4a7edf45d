#![allow(dead_code)]

use rust_xlsxwriter::Workbook;
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub const CANONICAL_HEADER: [&str; 21] = [
    "StuID", "Name", "Batch", "Phy-R", "Phy-W", "Phy-U", "Phy-T", "Chem-R", "Chem-W", "Chem-U",
    "Chem-T", "Math-R", "Math-W", "Math-U", "Math-T", "Total-R", "Total-W", "Total-U",
    "Total-S", "%age", "Rank",
];

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_examsyncd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn examsyncd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or(Value::Null)
}

pub fn error_code(resp: &Value) -> &str {
    resp.get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

/// Writes the rows to the first worksheet, starting at `A1`. Strings and
/// numbers are written as such; `null` leaves the cell empty.
pub fn write_workbook(path: &Path, rows: &[Vec<Value>]) {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    for (r, row) in rows.iter().enumerate() {
        for (c, cell) in row.iter().enumerate() {
            match cell {
                Value::String(s) => {
                    worksheet
                        .write_string(r as u32, c as u16, s.as_str())
                        .expect("write string");
                }
                Value::Number(n) => {
                    worksheet
                        .write_number(r as u32, c as u16, n.as_f64().unwrap_or(0.0))
                        .expect("write number");
                }
                _ => {}
            }
        }
    }
    workbook.save(path).expect("save workbook");
}

pub fn header_row() -> Vec<Value> {
    CANONICAL_HEADER.iter().map(|h| json!(h)).collect()
}

/// One result row with internally consistent numbers derived from `seed`.
pub fn result_row(roll: &str, name: &str, batch: &str, seed: i64) -> Vec<Value> {
    let right = 10 + seed;
    let (wrong, unattempted) = (2, 3);
    let score = right * 4 - wrong;
    let mut row = vec![json!(roll), json!(name), json!(batch)];
    for _ in 0..3 {
        row.extend([json!(right), json!(wrong), json!(unattempted), json!(score)]);
    }
    row.extend([
        json!(right * 3),
        json!(wrong * 3),
        json!(unattempted * 3),
        json!(score * 3),
        json!(score as f64 * 3.0 / 300.0 * 100.0),
        json!(seed),
    ]);
    row
}

/// Metadata block in column I (rows 1-2), blank rows through 7, the header on
/// row 8 and data from row 9.
pub fn sheet_with_metadata(test_name: &str, test_date: &str, data: Vec<Vec<Value>>) -> Vec<Vec<Value>> {
    let mut rows: Vec<Vec<Value>> = vec![Vec::new(); 7];
    let mut i1 = vec![Value::Null; 8];
    i1.push(json!(format!("Test Name: {}", test_name)));
    rows[0] = i1;
    let mut i2 = vec![Value::Null; 8];
    i2.push(json!(test_date));
    rows[1] = i2;
    rows.push(header_row());
    rows.extend(data);
    rows
}
