use crate::config::ImportConfig;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_optional_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::layout::parse_test_date;
use crate::store;
use rusqlite::Connection;
use serde_json::json;

fn tests_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let tests = store::list_tests(conn).map_err(HandlerErr::db("db_query_failed"))?;
    Ok(json!({ "tests": tests }))
}

fn tests_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let date = match get_optional_str(params, "date")? {
        Some(raw) if !raw.is_empty() => parse_test_date(&raw)
            .ok_or_else(|| HandlerErr::bad_params(format!("unrecognized date: {}", raw)))?,
        _ => chrono::Local::now().date_naive(),
    };
    let max_marks = match params.get("maxMarks") {
        None | Some(serde_json::Value::Null) => ImportConfig::load(conn)
            .map_err(HandlerErr::db("db_query_failed"))?
            .default_max_marks,
        Some(v) => v
            .as_i64()
            .filter(|n| *n > 0)
            .ok_or_else(|| HandlerErr::bad_params("maxMarks must be a positive integer"))?,
    };

    let date = date.format("%Y-%m-%d").to_string();
    let created = store::find_or_create_test(conn, &name, &date, max_marks)
        .map_err(HandlerErr::db("db_insert_failed"))?;
    let was_created = created.was_inserted();
    Ok(json!({ "test": created.into_inner(), "created": was_created }))
}

fn handle_tests_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "tests": [] }));
    };
    match tests_list(conn) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_tests_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match tests_create(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "tests.list" => Some(handle_tests_list(state, req)),
        "tests.create" => Some(handle_tests_create(state, req)),
        _ => None,
    }
}
