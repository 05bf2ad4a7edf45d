use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_optional_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::{SourceType, StudentInput, StudentProfile};
use crate::reconcile::{self, Change};
use crate::store;
use rusqlite::Connection;
use serde_json::json;

fn students_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let batch = get_optional_str(params, "batch")?.filter(|b| !b.is_empty());
    let students =
        store::list_students(conn, batch.as_deref()).map_err(HandlerErr::db("db_query_failed"))?;
    Ok(json!({ "students": students }))
}

fn students_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let found = if let Some(id) = get_optional_str(params, "studentId")? {
        store::get_student(conn, &id)
    } else if let Some(roll) = get_optional_str(params, "rollNumber")? {
        store::find_student_by_roll(conn, &roll)
    } else {
        return Err(HandlerErr::bad_params("missing studentId or rollNumber"));
    };
    match found.map_err(HandlerErr::db("db_query_failed"))? {
        Some(student) => Ok(json!({ "student": student })),
        None => Err(HandlerErr::not_found("student not found")),
    }
}

fn students_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let roll_number = get_required_str(params, "rollNumber")?;
    let name = get_required_str(params, "name")?;
    let batch = get_optional_str(params, "batch")?.unwrap_or_default();
    let profile: StudentProfile = serde_json::from_value(params.clone())
        .map_err(|e| HandlerErr::bad_params(format!("invalid profile fields: {}", e)))?;

    let input = StudentInput {
        roll_number,
        name,
        batch,
        profile,
    };
    let (student, change) = reconcile::reconcile_student(conn, &input, SourceType::Manual)
        .map_err(HandlerErr::db("db_insert_failed"))?;
    Ok(json!({ "student": student, "created": change == Change::Created }))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "students": [] }));
    };
    match students_list(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_students_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match students_get(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match students_create(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.get" => Some(handle_students_get(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        _ => None,
    }
}
