use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_optional_bool, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::SyllabusSubject;
use crate::syllabus;
use rusqlite::Connection;
use serde_json::json;

fn syllabus_get(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let seeded = syllabus::is_seeded(conn).map_err(HandlerErr::db("db_query_failed"))?;
    let subjects = syllabus::load_syllabus(conn).map_err(HandlerErr::db("db_query_failed"))?;
    Ok(json!({ "seeded": seeded, "subjects": subjects }))
}

fn syllabus_seed(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let Some(raw) = params.get("subjects") else {
        return Err(HandlerErr::bad_params("missing subjects"));
    };
    let subjects: Vec<SyllabusSubject> = serde_json::from_value(raw.clone())
        .map_err(|e| HandlerErr::bad_params(format!("subjects is invalid: {}", e)))?;
    let replace = get_optional_bool(params, "replace")?.unwrap_or(false);

    let report = syllabus::seed_syllabus(conn, &subjects, replace)
        .map_err(HandlerErr::db("db_update_failed"))?;
    Ok(json!({
        "seeded": report.seeded,
        "skipped": !report.seeded,
        "subjectCount": report.subject_count,
        "topicCount": report.topic_count,
        "subtopicCount": report.subtopic_count,
    }))
}

fn handle_syllabus_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match syllabus_get(conn) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_syllabus_seed(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match syllabus_seed(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "syllabus.get" => Some(handle_syllabus_get(state, req)),
        "syllabus.seed" => Some(handle_syllabus_seed(state, req)),
        _ => None,
    }
}
