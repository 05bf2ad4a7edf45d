use crate::aggregate;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_optional_bool, get_optional_str, get_required_str, get_subject, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::store;
use rusqlite::Connection;
use serde_json::json;

fn require_student(conn: &Connection, student_id: &str) -> Result<(), HandlerErr> {
    match store::get_student(conn, student_id).map_err(HandlerErr::db("db_query_failed"))? {
        Some(_) => Ok(()),
        None => Err(HandlerErr::not_found("student not found")),
    }
}

/// Reads always recompute first so the view reflects the latest annotations.
fn topic_status_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    require_student(conn, &student_id)?;
    if let Err(e) = aggregate::recompute_topic_status(conn, &student_id) {
        tracing::warn!(student_id = %student_id, error = %format!("{:#}", e), "recompute before read failed");
    }
    let rows = store::list_topic_status(conn, &student_id).map_err(HandlerErr::db("db_query_failed"))?;
    Ok(json!({ "rows": rows }))
}

fn topic_status_recompute(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let students = match get_optional_str(params, "studentId")?.filter(|s| !s.is_empty()) {
        Some(student_id) => {
            require_student(conn, &student_id)?;
            aggregate::recompute_topic_status(conn, &student_id)
                .map_err(HandlerErr::db("aggregation_failed"))?;
            1
        }
        None => aggregate::recompute_all(conn).map_err(HandlerErr::db("aggregation_failed"))?,
    };
    Ok(json!({ "students": students }))
}

fn topic_status_set_completed(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let subject = get_subject(params, "subject")?;
    let topic_name = get_required_str(params, "topicName")?;
    let subtopic_name = get_required_str(params, "subtopicName")?;
    let Some(completed) = get_optional_bool(params, "completed")? else {
        return Err(HandlerErr::bad_params("missing completed"));
    };
    require_student(conn, &student_id)?;
    store::set_topic_completed(conn, &student_id, &(subject, topic_name, subtopic_name), completed)
        .map_err(HandlerErr::db("db_update_failed"))?;
    Ok(json!({ "ok": true }))
}

fn handle_topic_status_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match topic_status_get(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_topic_status_recompute(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match topic_status_recompute(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_topic_status_set_completed(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match topic_status_set_completed(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "topicStatus.get" => Some(handle_topic_status_get(state, req)),
        "topicStatus.recompute" => Some(handle_topic_status_recompute(state, req)),
        "topicStatus.setCompleted" => Some(handle_topic_status_set_completed(state, req)),
        _ => None,
    }
}
