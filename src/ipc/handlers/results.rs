use crate::aggregate;
use crate::config::ImportConfig;
use crate::error::ImportError;
use crate::import;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_optional_str, get_required_str, get_subject, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::QuestionRef;
use crate::store;
use rusqlite::Connection;
use serde_json::json;
use std::path::Path;

impl From<ImportError> for HandlerErr {
    fn from(e: ImportError) -> Self {
        HandlerErr {
            code: e.code(),
            message: e.to_string(),
            details: Some(e.details()),
        }
    }
}

fn results_import(
    conn: &Connection,
    db_path: Option<&Path>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let path = get_required_str(params, "path")?;
    let test_id = get_optional_str(params, "testId")?.filter(|s| !s.is_empty());
    let cfg = ImportConfig::load(conn).map_err(HandlerErr::db("db_query_failed"))?;
    let summary = import::run_import(conn, Path::new(&path), test_id.as_deref(), &cfg, db_path)?;
    serde_json::to_value(summary).map_err(|e| HandlerErr::new("internal", e.to_string()))
}

fn results_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let results = store::list_results_for_student(conn, &student_id)
        .map_err(HandlerErr::db("db_query_failed"))?;
    Ok(json!({ "results": results }))
}

fn results_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let test_id = get_required_str(params, "testId")?;
    match store::find_result(conn, &student_id, &test_id).map_err(HandlerErr::db("db_query_failed"))? {
        Some(result) => Ok(json!({ "result": result })),
        None => Err(HandlerErr::not_found("result not found")),
    }
}

fn parse_question_list(params: &serde_json::Value, key: &str) -> Result<Option<Vec<QuestionRef>>, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => serde_json::from_value::<Vec<QuestionRef>>(v.clone())
            .map(Some)
            .map_err(|e| HandlerErr::bad_params(format!("{} is invalid: {}", key, e))),
    }
}

fn results_update_annotations(
    conn: &Connection,
    db_path: Option<&Path>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let result_id = get_required_str(params, "resultId")?;
    let subject = get_subject(params, "subject")?;
    let negative = parse_question_list(params, "negativeQuestions")?;
    let unattempted = parse_question_list(params, "unattemptedQuestions")?;
    let remarks = get_optional_str(params, "remarks")?;

    let Some(existing) = store::get_result(conn, &result_id).map_err(HandlerErr::db("db_query_failed"))?
    else {
        return Err(HandlerErr::not_found("result not found"));
    };
    store::update_result_annotations(
        conn,
        &result_id,
        subject,
        negative.as_deref(),
        unattempted.as_deref(),
        remarks.as_deref(),
    )
    .map_err(HandlerErr::db("db_update_failed"))?;

    // The annotation write has succeeded; aggregation problems are only logged.
    let mode = match ImportConfig::load(conn) {
        Ok(cfg) => cfg.aggregation_mode,
        Err(e) => {
            tracing::warn!(error = %e, "could not load import settings; aggregating inline");
            ImportConfig::default().aggregation_mode
        }
    };
    aggregate::schedule_recompute(conn, db_path, mode, vec![existing.student_id.clone()]);

    let updated = store::get_result(conn, &result_id)
        .map_err(HandlerErr::db("db_query_failed"))?
        .unwrap_or(existing);
    Ok(json!({ "result": updated }))
}

fn handle_results_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let db_path = state.db_path();
    match results_import(conn, db_path.as_deref(), &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_results_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "results": [] }));
    };
    match results_list(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_results_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match results_get(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_results_update_annotations(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let db_path = state.db_path();
    match results_update_annotations(conn, db_path.as_deref(), &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "results.import" => Some(handle_results_import(state, req)),
        "results.list" => Some(handle_results_list(state, req)),
        "results.get" => Some(handle_results_get(state, req)),
        "results.updateAnnotations" => Some(handle_results_update_annotations(state, req)),
        _ => None,
    }
}
