use crate::db;
use crate::export;
use crate::ipc::helpers::{param_i64, param_str, reply, require_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_export_evaluation_workbook(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let evaluation_id = param_i64(req, "evaluationId")?;
    let out_path = param_str(req, "outPath")?.trim().to_string();
    if out_path.is_empty() {
        return Err(HandlerErr::bad_params("missing outPath"));
    }

    let Some(evaluation) = db::evaluation_get(conn, evaluation_id).map_err(HandlerErr::query)? else {
        return Err(HandlerErr::new("not_found", "evaluation not opened")
            .with_details(json!({ "evaluationId": evaluation_id })));
    };

    let out = PathBuf::from(&out_path);
    let summary = export::export_evaluation_workbook(conn, &evaluation, &out).map_err(|e| {
        HandlerErr::new("io_failed", format!("{e:#}")).with_details(json!({ "path": out_path }))
    })?;

    log::info!(
        "exported evaluation {} to {} ({} sheets, {} responses)",
        evaluation_id,
        out_path,
        summary.sheet_count,
        summary.response_count
    );
    Ok(json!({
        "path": out_path,
        "format": summary.format,
        "sheetCount": summary.sheet_count,
        "responseCount": summary.response_count,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "export.evaluationWorkbook" => Some(reply(req, handle_export_evaluation_workbook(state, req))),
        _ => None,
    }
}
