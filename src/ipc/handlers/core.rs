use crate::config;
use crate::db;
use crate::ipc::helpers::{param_str, reply, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, _req: &Request) -> Result<serde_json::Value, HandlerErr> {
    Ok(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
    }))
}

fn handle_workspace_select(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let path = PathBuf::from(param_str(req, "path")?);

    let conn = db::open_db(&path).map_err(|e| HandlerErr::new("db_open_failed", format!("{e:?}")))?;
    // A broken stored config must not keep the workspace from opening.
    if let Err(e) = config::load(&conn) {
        log::warn!("ignoring stored engine config: {e}");
    }

    log::info!("workspace opened at {}", path.to_string_lossy());
    state.workspace = Some(path.clone());
    state.db = Some(conn);
    Ok(json!({ "workspacePath": path.to_string_lossy() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(reply(req, handle_health(state, req))),
        "workspace.select" => Some(reply(req, handle_workspace_select(state, req))),
        _ => None,
    }
}
