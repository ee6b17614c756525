use crate::config::{self, EngineConfig};
use crate::ipc::helpers::{reply, require_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;

/// Falls back to defaults when the stored value is unreadable, so a bad
/// setting can still be overwritten through `config.update`.
pub fn current(conn: &Connection) -> EngineConfig {
    config::load(conn).unwrap_or_else(|e| {
        log::warn!("using default engine config: {e}");
        EngineConfig::default()
    })
}

fn to_json(cfg: &EngineConfig) -> Result<serde_json::Value, HandlerErr> {
    serde_json::to_value(cfg).map_err(|e| HandlerErr::new("io_failed", e.to_string()))
}

fn handle_config_get(state: &mut AppState, _req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    to_json(&current(conn))
}

fn handle_config_update(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let Some(patch) = req.params.get("patch") else {
        return Err(HandlerErr::bad_params("missing patch"));
    };
    let next = current(conn)
        .apply_patch(patch)
        .map_err(HandlerErr::bad_params)?;
    config::save(conn, &next).map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    log::info!(
        "engine config updated: scoreMax={} exemptTitle={:?} wizardTtlSeconds={}",
        next.score_max,
        next.exempt_title,
        next.wizard_ttl_seconds
    );
    to_json(&next)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "config.get" => Some(reply(req, handle_config_get(state, req))),
        "config.update" => Some(reply(req, handle_config_update(state, req))),
        _ => None,
    }
}
