use crate::ipc::handlers::config::current;
use crate::ipc::helpers::{param_str, reply, require_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::wizard::{PasswordResetWizard, WizardError, WizardView};
use chrono::Utc;

fn wizard_error(e: WizardError) -> HandlerErr {
    match e {
        WizardError::BadState { .. } => HandlerErr::new("bad_state", e.to_string()),
        WizardError::BadInput(m) => HandlerErr::bad_params(m),
        WizardError::Storage(e) => HandlerErr::new("db_query_failed", e.to_string()),
    }
}

fn view_json(view: WizardView) -> Result<serde_json::Value, HandlerErr> {
    serde_json::to_value(view).map_err(|e| HandlerErr::new("io_failed", e.to_string()))
}

fn handle_wizard(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let wizard =
        PasswordResetWizard::new(conn, current(conn).wizard_ttl_seconds).map_err(wizard_error)?;
    let now = Utc::now();
    let view = match req.method.as_str() {
        "wizard.start" => wizard.start(param_str(req, "email")?, now),
        "wizard.confirm" => wizard.confirm(param_str(req, "code")?, now),
        "wizard.cancel" => wizard.cancel(),
        _ => wizard.current(now),
    }
    .map_err(wizard_error)?;
    view_json(view)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "wizard.get" | "wizard.start" | "wizard.confirm" | "wizard.cancel" => {
            Some(reply(req, handle_wizard(state, req)))
        }
        _ => None,
    }
}
