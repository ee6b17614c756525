use crate::ipc::error::{err, err_with_notifications, ok};
use crate::ipc::types::{AppState, Request};
use crate::notify::Notification;
use rusqlite::Connection;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub notifications: Option<Vec<Notification>>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            notifications: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_notifications(mut self, notes: Vec<Notification>) -> Self {
        self.notifications = Some(notes);
        self
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn query(e: impl std::fmt::Display) -> Self {
        Self::new("db_query_failed", e.to_string())
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        log::warn!("request {} failed: {} ({})", id, self.message, self.code);
        match self.notifications {
            Some(notes) => {
                err_with_notifications(id, self.code, self.message, self.details, &notes)
            }
            None => err(id, self.code, self.message, self.details),
        }
    }
}

pub fn reply(req: &Request, result: Result<serde_json::Value, HandlerErr>) -> serde_json::Value {
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn require_db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn param_i64(req: &Request, name: &str) -> Result<i64, HandlerErr> {
    match param_opt_i64(req, name)? {
        Some(v) => Ok(v),
        None => Err(HandlerErr::bad_params(format!("missing {}", name))),
    }
}

/// Accepts JSON integers and integer strings, since ids come from route
/// parameters as often as from JSON bodies.
pub fn param_opt_i64(req: &Request, name: &str) -> Result<Option<i64>, HandlerErr> {
    let Some(v) = req.params.get(name).filter(|v| !v.is_null()) else {
        return Ok(None);
    };
    if let Some(n) = v.as_i64() {
        return Ok(Some(n));
    }
    if let Some(n) = v.as_str().and_then(|s| s.trim().parse::<i64>().ok()) {
        return Ok(Some(n));
    }
    Err(HandlerErr::bad_params(format!("{} must be an integer", name)))
}

pub fn param_str<'a>(req: &'a Request, name: &str) -> Result<&'a str, HandlerErr> {
    req.params
        .get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", name)))
}
