use crate::notify::{self, Notification};
use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let message = message.into();
    let notes = vec![Notification::error(message.clone())];
    err_with_notifications(id, code, message, details, &notes)
}

/// Error reply whose `notifications` replace the default single error toast.
pub fn err_with_notifications(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
    notifications: &[Notification],
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
        "notifications": notify::to_json(notifications),
    })
}
