use crate::validate::Violation;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

/// What the UI should show. Replaces alert boxes, toasts and silent failures
/// with a single list the caller renders in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub severity: Severity,
    pub message: String,
}

impl Notification {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(Severity::Success, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }
}

/// One warning per violation, in validation order.
pub fn from_violations(violations: &[Violation]) -> Vec<Notification> {
    violations
        .iter()
        .map(|v| Notification::new(Severity::Warning, v.message.clone()))
        .collect()
}

pub fn to_json(notes: &[Notification]) -> serde_json::Value {
    serde_json::to_value(notes).unwrap_or_else(|_| serde_json::Value::Array(Vec::new()))
}
