use rusqlite::Connection;
use serde_json::json;

use crate::gradebook::GradebookError;
use crate::ipc::error::err;
use crate::ipc::types::{Actor, AppState, Role};

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn db(code: &'static str, e: rusqlite::Error, table: &str) -> Self {
        Self {
            code,
            message: e.to_string(),
            details: Some(json!({ "table": table })),
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn bad_params(message: impl Into<String>) -> HandlerErr {
    HandlerErr::new("bad_params", message)
}

pub fn required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| bad_params(format!("missing {}", key)))
}

/// Missing or null is None; any other non-string is a params error.
pub fn optional_str(params: &serde_json::Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| bad_params(format!("{} must be a string", key))),
    }
}

pub fn optional_bool(params: &serde_json::Value, key: &str) -> Result<Option<bool>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| bad_params(format!("{} must be a boolean", key))),
    }
}

/// Attendance counters: present-but-not-an-integer is a value error, not a
/// params error, so the caller sees the same `invalid_value` it gets for a
/// negative counter.
pub fn optional_counter(params: &serde_json::Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v.as_i64().map(Some).ok_or_else(|| {
            HandlerErr::new("invalid_value", format!("{} must be an integer", key))
        }),
    }
}

pub fn require_db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn require_session(state: &AppState) -> Result<&Actor, HandlerErr> {
    state
        .actor
        .as_ref()
        .ok_or_else(|| HandlerErr::new("forbidden", "open a session first"))
}

pub fn require_admin(state: &AppState) -> Result<&Actor, HandlerErr> {
    let actor = require_session(state)?;
    if actor.role != Role::Admin {
        return Err(HandlerErr::new("forbidden", "admin role required"));
    }
    Ok(actor)
}

pub fn gradebook_err(e: GradebookError) -> HandlerErr {
    match e {
        GradebookError::PeriodLocked => HandlerErr::new(
            "period_locked",
            "bimester is closed; grading is active only for open bimesters",
        ),
        GradebookError::InvalidValue(msg) => HandlerErr::new("invalid_value", msg),
        GradebookError::NotFound(what) => HandlerErr::new("not_found", format!("{} not found", what)),
        GradebookError::Store(e) => HandlerErr::new("store_unavailable", e.to_string()),
    }
}

pub fn now_ts() -> String {
    chrono::Utc::now().to_rfc3339()
}
