use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use serde_json::Value as JsonValue;

use super::error::err;
use super::types::AppState;

/// Structured handler failure carried up to the response envelope.
#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<JsonValue>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(code: &'static str, message: impl Into<String>, details: JsonValue) -> Self {
        Self {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn response(self, id: &str) -> JsonValue {
        err(id, self.code, self.message, self.details)
    }
}

pub fn query_failed(e: rusqlite::Error) -> HandlerErr {
    HandlerErr::new("db_query_failed", e.to_string())
}

pub fn insert_failed(e: rusqlite::Error) -> HandlerErr {
    HandlerErr::new("db_insert_failed", e.to_string())
}

pub fn update_failed(e: rusqlite::Error) -> HandlerErr {
    HandlerErr::new("db_update_failed", e.to_string())
}

pub fn delete_failed(e: rusqlite::Error) -> HandlerErr {
    HandlerErr::new("db_delete_failed", e.to_string())
}

pub fn tx_failed(e: rusqlite::Error) -> HandlerErr {
    HandlerErr::new("db_tx_failed", e.to_string())
}

pub fn require_conn(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn required_str(params: &JsonValue, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

/// Absent and explicit-null both mean "not provided".
pub fn optional_str(params: &JsonValue, key: &str) -> Option<String> {
    params
        .get(key)
        .filter(|v| !v.is_null())
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
}

pub fn optional_bool(params: &JsonValue, key: &str, default: bool) -> Result<bool, HandlerErr> {
    match params.get(key) {
        None => Ok(default),
        Some(v) if v.is_null() => Ok(default),
        Some(v) => v
            .as_bool()
            .ok_or_else(|| HandlerErr::new("bad_params", format!("{} must be boolean", key))),
    }
}

pub fn required_f64(params: &JsonValue, key: &str) -> Result<f64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("{} must be a number", key)))
}

pub fn optional_f64(params: &JsonValue, key: &str) -> Result<Option<f64>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| HandlerErr::new("bad_params", format!("{} must be a number", key))),
    }
}

pub fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// An unparseable due date is treated as no deadline rather than blocking
/// every submission.
pub fn is_past_due(due_at: &str, now: &str) -> bool {
    let (Ok(due), Ok(now)) = (
        DateTime::parse_from_rfc3339(due_at),
        DateTime::parse_from_rfc3339(now),
    ) else {
        return false;
    };
    now > due
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn required_str_rejects_blank() {
        assert!(required_str(&json!({ "name": "  " }), "name").is_err());
        assert!(required_str(&json!({}), "name").is_err());
        assert_eq!(
            required_str(&json!({ "name": " 7B " }), "name").unwrap(),
            "7B"
        );
    }

    #[test]
    fn past_due_comparison() {
        assert!(is_past_due("2026-03-01T00:00:00Z", "2026-03-02T00:00:00Z"));
        assert!(!is_past_due("2026-03-01T00:00:00Z", "2026-02-28T00:00:00Z"));
        assert!(!is_past_due("not a date", "2026-02-28T00:00:00Z"));
    }
}
