use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{parse_date, parse_time};
use chrono::{NaiveDate, NaiveTime};
use rusqlite::Connection;
use serde_json::Value;

/// Runs a handler body against the open workspace and wraps the result.
pub fn with_conn<F>(state: &mut AppState, req: &Request, f: F) -> Value
where
    F: FnOnce(&Connection, &Value) -> Result<Value, HandlerErr>,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

/// Identifiers arrive as strings; integer ids are accepted and stringified.
fn id_value(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

pub fn required_id(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(id_value)
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn optional_id(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(v) => id_value(v)
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a string or integer id", key))),
    }
}

pub fn required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn optional_str(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let t = s.trim();
            Ok(if t.is_empty() { None } else { Some(t.to_string()) })
        }
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be string or null", key))),
    }
}

/// Patch semantics: absent → `None`, null or blank → `Some(None)`.
pub fn nullable_str(params: &Value, key: &str) -> Result<Option<Option<String>>, HandlerErr> {
    if params.get(key).is_none() {
        return Ok(None);
    }
    optional_str(params, key).map(Some)
}

pub fn nullable_id(params: &Value, key: &str) -> Result<Option<Option<String>>, HandlerErr> {
    if params.get(key).is_none() {
        return Ok(None);
    }
    optional_id(params, key).map(Some)
}

pub fn optional_bool(params: &Value, key: &str) -> Result<Option<bool>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be boolean", key))),
    }
}

pub fn optional_i64(params: &Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be integer", key))),
    }
}

pub fn optional_date(params: &Value, key: &str) -> Result<Option<NaiveDate>, HandlerErr> {
    match optional_str(params, key)? {
        Some(s) => Ok(Some(parse_date(&s)?)),
        None => Ok(None),
    }
}

pub fn required_date(params: &Value, key: &str) -> Result<NaiveDate, HandlerErr> {
    Ok(parse_date(&required_str(params, key)?)?)
}

pub fn nullable_date(params: &Value, key: &str) -> Result<Option<Option<NaiveDate>>, HandlerErr> {
    if params.get(key).is_none() {
        return Ok(None);
    }
    optional_date(params, key).map(Some)
}

pub fn optional_time(params: &Value, key: &str) -> Result<Option<NaiveTime>, HandlerErr> {
    match optional_str(params, key)? {
        Some(s) => Ok(Some(parse_time(&s)?)),
        None => Ok(None),
    }
}

pub fn nullable_time(params: &Value, key: &str) -> Result<Option<Option<NaiveTime>>, HandlerErr> {
    if params.get(key).is_none() {
        return Ok(None);
    }
    optional_time(params, key).map(Some)
}

pub fn optional_day_of_week(params: &Value, key: &str) -> Result<Option<u32>, HandlerErr> {
    match optional_i64(params, key)? {
        Some(d) if (1..=7).contains(&d) => Ok(Some(d as u32)),
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be in 1..=7", key))),
        None => Ok(None),
    }
}
