use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use chrono::{DateTime, FixedOffset, NaiveDate};
use rusqlite::Connection;

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

/// Absent and JSON null are both "not provided".
pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
}

pub fn optional_bool(req: &Request, key: &str) -> Option<bool> {
    req.params.get(key).and_then(|v| v.as_bool())
}

pub fn optional_i64(req: &Request, key: &str) -> Option<i64> {
    req.params.get(key).and_then(|v| v.as_i64())
}

pub fn required_f64(req: &Request, key: &str) -> Result<f64, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn required_date(req: &Request, key: &str) -> Result<NaiveDate, serde_json::Value> {
    let raw = required_str(req, key)?;
    raw.parse().map_err(|_| {
        err(
            &req.id,
            "bad_params",
            format!("{} must be YYYY-MM-DD", key),
            None,
        )
    })
}

pub fn optional_date(req: &Request, key: &str) -> Result<Option<NaiveDate>, serde_json::Value> {
    match optional_str(req, key) {
        None => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(|_| {
            err(
                &req.id,
                "bad_params",
                format!("{} must be YYYY-MM-DD", key),
                None,
            )
        }),
    }
}

/// Effective instant for an operation: an explicit `at` override (manual
/// entry / backfill) or the clock, always in the school zone.
pub fn effective_now(
    state: &AppState,
    req: &Request,
) -> Result<DateTime<FixedOffset>, serde_json::Value> {
    match optional_str(req, "at") {
        None => Ok(state.clock.now()),
        Some(raw) => crate::clock::parse_instant(&raw)
            .ok_or_else(|| err(&req.id, "bad_params", "at must be RFC3339", None)),
    }
}

/// Who to blame in the audit trail. The UI passes the signed-in user.
pub fn actor_of(req: &Request) -> String {
    optional_str(req, "actorId").unwrap_or_else(|| "system".to_string())
}
