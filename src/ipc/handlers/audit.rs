use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_i64};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let limit = optional_i64(req, "limit").unwrap_or(100).clamp(1, 1000);

    let mut stmt = match conn.prepare(
        "SELECT id, at, actor, action, details
         FROM audit_logs ORDER BY at DESC LIMIT ?",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([limit], |r| {
            let details_raw: Option<String> = r.get(4)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "at": r.get::<_, String>(1)?,
                "actor": r.get::<_, String>(2)?,
                "action": r.get::<_, String>(3)?,
                "details": details_raw
                    .and_then(|raw| serde_json::from_str::<serde_json::Value>(&raw).ok()),
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(entries) => ok(&req.id, json!({ "entries": entries })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "audit.list" => Some(handle_list(state, req)),
        _ => None,
    }
}
