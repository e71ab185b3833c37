use crate::config::SchoolConfig;
use crate::db;
use crate::events::EventKind;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{actor_of, db_conn};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    match SchoolConfig::load(conn) {
        Ok(cfg) => match serde_json::to_value(&cfg) {
            Ok(v) => ok(&req.id, json!({ "settings": v })),
            Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
        },
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

/// Partial update: top-level fields replace, nested `zone`/`window` objects
/// replace whole. The merged result must still pass the config invariants
/// before anything is written.
fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let Some(patch) = req.params.get("settings").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing settings object", None);
    };

    let current = match SchoolConfig::load(conn) {
        Ok(cfg) => cfg,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let mut merged = match serde_json::to_value(&current) {
        Ok(serde_json::Value::Object(m)) => m,
        _ => return err(&req.id, "db_query_failed", "settings not an object", None),
    };
    for (key, value) in patch {
        merged.insert(key.clone(), value.clone());
    }

    let next: SchoolConfig = match serde_json::from_value(serde_json::Value::Object(merged)) {
        Ok(cfg) => cfg,
        Err(e) => return err(&req.id, "bad_params", e.to_string(), None),
    };
    if let Err(reason) = next.validate() {
        return err(&req.id, reason.code(), reason.message(), None);
    }

    if let Err(e) = next.save(conn) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    db::audit_append(
        conn,
        state.clock.now(),
        &actor_of(req),
        "settings.update",
        json!({ "changed": patch.keys().collect::<Vec<_>>() }),
    );
    state.bus.emit(EventKind::SettingsUpdated);

    match serde_json::to_value(&next) {
        Ok(v) => ok(&req.id, json!({ "settings": v })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "settings.get" => Some(handle_get(state, req)),
        "settings.update" => Some(handle_update(state, req)),
        _ => None,
    }
}
