use super::core::password_digest;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;

/// Mock credential check: a username/digest comparison against the users
/// table. No sessions, no tokens — the caller is trusted once this says yes.
fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let username = match required_str(req, "username") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let password = match required_str(req, "password") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let row = conn
        .query_row(
            "SELECT id, password_sha256, name, nip, role, department, active
             FROM users WHERE username = ?",
            [&username],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, Option<String>>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, String>(5)?,
                    r.get::<_, i64>(6)? != 0,
                ))
            },
        )
        .optional();

    let row = match row {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    match row {
        Some((id, digest, name, nip, role, department, active))
            if active && digest == password_digest(&password) =>
        {
            tracing::info!(%username, "login ok");
            ok(
                &req.id,
                json!({
                    "user": {
                        "id": id,
                        "username": username,
                        "name": name,
                        "nip": nip,
                        "role": role,
                        "department": department,
                    }
                }),
            )
        }
        _ => {
            tracing::warn!(%username, "login rejected");
            err(
                &req.id,
                "invalid_credentials",
                "username or password is wrong",
                None,
            )
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.login" => Some(handle_login(state, req)),
        _ => None,
    }
}
