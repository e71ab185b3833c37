use super::core::password_digest;
use crate::db;
use crate::events::EventKind;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{actor_of, db_conn, optional_bool, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn user_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "username": r.get::<_, String>(1)?,
        "name": r.get::<_, String>(2)?,
        "nip": r.get::<_, Option<String>>(3)?,
        "role": r.get::<_, String>(4)?,
        "department": r.get::<_, String>(5)?,
        "active": r.get::<_, i64>(6)? != 0,
    }))
}

const USER_COLUMNS: &str = "id, username, name, nip, role, department, active";

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let include_inactive = optional_bool(req, "includeInactive").unwrap_or(false);
    let sql = if include_inactive {
        format!("SELECT {USER_COLUMNS} FROM users ORDER BY name")
    } else {
        format!("SELECT {USER_COLUMNS} FROM users WHERE active = 1 ORDER BY name")
    };
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |r| user_json(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(users) => ok(&req.id, json!({ "users": users })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn username_taken(
    conn: &rusqlite::Connection,
    username: &str,
    ignore_id: Option<&str>,
) -> rusqlite::Result<bool> {
    let existing: Option<String> = conn
        .query_row("SELECT id FROM users WHERE username = ?", [username], |r| {
            r.get(0)
        })
        .optional()?;
    Ok(match existing {
        Some(id) => ignore_id != Some(id.as_str()),
        None => false,
    })
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let username = match required_str(req, "username") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    let password = match required_str(req, "password") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    if username.is_empty() || name.is_empty() {
        return err(&req.id, "bad_params", "username and name must not be empty", None);
    }
    let role = optional_str(req, "role").unwrap_or_else(|| "teacher".to_string());
    if role != "teacher" && role != "admin" {
        return err(&req.id, "bad_params", "role must be teacher or admin", None);
    }

    match username_taken(conn, &username, None) {
        Ok(true) => return err(&req.id, "username_taken", "username already in use", None),
        Ok(false) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let user_id = Uuid::new_v4().to_string();
    let insert = conn.execute(
        "INSERT INTO users(id, username, password_sha256, name, nip, role, department, active, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, 1, ?)",
        (
            &user_id,
            &username,
            password_digest(&password),
            &name,
            optional_str(req, "nip"),
            &role,
            optional_str(req, "department").unwrap_or_default(),
            state.clock.now().to_rfc3339(),
        ),
    );
    if let Err(e) = insert {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "users" })),
        );
    }

    db::audit_append(
        conn,
        state.clock.now(),
        &actor_of(req),
        "users.create",
        json!({ "userId": user_id, "username": username }),
    );
    state.bus.emit(EventKind::UsersUpdated);
    ok(&req.id, json!({ "userId": user_id }))
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM users WHERE id = ?", [&user_id], |r| r.get(0))
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "user not found", None);
    }

    if let Some(username) = optional_str(req, "username") {
        match username_taken(conn, &username, Some(&user_id)) {
            Ok(true) => return err(&req.id, "username_taken", "username already in use", None),
            Ok(false) => {}
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    if let Some(role) = optional_str(req, "role") {
        if role != "teacher" && role != "admin" {
            return err(&req.id, "bad_params", "role must be teacher or admin", None);
        }
    }

    // Column-at-a-time updates keep the partial-update surface obvious.
    let fields: [(&str, Option<String>); 5] = [
        ("username", optional_str(req, "username")),
        ("name", optional_str(req, "name")),
        ("nip", optional_str(req, "nip")),
        ("role", optional_str(req, "role")),
        ("department", optional_str(req, "department")),
    ];
    for (column, value) in fields {
        let Some(value) = value else { continue };
        let sql = format!("UPDATE users SET {column} = ? WHERE id = ?");
        if let Err(e) = conn.execute(&sql, (&value, &user_id)) {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "users" })),
            );
        }
    }
    if let Some(password) = optional_str(req, "password") {
        if let Err(e) = conn.execute(
            "UPDATE users SET password_sha256 = ? WHERE id = ?",
            (password_digest(&password), &user_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(active) = optional_bool(req, "active") {
        if let Err(e) = conn.execute(
            "UPDATE users SET active = ? WHERE id = ?",
            (active as i64, &user_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }

    db::audit_append(
        conn,
        state.clock.now(),
        &actor_of(req),
        "users.update",
        json!({ "userId": user_id }),
    );
    state.bus.emit(EventKind::UsersUpdated);
    ok(&req.id, json!({ "ok": true }))
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    // A teacher with history keeps their rows; deactivate instead.
    let referenced: i64 = match conn.query_row(
        "SELECT (SELECT COUNT(*) FROM attendance_records WHERE user_id = ?1)
              + (SELECT COUNT(*) FROM teaching_logs WHERE user_id = ?1)
              + (SELECT COUNT(*) FROM schedules WHERE user_id = ?1)",
        [&user_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if referenced > 0 {
        return err(
            &req.id,
            "bad_params",
            "user has attendance, journal or schedule records; set active=false instead",
            Some(json!({ "referenceCount": referenced })),
        );
    }

    match conn.execute("DELETE FROM users WHERE id = ?", [&user_id]) {
        Ok(0) => err(&req.id, "not_found", "user not found", None),
        Ok(_) => {
            db::audit_append(
                conn,
                state.clock.now(),
                &actor_of(req),
                "users.delete",
                json!({ "userId": user_id }),
            );
            state.bus.emit(EventKind::UsersUpdated);
            ok(&req.id, json!({ "ok": true }))
        }
        Err(e) => err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "users" })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.list" => Some(handle_list(state, req)),
        "users.create" => Some(handle_create(state, req)),
        "users.update" => Some(handle_update(state, req)),
        "users.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
