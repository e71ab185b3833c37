use crate::db;
use crate::events::EventKind;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{actor_of, db_conn, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let mut stmt = match conn.prepare("SELECT id, name, code FROM subjects ORDER BY name") {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "code": r.get::<_, Option<String>>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }

    let subject_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO subjects(id, name, code) VALUES(?, ?, ?)",
        (&subject_id, &name, optional_str(req, "code")),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "subjects" })),
        );
    }

    db::audit_append(
        conn,
        state.clock.now(),
        &actor_of(req),
        "subjects.create",
        json!({ "subjectId": subject_id, "name": name }),
    );
    state.bus.emit(EventKind::SubjectsUpdated);
    ok(&req.id, json!({ "subjectId": subject_id }))
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [&subject_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "subject not found", None);
    }

    let fields: [(&str, Option<String>); 2] = [
        ("name", optional_str(req, "name")),
        ("code", optional_str(req, "code")),
    ];
    for (column, value) in fields {
        let Some(value) = value else { continue };
        let sql = format!("UPDATE subjects SET {column} = ? WHERE id = ?");
        if let Err(e) = conn.execute(&sql, (&value, &subject_id)) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }

    db::audit_append(
        conn,
        state.clock.now(),
        &actor_of(req),
        "subjects.update",
        json!({ "subjectId": subject_id }),
    );
    state.bus.emit(EventKind::SubjectsUpdated);
    ok(&req.id, json!({ "ok": true }))
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let referenced: i64 = match conn.query_row(
        "SELECT (SELECT COUNT(*) FROM schedules WHERE subject_id = ?1)
              + (SELECT COUNT(*) FROM teaching_logs WHERE subject_id = ?1)",
        [&subject_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if referenced > 0 {
        return err(
            &req.id,
            "bad_params",
            "subject is referenced by schedules or journals",
            Some(json!({ "referenceCount": referenced })),
        );
    }

    match conn.execute("DELETE FROM subjects WHERE id = ?", [&subject_id]) {
        Ok(0) => err(&req.id, "not_found", "subject not found", None),
        Ok(_) => {
            db::audit_append(
                conn,
                state.clock.now(),
                &actor_of(req),
                "subjects.delete",
                json!({ "subjectId": subject_id }),
            );
            state.bus.emit(EventKind::SubjectsUpdated);
            ok(&req.id, json!({ "ok": true }))
        }
        Err(e) => err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "subjects" })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.list" => Some(handle_list(state, req)),
        "subjects.create" => Some(handle_create(state, req)),
        "subjects.update" => Some(handle_update(state, req)),
        "subjects.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
