use crate::db;
use crate::events::EventKind;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{actor_of, db_conn, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "classes": [] }));
    };

    // Counts via correlated subqueries so joins cannot double-count.
    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.name,
           c.level,
           c.homeroom_user_id,
           (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id AND s.active = 1) AS student_count,
           (SELECT COUNT(*) FROM schedules sc WHERE sc.class_id = c.id) AS schedule_count
         FROM classes c
         ORDER BY c.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "level": row.get::<_, Option<String>>(2)?,
                "homeroomUserId": row.get::<_, Option<String>>(3)?,
                "studentCount": row.get::<_, i64>(4)?,
                "scheduleCount": row.get::<_, i64>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
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

    let class_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO classes(id, name, level, homeroom_user_id) VALUES(?, ?, ?, ?)",
        (
            &class_id,
            &name,
            optional_str(req, "level"),
            optional_str(req, "homeroomUserId"),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        );
    }

    db::audit_append(
        conn,
        state.clock.now(),
        &actor_of(req),
        "classes.create",
        json!({ "classId": class_id, "name": name }),
    );
    state.bus.emit(EventKind::ClassesUpdated);
    ok(&req.id, json!({ "classId": class_id, "name": name }))
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "class not found", None);
    }

    let fields: [(&str, Option<String>); 3] = [
        ("name", optional_str(req, "name")),
        ("level", optional_str(req, "level")),
        ("homeroom_user_id", optional_str(req, "homeroomUserId")),
    ];
    for (column, value) in fields {
        let Some(value) = value else { continue };
        let sql = format!("UPDATE classes SET {column} = ? WHERE id = ?");
        if let Err(e) = conn.execute(&sql, (&value, &class_id)) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }

    db::audit_append(
        conn,
        state.clock.now(),
        &actor_of(req),
        "classes.update",
        json!({ "classId": class_id }),
    );
    state.bus.emit(EventKind::ClassesUpdated);
    ok(&req.id, json!({ "ok": true }))
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "class not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicit dependency order (no ON DELETE CASCADE).
    if let Err(e) = tx.execute(
        "DELETE FROM student_attendance
         WHERE teaching_log_id IN (SELECT id FROM teaching_logs WHERE class_id = ?)
            OR student_id IN (SELECT id FROM students WHERE class_id = ?)",
        (&class_id, &class_id),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "student_attendance" })),
        );
    }

    if let Err(e) = tx.execute("DELETE FROM teaching_logs WHERE class_id = ?", [&class_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "teaching_logs" })),
        );
    }

    if let Err(e) = tx.execute("DELETE FROM schedules WHERE class_id = ?", [&class_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "schedules" })),
        );
    }

    if let Err(e) = tx.execute("DELETE FROM students WHERE class_id = ?", [&class_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    if let Err(e) = tx.execute("DELETE FROM classes WHERE id = ?", [&class_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    db::audit_append(
        conn,
        state.clock.now(),
        &actor_of(req),
        "classes.delete",
        json!({ "classId": class_id }),
    );
    state.bus.emit(EventKind::ClassesUpdated);
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_list(state, req)),
        "classes.create" => Some(handle_create(state, req)),
        "classes.update" => Some(handle_update(state, req)),
        "classes.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
