use crate::db;
use crate::events::EventKind;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    actor_of, db_conn, optional_bool, optional_i64, optional_str, required_str,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let class_id = optional_str(req, "classId");
    let include_inactive = optional_bool(req, "includeInactive").unwrap_or(false);

    let mut sql = String::from(
        "SELECT id, class_id, name, nis, active, sort_order FROM students WHERE 1=1",
    );
    let mut params: Vec<String> = Vec::new();
    if let Some(cid) = class_id {
        sql.push_str(" AND class_id = ?");
        params.push(cid);
    }
    if !include_inactive {
        sql.push_str(" AND active = 1");
    }
    sql.push_str(" ORDER BY sort_order, name");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params.iter()), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "classId": r.get::<_, String>(1)?,
                "name": r.get::<_, String>(2)?,
                "nis": r.get::<_, Option<String>>(3)?,
                "active": r.get::<_, i64>(4)? != 0,
                "sortOrder": r.get::<_, i64>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }

    let class_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if class_exists.is_none() {
        return err(&req.id, "not_found", "class not found", None);
    }

    // Append to the end of the roster unless the caller placed it.
    let sort_order = match optional_i64(req, "sortOrder") {
        Some(v) => v,
        None => {
            match conn.query_row(
                "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM students WHERE class_id = ?",
                [&class_id],
                |r| r.get::<_, i64>(0),
            ) {
                Ok(v) => v,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            }
        }
    };

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, class_id, name, nis, active, sort_order)
         VALUES(?, ?, ?, ?, 1, ?)",
        (
            &student_id,
            &class_id,
            &name,
            optional_str(req, "nis"),
            sort_order,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    db::audit_append(
        conn,
        state.clock.now(),
        &actor_of(req),
        "students.create",
        json!({ "studentId": student_id, "classId": class_id }),
    );
    state.bus.emit(EventKind::StudentsUpdated);
    ok(&req.id, json!({ "studentId": student_id }))
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    let fields: [(&str, Option<String>); 3] = [
        ("name", optional_str(req, "name")),
        ("nis", optional_str(req, "nis")),
        ("class_id", optional_str(req, "classId")),
    ];
    for (column, value) in fields {
        let Some(value) = value else { continue };
        let sql = format!("UPDATE students SET {column} = ? WHERE id = ?");
        if let Err(e) = conn.execute(&sql, (&value, &student_id)) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(active) = optional_bool(req, "active") {
        if let Err(e) = conn.execute(
            "UPDATE students SET active = ? WHERE id = ?",
            (active as i64, &student_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(sort_order) = optional_i64(req, "sortOrder") {
        if let Err(e) = conn.execute(
            "UPDATE students SET sort_order = ? WHERE id = ?",
            (sort_order, &student_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }

    db::audit_append(
        conn,
        state.clock.now(),
        &actor_of(req),
        "students.update",
        json!({ "studentId": student_id }),
    );
    state.bus.emit(EventKind::StudentsUpdated);
    ok(&req.id, json!({ "ok": true }))
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let referenced: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM student_attendance WHERE student_id = ?",
        [&student_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if referenced > 0 {
        return err(
            &req.id,
            "bad_params",
            "student appears in teaching journals; set active=false instead",
            Some(json!({ "referenceCount": referenced })),
        );
    }

    match conn.execute("DELETE FROM students WHERE id = ?", [&student_id]) {
        Ok(0) => err(&req.id, "not_found", "student not found", None),
        Ok(_) => {
            db::audit_append(
                conn,
                state.clock.now(),
                &actor_of(req),
                "students.delete",
                json!({ "studentId": student_id }),
            );
            state.bus.emit(EventKind::StudentsUpdated);
            ok(&req.id, json!({ "ok": true }))
        }
        Err(e) => err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_list(state, req)),
        "students.create" => Some(handle_create(state, req)),
        "students.update" => Some(handle_update(state, req)),
        "students.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
