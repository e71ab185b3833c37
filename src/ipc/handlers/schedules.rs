use crate::clock::TimeOfDay;
use crate::db;
use crate::events::EventKind;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{actor_of, db_conn, optional_i64, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn parse_period(
    req: &Request,
    start_raw: &str,
    end_raw: &str,
) -> Result<(TimeOfDay, TimeOfDay), serde_json::Value> {
    let start = TimeOfDay::parse(start_raw)
        .ok_or_else(|| err(&req.id, "bad_params", "startTime must be HH:MM", None))?;
    let end = TimeOfDay::parse(end_raw)
        .ok_or_else(|| err(&req.id, "bad_params", "endTime must be HH:MM", None))?;
    if start >= end {
        return Err(err(
            &req.id,
            "bad_params",
            "startTime must be before endTime",
            None,
        ));
    }
    Ok((start, end))
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let mut sql = String::from(
        "SELECT sc.id, sc.user_id, u.name, sc.class_id, c.name, sc.subject_id, s.name,
                sc.weekday, sc.start_time, sc.end_time
         FROM schedules sc
         JOIN users u ON u.id = sc.user_id
         JOIN classes c ON c.id = sc.class_id
         JOIN subjects s ON s.id = sc.subject_id
         WHERE 1=1",
    );
    let mut params: Vec<String> = Vec::new();
    if let Some(uid) = optional_str(req, "userId") {
        sql.push_str(" AND sc.user_id = ?");
        params.push(uid);
    }
    if let Some(weekday) = optional_i64(req, "weekday") {
        sql.push_str(" AND sc.weekday = ?");
        params.push(weekday.to_string());
    }
    sql.push_str(" ORDER BY sc.weekday, sc.start_time");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params.iter()), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "userId": r.get::<_, String>(1)?,
                "teacherName": r.get::<_, String>(2)?,
                "classId": r.get::<_, String>(3)?,
                "className": r.get::<_, String>(4)?,
                "subjectId": r.get::<_, String>(5)?,
                "subjectName": r.get::<_, String>(6)?,
                "weekday": r.get::<_, i64>(7)?,
                "startTime": r.get::<_, String>(8)?,
                "endTime": r.get::<_, String>(9)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(schedules) => ok(&req.id, json!({ "schedules": schedules })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(weekday) = optional_i64(req, "weekday") else {
        return err(&req.id, "bad_params", "missing weekday", None);
    };
    if !(1..=7).contains(&weekday) {
        return err(&req.id, "bad_params", "weekday must be 1 (Mon) .. 7 (Sun)", None);
    }
    let start_raw = match required_str(req, "startTime") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let end_raw = match required_str(req, "endTime") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (start, end) = match parse_period(req, &start_raw, &end_raw) {
        Ok(v) => v,
        Err(e) => return e,
    };

    for (table, id) in [
        ("users", &user_id),
        ("classes", &class_id),
        ("subjects", &subject_id),
    ] {
        let sql = format!("SELECT 1 FROM {table} WHERE id = ?");
        let found: Option<i64> = match conn.query_row(&sql, [id], |r| r.get(0)).optional() {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if found.is_none() {
            return err(
                &req.id,
                "not_found",
                format!("{} row not found", table),
                Some(json!({ "id": id })),
            );
        }
    }

    let schedule_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO schedules(id, user_id, class_id, subject_id, weekday, start_time, end_time)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &schedule_id,
            &user_id,
            &class_id,
            &subject_id,
            weekday,
            start.to_string(),
            end.to_string(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "schedules" })),
        );
    }

    db::audit_append(
        conn,
        state.clock.now(),
        &actor_of(req),
        "schedules.create",
        json!({ "scheduleId": schedule_id, "userId": user_id }),
    );
    state.bus.emit(EventKind::SchedulesUpdated);
    ok(&req.id, json!({ "scheduleId": schedule_id }))
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let schedule_id = match required_str(req, "scheduleId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let current: Option<(String, String)> = match conn
        .query_row(
            "SELECT start_time, end_time FROM schedules WHERE id = ?",
            [&schedule_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((current_start, current_end)) = current else {
        return err(&req.id, "not_found", "schedule not found", None);
    };

    // Validate the resulting period, mixing old and new halves.
    let start_raw = optional_str(req, "startTime").unwrap_or(current_start);
    let end_raw = optional_str(req, "endTime").unwrap_or(current_end);
    let (start, end) = match parse_period(req, &start_raw, &end_raw) {
        Ok(v) => v,
        Err(e) => return e,
    };

    if let Some(weekday) = optional_i64(req, "weekday") {
        if !(1..=7).contains(&weekday) {
            return err(&req.id, "bad_params", "weekday must be 1 (Mon) .. 7 (Sun)", None);
        }
        if let Err(e) = conn.execute(
            "UPDATE schedules SET weekday = ? WHERE id = ?",
            (weekday, &schedule_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    let fields: [(&str, Option<String>); 3] = [
        ("user_id", optional_str(req, "userId")),
        ("class_id", optional_str(req, "classId")),
        ("subject_id", optional_str(req, "subjectId")),
    ];
    for (column, value) in fields {
        let Some(value) = value else { continue };
        let sql = format!("UPDATE schedules SET {column} = ? WHERE id = ?");
        if let Err(e) = conn.execute(&sql, (&value, &schedule_id)) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Err(e) = conn.execute(
        "UPDATE schedules SET start_time = ?, end_time = ? WHERE id = ?",
        (start.to_string(), end.to_string(), &schedule_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    db::audit_append(
        conn,
        state.clock.now(),
        &actor_of(req),
        "schedules.update",
        json!({ "scheduleId": schedule_id }),
    );
    state.bus.emit(EventKind::SchedulesUpdated);
    ok(&req.id, json!({ "ok": true }))
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let schedule_id = match required_str(req, "scheduleId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match conn.execute("DELETE FROM schedules WHERE id = ?", [&schedule_id]) {
        Ok(0) => err(&req.id, "not_found", "schedule not found", None),
        Ok(_) => {
            db::audit_append(
                conn,
                state.clock.now(),
                &actor_of(req),
                "schedules.delete",
                json!({ "scheduleId": schedule_id }),
            );
            state.bus.emit(EventKind::SchedulesUpdated);
            ok(&req.id, json!({ "ok": true }))
        }
        Err(e) => err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "schedules" })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schedules.list" => Some(handle_list(state, req)),
        "schedules.create" => Some(handle_create(state, req)),
        "schedules.update" => Some(handle_update(state, req)),
        "schedules.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
