use crate::clock::TimeOfDay;
use crate::db;
use crate::events::EventKind;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    actor_of, db_conn, optional_date, optional_str, required_date, required_str,
};
use crate::ipc::types::{AppState, Request};
use crate::journal::{self, JournalError, LogFilter, NewTeachingLog, SessionEntry};
use crate::stats::SessionStatus;
use serde_json::json;

fn journal_err(req: &Request, e: JournalError) -> serde_json::Value {
    err(&req.id, e.code(), e.message(), e.details())
}

fn parse_entries(req: &Request) -> Result<Vec<SessionEntry>, serde_json::Value> {
    let Some(raw) = req.params.get("entries") else {
        return Ok(Vec::new());
    };
    let Some(items) = raw.as_array() else {
        return Err(err(&req.id, "bad_params", "entries must be an array", None));
    };

    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let Some(student_id) = item.get("studentId").and_then(|v| v.as_str()) else {
            return Err(err(&req.id, "bad_params", "entry missing studentId", None));
        };
        let Some(status_raw) = item.get("status").and_then(|v| v.as_str()) else {
            return Err(err(&req.id, "bad_params", "entry missing status", None));
        };
        let Some(status) = SessionStatus::parse(status_raw) else {
            return Err(err(
                &req.id,
                "bad_params",
                "status must be present, sick, permission or absent",
                Some(json!({ "studentId": student_id, "status": status_raw })),
            ));
        };
        let arrival_time = match item.get("arrivalTime").and_then(|v| v.as_str()) {
            None => None,
            Some(raw) => Some(TimeOfDay::parse(raw).ok_or_else(|| {
                err(
                    &req.id,
                    "bad_params",
                    "arrivalTime must be HH:MM",
                    Some(json!({ "studentId": student_id })),
                )
            })?),
        };
        out.push(SessionEntry {
            student_id: student_id.to_string(),
            status,
            arrival_time,
            notes: item
                .get("notes")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
        });
    }
    Ok(out)
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
    let date = match required_date(req, "date") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let topic = match required_str(req, "topic") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    if topic.is_empty() {
        return err(&req.id, "bad_params", "topic must not be empty", None);
    }
    let entries = match parse_entries(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let new = NewTeachingLog {
        user_id: user_id.clone(),
        class_id,
        subject_id,
        date,
        topic,
        materials: optional_str(req, "materials"),
        homework: optional_str(req, "homework"),
        notes: optional_str(req, "notes"),
        entries,
    };

    match journal::create(conn, new, state.clock.now()) {
        Ok((log, rows)) => {
            tracing::info!(
                user = %user_id,
                log = %log.id,
                students = log.total_students,
                "journal created"
            );
            db::audit_append(
                conn,
                state.clock.now(),
                &user_id,
                "journal.create",
                json!({ "logId": log.id, "classId": log.class_id, "date": log.date.to_string() }),
            );
            state.bus.emit(EventKind::TeachingLogsUpdated);
            match (serde_json::to_value(&log), serde_json::to_value(&rows)) {
                (Ok(log_v), Ok(rows_v)) => ok(
                    &req.id,
                    json!({ "log": log_v, "studentAttendance": rows_v }),
                ),
                _ => err(&req.id, "db_query_failed", "serialization failed", None),
            }
        }
        Err(e) => journal_err(req, e),
    }
}

fn handle_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let log_id = match required_str(req, "logId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match journal::open(conn, &log_id) {
        Ok((log, rows)) => match (serde_json::to_value(&log), serde_json::to_value(&rows)) {
            (Ok(log_v), Ok(rows_v)) => ok(
                &req.id,
                json!({ "log": log_v, "studentAttendance": rows_v }),
            ),
            _ => err(&req.id, "db_query_failed", "serialization failed", None),
        },
        Err(e) => journal_err(req, e),
    }
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let user_id = optional_str(req, "userId");
    let class_id = optional_str(req, "classId");
    let from = match optional_date(req, "from") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let to = match optional_date(req, "to") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let filter = LogFilter {
        user_id: user_id.as_deref(),
        class_id: class_id.as_deref(),
        from,
        to,
    };
    match journal::list(conn, &filter) {
        Ok(logs) => match serde_json::to_value(&logs) {
            Ok(v) => ok(&req.id, json!({ "logs": v })),
            Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
        },
        Err(e) => journal_err(req, e),
    }
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let log_id = match required_str(req, "logId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match journal::delete(conn, &log_id) {
        Ok(()) => {
            db::audit_append(
                conn,
                state.clock.now(),
                &actor_of(req),
                "journal.delete",
                json!({ "logId": log_id }),
            );
            state.bus.emit(EventKind::TeachingLogsUpdated);
            ok(&req.id, json!({ "ok": true }))
        }
        Err(e) => journal_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "journal.create" => Some(handle_create(state, req)),
        "journal.open" => Some(handle_open(state, req)),
        "journal.list" => Some(handle_list(state, req)),
        "journal.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
