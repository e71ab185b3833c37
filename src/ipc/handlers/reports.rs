use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, required_date};
use crate::ipc::types::{AppState, Request};
use crate::stats::{self, RecordRef, TeacherRef};
use crate::validate::AttendanceStatus;
use chrono::{Datelike, NaiveDate};
use rusqlite::Connection;
use serde_json::json;

fn load_teachers(conn: &Connection) -> rusqlite::Result<Vec<TeacherRef>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, department FROM users
         WHERE role = 'teacher' AND active = 1
         ORDER BY name",
    )?;
    let rows = stmt.query_map([], |r| {
        Ok(TeacherRef {
            user_id: r.get(0)?,
            name: r.get(1)?,
            department: r.get(2)?,
        })
    })?;
    rows.collect()
}

fn load_records(
    conn: &Connection,
    from: NaiveDate,
    to: NaiveDate,
) -> rusqlite::Result<Vec<RecordRef>> {
    let mut stmt = conn.prepare(
        "SELECT user_id, date, status FROM attendance_records
         WHERE date >= ? AND date <= ?",
    )?;
    let rows = stmt.query_map((from.to_string(), to.to_string()), |r| {
        let date_raw: String = r.get(1)?;
        let status_raw: String = r.get(2)?;
        Ok(RecordRef {
            user_id: r.get(0)?,
            date: date_raw.parse().map_err(|_| {
                rusqlite::Error::FromSqlConversionFailure(
                    1,
                    rusqlite::types::Type::Text,
                    format!("bad date: {date_raw}").into(),
                )
            })?,
            status: AttendanceStatus::parse(&status_raw).unwrap_or(AttendanceStatus::Absent),
        })
    })?;
    rows.collect()
}

fn handle_daily(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let date = match required_date(req, "date") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let key = format!("reports.daily:{date}");
    let computed = state.reports.get_or_compute(key, || {
        let teachers = load_teachers(conn)
            .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
        let records = load_records(conn, date, date)
            .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;

        let total = teachers.len() as i64;
        let present = records
            .iter()
            .filter(|r| r.status == AttendanceStatus::Present)
            .count() as i64;
        let late = records
            .iter()
            .filter(|r| r.status == AttendanceStatus::Late)
            .count() as i64;
        Ok(json!({
            "date": date.to_string(),
            "totalTeachers": total,
            "present": present,
            "late": late,
            "notCheckedIn": (total - present - late).max(0),
            "attendanceRate": stats::daily_attendance_rate(&records, total),
            "punctualityRate": stats::punctuality_rate(&records, total),
        }))
    });
    match computed {
        Ok(result) => ok(&req.id, result),
        Err(e) => e,
    }
}

fn handle_range(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let from = match required_date(req, "from") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let to = match required_date(req, "to") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if from > to {
        return err(&req.id, "bad_params", "from must not be after to", None);
    }

    let key = format!("reports.range:{from}:{to}");
    let computed = state.reports.get_or_compute(key, || {
        let teachers = load_teachers(conn)
            .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
        let records = load_records(conn, from, to)
            .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
        let working_days = stats::working_days_in_range(from, to);
        let per_teacher = stats::teacher_range_stats(&teachers, &records, working_days);
        serde_json::to_value(&per_teacher)
            .map(|teachers_v| {
                json!({
                    "from": from.to_string(),
                    "to": to.to_string(),
                    "workingDays": working_days,
                    "teachers": teachers_v,
                })
            })
            .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))
    });
    match computed {
        Ok(result) => ok(&req.id, result),
        Err(e) => e,
    }
}

fn handle_departments(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let from = match required_date(req, "from") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let to = match required_date(req, "to") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let key = format!("reports.departments:{from}:{to}");
    let computed = state.reports.get_or_compute(key, || {
        let teachers = load_teachers(conn)
            .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
        let records = load_records(conn, from, to)
            .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
        let working_days = stats::working_days_in_range(from, to);
        let rollup = stats::department_rollup(&teachers, &records, working_days);
        serde_json::to_value(&rollup)
            .map(|departments| {
                json!({
                    "from": from.to_string(),
                    "to": to.to_string(),
                    "workingDays": working_days,
                    "departments": departments,
                })
            })
            .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))
    });
    match computed {
        Ok(result) => ok(&req.id, result),
        Err(e) => e,
    }
}

/// Mon=1 .. Sun=7, matching the schedules table.
fn weekday_occurrences(from: NaiveDate, to: NaiveDate, weekday: i64) -> i64 {
    let mut count = 0;
    let mut day = from;
    while day <= to {
        if day.weekday().number_from_monday() as i64 == weekday {
            count += 1;
        }
        day = match day.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }
    count
}

fn handle_performance(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let from = match required_date(req, "from") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let to = match required_date(req, "to") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let key = format!("reports.performance:{from}:{to}");
    let computed = state.reports.get_or_compute(key, || {
        let teachers = load_teachers(conn)
            .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
        let records = load_records(conn, from, to)
            .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
        let working_days = stats::working_days_in_range(from, to);
        let attendance = stats::teacher_range_stats(&teachers, &records, working_days);

        let mut out = Vec::with_capacity(teachers.len());
        for stat in attendance {
            // Expected sessions: each schedule slot times the number of
            // times its weekday occurs in the range.
            let expected: i64 = {
                let mut stmt = conn
                    .prepare("SELECT weekday FROM schedules WHERE user_id = ?")
                    .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
                let weekdays = stmt
                    .query_map([&stat.user_id], |r| r.get::<_, i64>(0))
                    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
                    .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
                weekdays
                    .into_iter()
                    .map(|w| weekday_occurrences(from, to, w))
                    .sum()
            };
            let logged: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM teaching_logs
                     WHERE user_id = ? AND date >= ? AND date <= ?",
                    (&stat.user_id, from.to_string(), to.to_string()),
                    |r| r.get(0),
                )
                .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;

            let quality = stats::teaching_quality_rate(logged, expected);
            let grade = stats::performance_grade(stat.attendance_rate, quality);
            out.push(json!({
                "userId": stat.user_id,
                "name": stat.name,
                "department": stat.department,
                "attendanceRate": stat.attendance_rate,
                "punctualityRate": stat.punctuality_rate,
                "expectedSessions": expected,
                "loggedSessions": logged,
                "teachingQualityRate": quality,
                "grade": grade.as_str(),
            }));
        }
        Ok(json!({
            "from": from.to_string(),
            "to": to.to_string(),
            "workingDays": working_days,
            "teachers": out,
        }))
    });
    match computed {
        Ok(result) => ok(&req.id, result),
        Err(e) => e,
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.daily" => Some(handle_daily(state, req)),
        "reports.range" => Some(handle_range(state, req)),
        "reports.departments" => Some(handle_departments(state, req)),
        "reports.performance" => Some(handle_performance(state, req)),
        _ => None,
    }
}
