use crate::clock::TimeOfDay;
use crate::stats::{self, SessionStatus, SessionSummary};
use chrono::{DateTime, FixedOffset, NaiveDate};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub student_id: String,
    pub status: SessionStatus,
    pub arrival_time: Option<TimeOfDay>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewTeachingLog {
    pub user_id: String,
    pub class_id: String,
    pub subject_id: String,
    pub date: NaiveDate,
    pub topic: String,
    pub materials: Option<String>,
    pub homework: Option<String>,
    pub notes: Option<String>,
    pub entries: Vec<SessionEntry>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeachingLog {
    pub id: String,
    pub user_id: String,
    pub class_id: String,
    pub subject_id: String,
    pub date: NaiveDate,
    pub topic: String,
    pub materials: Option<String>,
    pub homework: Option<String>,
    pub notes: Option<String>,
    pub total_students: i64,
    pub attendance_summary: SessionSummary,
    pub class_attendance_rate: f64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAttendanceRow {
    pub id: String,
    pub teaching_log_id: String,
    pub student_id: String,
    pub student_name: String,
    pub status: SessionStatus,
    pub arrival_time: Option<String>,
    pub notes: Option<String>,
    pub recorded_at: String,
}

#[derive(Debug)]
pub enum JournalError {
    UserNotFound,
    ClassNotFound,
    SubjectNotFound,
    LogNotFound,
    UnknownStudent { student_id: String },
    DuplicateEntry { student_id: String },
    Db(rusqlite::Error),
}

impl From<rusqlite::Error> for JournalError {
    fn from(e: rusqlite::Error) -> Self {
        JournalError::Db(e)
    }
}

impl JournalError {
    pub fn code(&self) -> &'static str {
        match self {
            JournalError::UserNotFound
            | JournalError::ClassNotFound
            | JournalError::SubjectNotFound
            | JournalError::LogNotFound => "not_found",
            JournalError::UnknownStudent { .. } => "unknown_student",
            JournalError::DuplicateEntry { .. } => "bad_params",
            JournalError::Db(_) => "db_query_failed",
        }
    }

    pub fn message(&self) -> String {
        match self {
            JournalError::UserNotFound => "user not found".to_string(),
            JournalError::ClassNotFound => "class not found".to_string(),
            JournalError::SubjectNotFound => "subject not found".to_string(),
            JournalError::LogNotFound => "teaching log not found".to_string(),
            JournalError::UnknownStudent { student_id } => {
                format!("student {student_id} is not on the active roster of this class")
            }
            JournalError::DuplicateEntry { student_id } => {
                format!("duplicate attendance entry for student {student_id}")
            }
            JournalError::Db(e) => e.to_string(),
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            JournalError::UnknownStudent { student_id }
            | JournalError::DuplicateEntry { student_id } => {
                Some(json!({ "studentId": student_id }))
            }
            _ => None,
        }
    }
}

fn exists(conn: &Connection, table: &str, id: &str) -> Result<bool, JournalError> {
    let sql = format!("SELECT 1 FROM {table} WHERE id = ?");
    Ok(conn
        .query_row(&sql, [id], |r| r.get::<_, i64>(0))
        .optional()?
        .is_some())
}

#[derive(Debug, Clone)]
struct RosterStudent {
    id: String,
    name: String,
}

fn active_roster(conn: &Connection, class_id: &str) -> Result<Vec<RosterStudent>, JournalError> {
    let mut stmt = conn.prepare(
        "SELECT id, name FROM students
         WHERE class_id = ? AND active = 1
         ORDER BY sort_order, name",
    )?;
    let rows = stmt.query_map([class_id], |r| {
        Ok(RosterStudent {
            id: r.get(0)?,
            name: r.get(1)?,
        })
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Creates the log plus one attendance row per active roster student.
///
/// Reconciliation rule: students missing from `entries` are recorded as
/// present (the "mark all present" default); entries for students outside
/// the active roster are rejected. `totalStudents` is therefore always the
/// roster size and the summary counts always add up to it.
pub fn create(
    conn: &Connection,
    new: NewTeachingLog,
    now: DateTime<FixedOffset>,
) -> Result<(TeachingLog, Vec<StudentAttendanceRow>), JournalError> {
    if !exists(conn, "users", &new.user_id)? {
        return Err(JournalError::UserNotFound);
    }
    if !exists(conn, "classes", &new.class_id)? {
        return Err(JournalError::ClassNotFound);
    }
    if !exists(conn, "subjects", &new.subject_id)? {
        return Err(JournalError::SubjectNotFound);
    }

    let roster = active_roster(conn, &new.class_id)?;

    let mut by_student: std::collections::HashMap<&str, &SessionEntry> =
        std::collections::HashMap::new();
    for entry in &new.entries {
        if !roster.iter().any(|s| s.id == entry.student_id) {
            return Err(JournalError::UnknownStudent {
                student_id: entry.student_id.clone(),
            });
        }
        if by_student.insert(entry.student_id.as_str(), entry).is_some() {
            return Err(JournalError::DuplicateEntry {
                student_id: entry.student_id.clone(),
            });
        }
    }

    let recorded_at = now.to_rfc3339();
    let log_id = Uuid::new_v4().to_string();
    let mut rows = Vec::with_capacity(roster.len());
    for student in &roster {
        let entry = by_student.get(student.id.as_str());
        rows.push(StudentAttendanceRow {
            id: Uuid::new_v4().to_string(),
            teaching_log_id: log_id.clone(),
            student_id: student.id.clone(),
            student_name: student.name.clone(),
            status: entry.map(|e| e.status).unwrap_or(SessionStatus::Present),
            arrival_time: entry
                .and_then(|e| e.arrival_time)
                .map(|t| t.to_string()),
            notes: entry.and_then(|e| e.notes.clone()),
            recorded_at: recorded_at.clone(),
        });
    }

    let summary = stats::summarize(rows.iter().map(|r| r.status));
    let total_students = roster.len() as i64;
    let log = TeachingLog {
        id: log_id,
        user_id: new.user_id,
        class_id: new.class_id,
        subject_id: new.subject_id,
        date: new.date,
        topic: new.topic,
        materials: new.materials,
        homework: new.homework,
        notes: new.notes,
        total_students,
        attendance_summary: summary,
        class_attendance_rate: stats::class_attendance_rate(&summary, total_students),
        created_at: recorded_at,
    };

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO teaching_logs(
            id, user_id, class_id, subject_id, date, topic, materials, homework, notes,
            total_students, present_count, sick_count, permission_count, absent_count,
            created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &log.id,
            &log.user_id,
            &log.class_id,
            &log.subject_id,
            log.date.to_string(),
            &log.topic,
            &log.materials,
            &log.homework,
            &log.notes,
            log.total_students,
            summary.present,
            summary.sick,
            summary.permission,
            summary.absent,
            &log.created_at,
        ),
    )?;
    for row in &rows {
        tx.execute(
            "INSERT INTO student_attendance(
                id, teaching_log_id, student_id, status, arrival_time, notes, recorded_at)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                &row.id,
                &row.teaching_log_id,
                &row.student_id,
                row.status.as_str(),
                &row.arrival_time,
                &row.notes,
                &row.recorded_at,
            ),
        )?;
    }
    tx.commit()?;

    Ok((log, rows))
}

fn row_to_log(r: &rusqlite::Row<'_>) -> rusqlite::Result<TeachingLog> {
    let date_raw: String = r.get(4)?;
    let summary = SessionSummary {
        present: r.get(10)?,
        sick: r.get(11)?,
        permission: r.get(12)?,
        absent: r.get(13)?,
    };
    let total_students: i64 = r.get(9)?;
    Ok(TeachingLog {
        id: r.get(0)?,
        user_id: r.get(1)?,
        class_id: r.get(2)?,
        subject_id: r.get(3)?,
        date: date_raw.parse().map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                format!("bad date: {date_raw}").into(),
            )
        })?,
        topic: r.get(5)?,
        materials: r.get(6)?,
        homework: r.get(7)?,
        notes: r.get(8)?,
        total_students,
        attendance_summary: summary,
        class_attendance_rate: stats::class_attendance_rate(&summary, total_students),
        created_at: r.get(14)?,
    })
}

const LOG_COLUMNS: &str = "id, user_id, class_id, subject_id, date, topic, materials, homework,
     notes, total_students, present_count, sick_count, permission_count, absent_count, created_at";

pub fn open(
    conn: &Connection,
    log_id: &str,
) -> Result<(TeachingLog, Vec<StudentAttendanceRow>), JournalError> {
    let sql = format!("SELECT {LOG_COLUMNS} FROM teaching_logs WHERE id = ?");
    let Some(log) = conn
        .query_row(&sql, [log_id], |r| row_to_log(r))
        .optional()?
    else {
        return Err(JournalError::LogNotFound);
    };

    let mut stmt = conn.prepare(
        "SELECT sa.id, sa.teaching_log_id, sa.student_id, s.name, sa.status,
                sa.arrival_time, sa.notes, sa.recorded_at
         FROM student_attendance sa
         JOIN students s ON s.id = sa.student_id
         WHERE sa.teaching_log_id = ?
         ORDER BY s.sort_order, s.name",
    )?;
    let rows = stmt.query_map([log_id], |r| {
        let status_raw: String = r.get(4)?;
        Ok(StudentAttendanceRow {
            id: r.get(0)?,
            teaching_log_id: r.get(1)?,
            student_id: r.get(2)?,
            student_name: r.get(3)?,
            status: SessionStatus::parse(&status_raw).unwrap_or(SessionStatus::Absent),
            arrival_time: r.get(5)?,
            notes: r.get(6)?,
            recorded_at: r.get(7)?,
        })
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok((log, out))
}

#[derive(Debug, Clone, Default)]
pub struct LogFilter<'a> {
    pub user_id: Option<&'a str>,
    pub class_id: Option<&'a str>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

pub fn list(conn: &Connection, filter: &LogFilter<'_>) -> Result<Vec<TeachingLog>, JournalError> {
    let mut sql = format!("SELECT {LOG_COLUMNS} FROM teaching_logs WHERE 1=1");
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    if let Some(uid) = filter.user_id {
        sql.push_str(" AND user_id = ?");
        params.push(Box::new(uid.to_string()));
    }
    if let Some(cid) = filter.class_id {
        sql.push_str(" AND class_id = ?");
        params.push(Box::new(cid.to_string()));
    }
    if let Some(from) = filter.from {
        sql.push_str(" AND date >= ?");
        params.push(Box::new(from.to_string()));
    }
    if let Some(to) = filter.to {
        sql.push_str(" AND date <= ?");
        params.push(Box::new(to.to_string()));
    }
    sql.push_str(" ORDER BY date DESC, created_at DESC");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
        |r| row_to_log(r),
    )?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Admin correction path; removes the log and its per-student rows.
pub fn delete(conn: &Connection, log_id: &str) -> Result<(), JournalError> {
    if !exists(conn, "teaching_logs", log_id)? {
        return Err(JournalError::LogNotFound);
    }
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM student_attendance WHERE teaching_log_id = ?",
        [log_id],
    )?;
    tx.execute("DELETE FROM teaching_logs WHERE id = ?", [log_id])?;
    tx.commit()?;
    Ok(())
}
