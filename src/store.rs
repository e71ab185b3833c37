use crate::clock::TimeOfDay;
use crate::config::SchoolConfig;
use crate::geo::GeoPoint;
use crate::validate::{
    derive_check_in_status, validate_location, validate_time, AttendanceStatus, TimeStatus,
};
use chrono::{DateTime, FixedOffset, NaiveDate};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: String,
    pub user_id: String,
    pub date: NaiveDate,
    pub check_in_time: String,
    pub check_out_time: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub distance_meters: f64,
    pub status: AttendanceStatus,
    pub notes: Option<String>,
}

/// Every way a check-in/check-out can be refused. All variants map to a
/// stable wire code; none of them corrupts state — validation happens
/// before any row is touched.
#[derive(Debug)]
pub enum StoreError {
    UserNotFound,
    OutOfRange {
        distance_meters: f64,
        radius_meters: f64,
    },
    OutsideTimeWindow {
        status: TimeStatus,
    },
    DuplicateCheckIn,
    AlreadyComplete,
    NotCheckedIn,
    Db(rusqlite::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Db(e)
    }
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::UserNotFound => "not_found",
            StoreError::OutOfRange { .. } => "out_of_range",
            StoreError::OutsideTimeWindow { .. } => "outside_time_window",
            StoreError::DuplicateCheckIn => "duplicate_check_in",
            StoreError::AlreadyComplete => "already_complete",
            StoreError::NotCheckedIn => "not_checked_in",
            StoreError::Db(_) => "db_query_failed",
        }
    }

    pub fn message(&self) -> String {
        match self {
            StoreError::UserNotFound => "user not found".to_string(),
            StoreError::OutOfRange {
                distance_meters,
                radius_meters,
            } => format!(
                "position is {distance_meters:.0} m from school, outside the {radius_meters:.0} m radius"
            ),
            StoreError::OutsideTimeWindow { status } => {
                format!("check-in window is {}", status.as_str())
            }
            StoreError::DuplicateCheckIn => "already checked in today".to_string(),
            StoreError::AlreadyComplete => "attendance for today is already complete".to_string(),
            StoreError::NotCheckedIn => "no check-in found for today".to_string(),
            StoreError::Db(e) => e.to_string(),
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            StoreError::OutOfRange {
                distance_meters,
                radius_meters,
            } => Some(json!({
                "distanceMeters": distance_meters,
                "radiusMeters": radius_meters
            })),
            StoreError::OutsideTimeWindow { status } => {
                Some(json!({ "status": status.as_str() }))
            }
            _ => None,
        }
    }
}

fn user_exists(conn: &Connection, user_id: &str) -> Result<bool, StoreError> {
    Ok(conn
        .query_row("SELECT 1 FROM users WHERE id = ?", [user_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some())
}

fn row_to_record(r: &rusqlite::Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    let date_raw: String = r.get(2)?;
    let status_raw: String = r.get(8)?;
    Ok(AttendanceRecord {
        id: r.get(0)?,
        user_id: r.get(1)?,
        date: date_raw.parse().map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                format!("bad date: {date_raw}").into(),
            )
        })?,
        check_in_time: r.get(3)?,
        check_out_time: r.get(4)?,
        latitude: r.get(5)?,
        longitude: r.get(6)?,
        distance_meters: r.get(7)?,
        status: AttendanceStatus::parse(&status_raw).unwrap_or(AttendanceStatus::Absent),
        notes: r.get(9)?,
    })
}

const RECORD_COLUMNS: &str = "id, user_id, date, check_in_time, check_out_time,
     latitude, longitude, distance_meters, status, notes";

/// Latest same-day record. With `preventMultipleCheckin` off a day can hold
/// several; the newest one carries the check-out lifecycle.
pub fn record_for(
    conn: &Connection,
    user_id: &str,
    date: NaiveDate,
) -> Result<Option<AttendanceRecord>, StoreError> {
    let sql = format!(
        "SELECT {RECORD_COLUMNS} FROM attendance_records
         WHERE user_id = ? AND date = ?
         ORDER BY check_in_time DESC LIMIT 1"
    );
    Ok(conn
        .query_row(&sql, (user_id, date.to_string()), |r| row_to_record(r))
        .optional()?)
}

pub fn check_in(
    conn: &Connection,
    cfg: &SchoolConfig,
    user_id: &str,
    point: GeoPoint,
    now: DateTime<FixedOffset>,
    notes: Option<String>,
) -> Result<AttendanceRecord, StoreError> {
    if !user_exists(conn, user_id)? {
        return Err(StoreError::UserNotFound);
    }

    let today = now.date_naive();
    if cfg.prevent_multiple_checkin {
        if let Some(existing) = record_for(conn, user_id, today)? {
            return Err(if existing.check_out_time.is_some() {
                StoreError::AlreadyComplete
            } else {
                StoreError::DuplicateCheckIn
            });
        }
    }

    let location = validate_location(point, &cfg.zone);
    if !location.valid {
        return Err(StoreError::OutOfRange {
            distance_meters: location.distance_meters,
            radius_meters: cfg.zone.radius_meters,
        });
    }

    let tod = TimeOfDay::from_instant(now);
    let time = validate_time(tod, &cfg.window);
    if !time.valid {
        return Err(StoreError::OutsideTimeWindow {
            status: time.status,
        });
    }

    let record = AttendanceRecord {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        date: today,
        check_in_time: now.to_rfc3339(),
        check_out_time: None,
        latitude: point.latitude,
        longitude: point.longitude,
        distance_meters: location.distance_meters,
        status: derive_check_in_status(tod, &cfg.window),
        notes,
    };

    conn.execute(
        "INSERT INTO attendance_records(
            id, user_id, date, check_in_time, check_out_time,
            latitude, longitude, distance_meters, status, notes)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &record.id,
            &record.user_id,
            record.date.to_string(),
            &record.check_in_time,
            &record.check_out_time,
            record.latitude,
            record.longitude,
            record.distance_meters,
            record.status.as_str(),
            &record.notes,
        ),
    )?;

    Ok(record)
}

/// Idempotent: a repeated check-out returns the stored record unchanged.
pub fn check_out(
    conn: &Connection,
    user_id: &str,
    now: DateTime<FixedOffset>,
) -> Result<AttendanceRecord, StoreError> {
    if !user_exists(conn, user_id)? {
        return Err(StoreError::UserNotFound);
    }

    let today = now.date_naive();
    let Some(mut record) = record_for(conn, user_id, today)? else {
        return Err(StoreError::NotCheckedIn);
    };

    if record.check_out_time.is_some() {
        return Ok(record);
    }

    let stamp = now.to_rfc3339();
    conn.execute(
        "UPDATE attendance_records SET check_out_time = ? WHERE id = ?",
        (&stamp, &record.id),
    )?;
    record.check_out_time = Some(stamp);
    Ok(record)
}

pub fn list_range(
    conn: &Connection,
    user_id: Option<&str>,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<AttendanceRecord>, StoreError> {
    let mut out = Vec::new();
    match user_id {
        Some(uid) => {
            let sql = format!(
                "SELECT {RECORD_COLUMNS} FROM attendance_records
                 WHERE user_id = ? AND date >= ? AND date <= ?
                 ORDER BY date, check_in_time"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map((uid, from.to_string(), to.to_string()), |r| {
                row_to_record(r)
            })?;
            for row in rows {
                out.push(row?);
            }
        }
        None => {
            let sql = format!(
                "SELECT {RECORD_COLUMNS} FROM attendance_records
                 WHERE date >= ? AND date <= ?
                 ORDER BY date, check_in_time"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows =
                stmt.query_map((from.to_string(), to.to_string()), |r| row_to_record(r))?;
            for row in rows {
                out.push(row?);
            }
        }
    }
    Ok(out)
}
