use crate::clock::TimeOfDay;
use crate::config::SchoolConfig;
use crate::db;
use crate::events::EventKind;
use crate::geo::GeoPoint;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    actor_of, db_conn, effective_now, optional_date, optional_str, required_date, required_f64,
    required_str,
};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, StoreError};
use crate::validate::{validate_location, validate_time};
use serde_json::json;

fn required_point(req: &Request) -> Result<GeoPoint, serde_json::Value> {
    let latitude = required_f64(req, "latitude")?;
    let longitude = required_f64(req, "longitude")?;
    let point = GeoPoint::new(latitude, longitude);
    if !point.in_range() {
        return Err(err(
            &req.id,
            "bad_params",
            "latitude/longitude outside valid range",
            Some(json!({ "latitude": latitude, "longitude": longitude })),
        ));
    }
    Ok(point)
}

fn load_config(
    conn: &rusqlite::Connection,
    req: &Request,
) -> Result<SchoolConfig, serde_json::Value> {
    SchoolConfig::load(conn).map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))
}

fn store_err(req: &Request, e: StoreError) -> serde_json::Value {
    err(&req.id, e.code(), e.message(), e.details())
}

fn record_json(req: &Request, record: &store::AttendanceRecord) -> serde_json::Value {
    match serde_json::to_value(record) {
        Ok(v) => ok(&req.id, json!({ "record": v })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

/// Dry-run for the check-in screen: where am I, how far, is the window
/// open. Never writes anything.
fn handle_preview(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let point = match required_point(req) {
        Ok(p) => p,
        Err(e) => return e,
    };
    let now = match effective_now(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let cfg = match load_config(conn, req) {
        Ok(c) => c,
        Err(e) => return e,
    };

    let location = validate_location(point, &cfg.zone);
    let time = validate_time(TimeOfDay::from_instant(now), &cfg.window);
    ok(
        &req.id,
        json!({
            "location": location,
            "window": time,
            "serverTime": now.to_rfc3339(),
            "radiusMeters": cfg.zone.radius_meters,
        }),
    )
}

fn handle_check_in(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let point = match required_point(req) {
        Ok(p) => p,
        Err(e) => return e,
    };
    let now = match effective_now(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let cfg = match load_config(conn, req) {
        Ok(c) => c,
        Err(e) => return e,
    };

    match store::check_in(conn, &cfg, &user_id, point, now, optional_str(req, "notes")) {
        Ok(record) => {
            tracing::info!(user = %user_id, status = record.status.as_str(), "check-in");
            db::audit_append(
                conn,
                now,
                &user_id,
                "attendance.checkIn",
                json!({ "recordId": record.id, "status": record.status.as_str() }),
            );
            state.bus.emit(EventKind::AttendanceUpdated);
            record_json(req, &record)
        }
        Err(e) => store_err(req, e),
    }
}

fn handle_check_out(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let now = match effective_now(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    match store::check_out(conn, &user_id, now) {
        Ok(record) => {
            db::audit_append(
                conn,
                now,
                &user_id,
                "attendance.checkOut",
                json!({ "recordId": record.id }),
            );
            state.bus.emit(EventKind::AttendanceUpdated);
            record_json(req, &record)
        }
        Err(e) => store_err(req, e),
    }
}

fn handle_today(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let date = match optional_date(req, "date") {
        Ok(v) => v.unwrap_or_else(|| state.clock.now().date_naive()),
        Err(e) => return e,
    };

    match store::record_for(conn, &user_id, date) {
        Ok(Some(record)) => record_json(req, &record),
        Ok(None) => ok(&req.id, json!({ "record": null })),
        Err(e) => store_err(req, e),
    }
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let user_id = optional_str(req, "userId");

    match store::list_range(conn, user_id.as_deref(), from, to) {
        Ok(records) => match serde_json::to_value(&records) {
            Ok(v) => ok(&req.id, json!({ "records": v })),
            Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
        },
        Err(e) => store_err(req, e),
    }
}

/// Admin bulk-edit escape hatch; the only way a record ever disappears.
fn handle_admin_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let record_id = match required_str(req, "recordId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match conn.execute("DELETE FROM attendance_records WHERE id = ?", [&record_id]) {
        Ok(0) => err(&req.id, "not_found", "attendance record not found", None),
        Ok(_) => {
            db::audit_append(
                conn,
                state.clock.now(),
                &actor_of(req),
                "attendance.adminDelete",
                json!({ "recordId": record_id }),
            );
            state.bus.emit(EventKind::AttendanceUpdated);
            ok(&req.id, json!({ "ok": true }))
        }
        Err(e) => err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "attendance_records" })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.preview" => Some(handle_preview(state, req)),
        "attendance.checkIn" => Some(handle_check_in(state, req)),
        "attendance.checkOut" => Some(handle_check_out(state, req)),
        "attendance.today" => Some(handle_today(state, req)),
        "attendance.list" => Some(handle_list(state, req)),
        "attendance.adminDelete" => Some(handle_admin_delete(state, req)),
        _ => None,
    }
}
