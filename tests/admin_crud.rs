use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_daemon() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_presensid");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn presensid");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err_code(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value["error"]["code"].as_str().expect("error code").to_string()
}

#[test]
fn users_crud_and_username_guard() {
    let workspace = temp_dir("presensi-admin-users");
    let (_child, mut stdin, mut reader) = spawn_daemon();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    // Fresh workspace seeds the bootstrap admin.
    let listed = request_ok(&mut stdin, &mut reader, "2", "users.list", json!({}));
    let users = listed["users"].as_array().unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0]["username"], json!("admin"));
    assert_eq!(users[0]["role"], json!("admin"));

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "users.create",
        json!({
            "username": "siti",
            "password": "rahasia1",
            "name": "Siti Rahayu",
            "nip": "19870412",
            "department": "Matematika"
        }),
    );
    let siti = created["userId"].as_str().unwrap().to_string();

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "4",
        "users.create",
        json!({ "username": "siti", "password": "x", "name": "Imposter" }),
    );
    assert_eq!(code, "username_taken");

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "5",
        "users.create",
        json!({ "username": "x", "password": "x", "name": "X", "role": "principal" }),
    );
    assert_eq!(code, "bad_params");

    request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "users.update",
        json!({ "userId": siti, "department": "IPA", "active": false }),
    );
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "users.list",
        json!({ "includeInactive": true }),
    );
    let row = listed["users"]
        .as_array()
        .unwrap()
        .iter()
        .find(|u| u["id"] == json!(siti))
        .unwrap()
        .clone();
    assert_eq!(row["department"], json!("IPA"));
    assert_eq!(row["active"], json!(false));

    // Inactive users drop out of the default listing.
    let listed = request_ok(&mut stdin, &mut reader, "8", "users.list", json!({}));
    assert!(listed["users"]
        .as_array()
        .unwrap()
        .iter()
        .all(|u| u["id"] != json!(siti)));

    request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "users.delete",
        json!({ "userId": siti }),
    );
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "10",
        "users.delete",
        json!({ "userId": siti }),
    );
    assert_eq!(code, "not_found");
}

#[test]
fn user_with_history_cannot_be_deleted() {
    let workspace = temp_dir("presensi-admin-user-history");
    let (_child, mut stdin, mut reader) = spawn_daemon();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "users.create",
        json!({ "username": "budi", "password": "x", "name": "Budi Santoso" }),
    );
    let budi = created["userId"].as_str().unwrap().to_string();

    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "attendance.checkIn",
        json!({
            "userId": budi,
            "latitude": -6.2090,
            "longitude": 106.8459,
            "at": "2025-08-04T07:00:00+07:00"
        }),
    );

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "4",
        "users.delete",
        json!({ "userId": budi }),
    );
    assert_eq!(code, "bad_params");
}

#[test]
fn class_delete_cascades_in_order() {
    let workspace = temp_dir("presensi-admin-class-cascade");
    let (_child, mut stdin, mut reader) = spawn_daemon();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let teacher = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "users.create",
        json!({ "username": "siti", "password": "x", "name": "Siti Rahayu" }),
    );
    let teacher = teacher["userId"].as_str().unwrap().to_string();
    let class = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "classes.create",
        json!({ "name": "7A", "level": "7" }),
    );
    let class_id = class["classId"].as_str().unwrap().to_string();
    let subject = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "subjects.create",
        json!({ "name": "Matematika" }),
    );
    let subject_id = subject["subjectId"].as_str().unwrap().to_string();
    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.create",
        json!({ "classId": class_id, "name": "Andi" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "schedules.create",
        json!({
            "userId": teacher,
            "classId": class_id,
            "subjectId": subject_id,
            "weekday": 1,
            "startTime": "07:30",
            "endTime": "09:00"
        }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "journal.create",
        json!({
            "userId": teacher,
            "classId": class_id,
            "subjectId": subject_id,
            "date": "2025-08-04",
            "topic": "Bilangan bulat"
        }),
    );

    let classes = request_ok(&mut stdin, &mut reader, "8", "classes.list", json!({}));
    let row = &classes["classes"].as_array().unwrap()[0];
    assert_eq!(row["studentCount"], json!(1));
    assert_eq!(row["scheduleCount"], json!(1));

    request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "classes.delete",
        json!({ "classId": class_id }),
    );

    let classes = request_ok(&mut stdin, &mut reader, "10", "classes.list", json!({}));
    assert!(classes["classes"].as_array().unwrap().is_empty());
    let students = request_ok(&mut stdin, &mut reader, "11", "students.list", json!({}));
    assert!(students["students"].as_array().unwrap().is_empty());
    let logs = request_ok(&mut stdin, &mut reader, "12", "journal.list", json!({}));
    assert!(logs["logs"].as_array().unwrap().is_empty());
    let schedules = request_ok(&mut stdin, &mut reader, "13", "schedules.list", json!({}));
    assert!(schedules["schedules"].as_array().unwrap().is_empty());

    // The subject survives; it was only referenced, not owned.
    let subjects = request_ok(&mut stdin, &mut reader, "14", "subjects.list", json!({}));
    assert_eq!(subjects["subjects"].as_array().unwrap().len(), 1);
}

#[test]
fn schedule_validation_rules() {
    let workspace = temp_dir("presensi-admin-schedules");
    let (_child, mut stdin, mut reader) = spawn_daemon();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let teacher = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "users.create",
        json!({ "username": "siti", "password": "x", "name": "Siti Rahayu" }),
    );
    let teacher = teacher["userId"].as_str().unwrap().to_string();
    let class = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "classes.create",
        json!({ "name": "7A" }),
    );
    let class_id = class["classId"].as_str().unwrap().to_string();
    let subject = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "subjects.create",
        json!({ "name": "Matematika" }),
    );
    let subject_id = subject["subjectId"].as_str().unwrap().to_string();

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "5",
        "schedules.create",
        json!({
            "userId": teacher,
            "classId": class_id,
            "subjectId": subject_id,
            "weekday": 9,
            "startTime": "07:30",
            "endTime": "09:00"
        }),
    );
    assert_eq!(code, "bad_params");

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "6",
        "schedules.create",
        json!({
            "userId": teacher,
            "classId": class_id,
            "subjectId": subject_id,
            "weekday": 1,
            "startTime": "09:00",
            "endTime": "07:30"
        }),
    );
    assert_eq!(code, "bad_params");

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "7",
        "schedules.create",
        json!({
            "userId": "ghost",
            "classId": class_id,
            "subjectId": subject_id,
            "weekday": 1,
            "startTime": "07:30",
            "endTime": "09:00"
        }),
    );
    assert_eq!(code, "not_found");
}

#[test]
fn settings_update_enforces_invariants() {
    let workspace = temp_dir("presensi-admin-settings");
    let (_child, mut stdin, mut reader) = spawn_daemon();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let current = request_ok(&mut stdin, &mut reader, "2", "settings.get", json!({}));
    assert_eq!(current["settings"]["preventMultipleCheckin"], json!(true));
    assert_eq!(current["settings"]["window"]["start"], json!("06:30"));

    // Window out of order is refused and nothing changes.
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "3",
        "settings.update",
        json!({
            "settings": {
                "window": { "start": "08:00", "lateThreshold": "07:15", "end": "07:30" }
            }
        }),
    );
    assert_eq!(code, "invalid_window");
    let current = request_ok(&mut stdin, &mut reader, "4", "settings.get", json!({}));
    assert_eq!(current["settings"]["window"]["start"], json!("06:30"));

    // Zero radius is refused too.
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "5",
        "settings.update",
        json!({
            "settings": {
                "zone": {
                    "center": { "latitude": -6.2088, "longitude": 106.8456 },
                    "radiusMeters": 0.0
                }
            }
        }),
    );
    assert_eq!(code, "bad_params");

    // A valid partial update sticks.
    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "settings.update",
        json!({
            "settings": {
                "schoolName": "SMP Negeri 1",
                "zone": {
                    "center": { "latitude": -6.2088, "longitude": 106.8456 },
                    "radiusMeters": 250.0
                }
            }
        }),
    );
    assert_eq!(updated["settings"]["zone"]["radiusMeters"], json!(250.0));
    let current = request_ok(&mut stdin, &mut reader, "7", "settings.get", json!({}));
    assert_eq!(current["settings"]["schoolName"], json!("SMP Negeri 1"));
    assert_eq!(current["settings"]["zone"]["radiusMeters"], json!(250.0));
    assert_eq!(current["settings"]["window"]["lateThreshold"], json!("07:15"));
}

#[test]
fn audit_trail_records_mutations() {
    let workspace = temp_dir("presensi-admin-audit");
    let (_child, mut stdin, mut reader) = spawn_daemon();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "users.create",
        json!({
            "username": "siti",
            "password": "x",
            "name": "Siti Rahayu",
            "actorId": "admin"
        }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "classes.create",
        json!({ "name": "7A", "actorId": "admin" }),
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "audit.list",
        json!({ "limit": 10 }),
    );
    let entries = listed["entries"].as_array().unwrap();
    assert!(entries.len() >= 2);
    let actions: Vec<&str> = entries
        .iter()
        .map(|e| e["action"].as_str().unwrap())
        .collect();
    assert!(actions.contains(&"users.create"));
    assert!(actions.contains(&"classes.create"));
    assert!(entries
        .iter()
        .all(|e| e["actor"].as_str().unwrap() == "admin"));
}

#[test]
fn unknown_method_is_not_implemented() {
    let workspace = temp_dir("presensi-admin-unknown");
    let (_child, mut stdin, mut reader) = spawn_daemon();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "2",
        "timetable.rebuild",
        json!({}),
    );
    assert_eq!(code, "not_implemented");

    // And no workspace selected at all is its own stable error.
    let (_child2, mut stdin2, mut reader2) = spawn_daemon();
    let code = request_err_code(
        &mut stdin2,
        &mut reader2,
        "1",
        "users.list",
        json!({}),
    );
    assert_eq!(code, "no_workspace");
}
