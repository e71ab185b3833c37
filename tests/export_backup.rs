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

fn seed_one_day(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> String {
    let created = request_ok(
        stdin,
        reader,
        "s1",
        "users.create",
        json!({
            "username": "siti",
            "password": "rahasia1",
            "name": "Siti, Rahayu", // comma on purpose: exercises CSV quoting
            "department": "Matematika"
        }),
    );
    let teacher = created["userId"].as_str().unwrap().to_string();
    request_ok(
        stdin,
        reader,
        "s2",
        "attendance.checkIn",
        json!({
            "userId": teacher,
            "latitude": -6.2090,
            "longitude": 106.8459,
            "at": "2025-08-04T07:10:00+07:00"
        }),
    );
    teacher
}

#[test]
fn csv_export_has_fixed_headers_and_quoting() {
    let workspace = temp_dir("presensi-export-csv");
    let (_child, mut stdin, mut reader) = spawn_daemon();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    seed_one_day(&mut stdin, &mut reader);

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "export.csv",
        json!({ "collection": "attendanceRecords" }),
    );
    assert_eq!(exported["filename"], json!("attendanceRecords.csv"));
    let content = exported["content"].as_str().unwrap();
    let mut lines = content.lines();
    assert_eq!(
        lines.next().unwrap(),
        "ID,User ID,Nama,Tanggal,Jam Masuk,Jam Keluar,Status,Jarak (m),Catatan"
    );
    let row = lines.next().unwrap();
    assert!(row.contains("\"Siti, Rahayu\""), "row was: {row}");
    assert!(row.contains("2025-08-04"));
    assert!(row.contains("present"));

    let resp = request(
        &mut stdin,
        &mut reader,
        "3",
        "export.csv",
        json!({ "collection": "markSets" }),
    );
    assert_eq!(resp["ok"], json!(false));
    assert_eq!(resp["error"]["code"], json!("bad_params"));
}

#[test]
fn json_dump_mirrors_collections() {
    let workspace = temp_dir("presensi-export-dump");
    let (_child, mut stdin, mut reader) = spawn_daemon();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    seed_one_day(&mut stdin, &mut reader);

    let dump = request_ok(&mut stdin, &mut reader, "2", "export.jsonDump", json!({}));
    let collections = &dump["collections"];
    for key in [
        "users",
        "classes",
        "students",
        "subjects",
        "schedules",
        "attendanceRecords",
        "teachingLogs",
        "studentAttendance",
        "auditLogs",
    ] {
        assert!(collections.get(key).is_some(), "missing {key}");
        assert!(collections[key].is_array(), "{key} not an array");
    }
    assert_eq!(collections["attendanceRecords"].as_array().unwrap().len(), 1);
    // Seeded admin plus the teacher; digests stay out of the dump.
    let users = collections["users"].as_array().unwrap();
    assert_eq!(users.len(), 2);
    assert!(users.iter().all(|u| u.get("password_sha256").is_none()));
}

#[test]
fn backup_bundle_roundtrip() {
    let workspace = temp_dir("presensi-backup-src");
    let (_child, mut stdin, mut reader) = spawn_daemon();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let teacher = seed_one_day(&mut stdin, &mut reader);

    let bundle_path = temp_dir("presensi-backup-out").join("backup.zip");
    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "backup.export",
        json!({ "outPath": bundle_path.to_string_lossy() }),
    );
    assert_eq!(exported["bundleFormat"], json!("presensi-workspace-v1"));
    assert_eq!(exported["entryCount"], json!(3));
    assert!(bundle_path.is_file());

    // Importing over the live workspace is refused.
    let resp = request(
        &mut stdin,
        &mut reader,
        "3",
        "backup.import",
        json!({
            "bundlePath": bundle_path.to_string_lossy(),
            "workspacePath": workspace.to_string_lossy()
        }),
    );
    assert_eq!(resp["ok"], json!(false));

    // Into a fresh directory, then select it: same data.
    let restored = temp_dir("presensi-backup-restored");
    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "backup.import",
        json!({
            "bundlePath": bundle_path.to_string_lossy(),
            "workspacePath": restored.to_string_lossy()
        }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "workspace.select",
        json!({ "path": restored.to_string_lossy() }),
    );
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "attendance.list",
        json!({ "userId": teacher, "from": "2025-08-04", "to": "2025-08-04" }),
    );
    assert_eq!(listed["records"].as_array().unwrap().len(), 1);

    // A garbage bundle is rejected with a structured error.
    let junk = temp_dir("presensi-backup-junk").join("junk.zip");
    std::fs::write(&junk, b"not a zip at all").unwrap();
    let scratch = temp_dir("presensi-backup-scratch");
    let resp = request(
        &mut stdin,
        &mut reader,
        "7",
        "backup.import",
        json!({
            "bundlePath": junk.to_string_lossy(),
            "workspacePath": scratch.to_string_lossy()
        }),
    );
    assert_eq!(resp["ok"], json!(false));
    assert_eq!(resp["error"]["code"], json!("bad_bundle"));
}
