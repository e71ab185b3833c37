use anyhow::{anyhow, Context};
use chrono::{DateTime, FixedOffset};
use rusqlite::Connection;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::db;

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/presensi.sqlite3";
const META_WORKSPACE_ENTRY: &str = "meta/workspace.json";
pub const BUNDLE_FORMAT_V1: &str = "presensi-workspace-v1";

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
    pub db_sha256: String,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
}

/// Field quoting per RFC 4180: quote when the value carries a comma, quote
/// or line break; embedded quotes are doubled.
fn csv_field(raw: &str) -> String {
    if raw.contains(',') || raw.contains('"') || raw.contains('\n') || raw.contains('\r') {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

fn csv_line(fields: &[String]) -> String {
    fields
        .iter()
        .map(|f| csv_field(f))
        .collect::<Vec<_>>()
        .join(",")
}

fn opt(v: Option<String>) -> String {
    v.unwrap_or_default()
}

/// Fixed, documented column sets per collection. Headers use the same
/// Indonesian labels the report screens print.
pub fn csv_for_collection(conn: &Connection, collection: &str) -> anyhow::Result<String> {
    let mut lines = Vec::new();
    match collection {
        "attendanceRecords" => {
            lines.push(csv_line(&[
                "ID".into(),
                "User ID".into(),
                "Nama".into(),
                "Tanggal".into(),
                "Jam Masuk".into(),
                "Jam Keluar".into(),
                "Status".into(),
                "Jarak (m)".into(),
                "Catatan".into(),
            ]));
            let mut stmt = conn.prepare(
                "SELECT a.id, a.user_id, u.name, a.date, a.check_in_time, a.check_out_time,
                        a.status, a.distance_meters, a.notes
                 FROM attendance_records a
                 JOIN users u ON u.id = a.user_id
                 ORDER BY a.date, a.check_in_time",
            )?;
            let rows = stmt.query_map([], |r| {
                Ok(csv_line(&[
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                    opt(r.get::<_, Option<String>>(5)?),
                    r.get::<_, String>(6)?,
                    format!("{:.1}", r.get::<_, f64>(7)?),
                    opt(r.get::<_, Option<String>>(8)?),
                ]))
            })?;
            for row in rows {
                lines.push(row?);
            }
        }
        "teachingLogs" => {
            lines.push(csv_line(&[
                "ID".into(),
                "User ID".into(),
                "Nama Guru".into(),
                "Tanggal".into(),
                "Kelas".into(),
                "Mata Pelajaran".into(),
                "Topik".into(),
                "Jumlah Siswa".into(),
                "Hadir".into(),
                "Sakit".into(),
                "Izin".into(),
                "Alpa".into(),
            ]));
            let mut stmt = conn.prepare(
                "SELECT t.id, t.user_id, u.name, t.date, c.name, s.name, t.topic,
                        t.total_students, t.present_count, t.sick_count,
                        t.permission_count, t.absent_count
                 FROM teaching_logs t
                 JOIN users u ON u.id = t.user_id
                 JOIN classes c ON c.id = t.class_id
                 JOIN subjects s ON s.id = t.subject_id
                 ORDER BY t.date, t.created_at",
            )?;
            let rows = stmt.query_map([], |r| {
                Ok(csv_line(&[
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, String>(5)?,
                    r.get::<_, String>(6)?,
                    r.get::<_, i64>(7)?.to_string(),
                    r.get::<_, i64>(8)?.to_string(),
                    r.get::<_, i64>(9)?.to_string(),
                    r.get::<_, i64>(10)?.to_string(),
                    r.get::<_, i64>(11)?.to_string(),
                ]))
            })?;
            for row in rows {
                lines.push(row?);
            }
        }
        "students" => {
            lines.push(csv_line(&[
                "ID".into(),
                "NIS".into(),
                "Nama".into(),
                "Kelas".into(),
                "Status".into(),
            ]));
            let mut stmt = conn.prepare(
                "SELECT s.id, s.nis, s.name, c.name, s.active
                 FROM students s
                 JOIN classes c ON c.id = s.class_id
                 ORDER BY c.name, s.sort_order, s.name",
            )?;
            let rows = stmt.query_map([], |r| {
                Ok(csv_line(&[
                    r.get::<_, String>(0)?,
                    opt(r.get::<_, Option<String>>(1)?),
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    if r.get::<_, i64>(4)? != 0 {
                        "aktif".into()
                    } else {
                        "nonaktif".into()
                    },
                ]))
            })?;
            for row in rows {
                lines.push(row?);
            }
        }
        "users" => {
            lines.push(csv_line(&[
                "ID".into(),
                "Username".into(),
                "Nama".into(),
                "NIP".into(),
                "Role".into(),
                "Departemen".into(),
                "Status".into(),
            ]));
            let mut stmt = conn.prepare(
                "SELECT id, username, name, nip, role, department, active
                 FROM users ORDER BY name",
            )?;
            let rows = stmt.query_map([], |r| {
                Ok(csv_line(&[
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    opt(r.get::<_, Option<String>>(3)?),
                    r.get::<_, String>(4)?,
                    r.get::<_, String>(5)?,
                    if r.get::<_, i64>(6)? != 0 {
                        "aktif".into()
                    } else {
                        "nonaktif".into()
                    },
                ]))
            })?;
            for row in rows {
                lines.push(row?);
            }
        }
        other => return Err(anyhow!("unknown collection: {}", other)),
    }
    let mut out = lines.join("\r\n");
    out.push_str("\r\n");
    Ok(out)
}

fn dump_table(conn: &Connection, sql: &str) -> anyhow::Result<Vec<serde_json::Value>> {
    let mut stmt = conn.prepare(sql)?;
    let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let rows = stmt.query_map([], |r| {
        let mut obj = serde_json::Map::new();
        for (i, name) in column_names.iter().enumerate() {
            let value = match r.get_ref(i)? {
                rusqlite::types::ValueRef::Null => serde_json::Value::Null,
                rusqlite::types::ValueRef::Integer(v) => json!(v),
                rusqlite::types::ValueRef::Real(v) => json!(v),
                rusqlite::types::ValueRef::Text(v) => json!(String::from_utf8_lossy(v)),
                rusqlite::types::ValueRef::Blob(_) => serde_json::Value::Null,
            };
            obj.insert(name.clone(), value);
        }
        Ok(serde_json::Value::Object(obj))
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Whole-workspace JSON mirror, one array per collection, password digests
/// excluded.
pub fn json_dump(conn: &Connection) -> anyhow::Result<serde_json::Value> {
    Ok(json!({
        "users": dump_table(
            conn,
            "SELECT id, username, name, nip, role, department, active, created_at
             FROM users ORDER BY name",
        )?,
        "classes": dump_table(conn, "SELECT * FROM classes ORDER BY name")?,
        "students": dump_table(
            conn,
            "SELECT * FROM students ORDER BY class_id, sort_order, name",
        )?,
        "subjects": dump_table(conn, "SELECT * FROM subjects ORDER BY name")?,
        "schedules": dump_table(
            conn,
            "SELECT * FROM schedules ORDER BY weekday, start_time",
        )?,
        "attendanceRecords": dump_table(
            conn,
            "SELECT * FROM attendance_records ORDER BY date, check_in_time",
        )?,
        "teachingLogs": dump_table(
            conn,
            "SELECT * FROM teaching_logs ORDER BY date, created_at",
        )?,
        "studentAttendance": dump_table(
            conn,
            "SELECT * FROM student_attendance ORDER BY teaching_log_id, student_id",
        )?,
        "auditLogs": dump_table(conn, "SELECT * FROM audit_logs ORDER BY at")?,
    }))
}

pub fn export_workspace_bundle(
    workspace_path: &Path,
    out_path: &Path,
    exported_at: DateTime<FixedOffset>,
) -> anyhow::Result<ExportSummary> {
    let db_path = workspace_path.join(db::DB_FILE);
    if !db_path.is_file() {
        return Err(anyhow!(
            "workspace database not found: {}",
            db_path.to_string_lossy()
        ));
    }

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }

    let mut db_bytes = Vec::new();
    File::open(&db_path)
        .with_context(|| format!("failed to open database {}", db_path.to_string_lossy()))?
        .read_to_end(&mut db_bytes)
        .context("failed to read database")?;
    let db_sha256 = format!("{:x}", Sha256::digest(&db_bytes));

    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let manifest = json!({
        "format": BUNDLE_FORMAT_V1,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": exported_at.to_rfc3339(),
        "dbSha256": db_sha256,
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    zip.start_file(DB_ENTRY, opts)
        .context("failed to start database entry")?;
    zip.write_all(&db_bytes)
        .context("failed to write database entry")?;

    let workspace_meta = json!({
        "sourceWorkspace": workspace_path.to_string_lossy(),
    });
    zip.start_file(META_WORKSPACE_ENTRY, opts)
        .context("failed to start workspace metadata entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&workspace_meta)
            .context("failed to serialize workspace metadata")?
            .as_bytes(),
    )
    .context("failed to write workspace metadata entry")?;

    zip.finish().context("failed to finalize zip bundle")?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        entry_count: 3,
        db_sha256,
    })
}

pub fn import_workspace_bundle(
    in_path: &Path,
    workspace_path: &Path,
) -> anyhow::Result<ImportSummary> {
    std::fs::create_dir_all(workspace_path).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace_path.to_string_lossy()
        )
    })?;
    let dst = workspace_path.join(db::DB_FILE);

    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: serde_json::Value =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid JSON")?;
    let format = manifest
        .get("format")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if format != BUNDLE_FORMAT_V1 {
        return Err(anyhow!("unsupported bundle format: {}", format));
    }

    let mut db_bytes = Vec::new();
    archive
        .by_name(DB_ENTRY)
        .context("bundle missing db/presensi.sqlite3")?
        .read_to_end(&mut db_bytes)
        .context("failed to extract database entry")?;

    // Refuse a bundle whose payload no longer matches its manifest digest.
    if let Some(expected) = manifest.get("dbSha256").and_then(|v| v.as_str()) {
        let actual = format!("{:x}", Sha256::digest(&db_bytes));
        if actual != expected {
            return Err(anyhow!(
                "bundle integrity check failed: expected {}, got {}",
                expected,
                actual
            ));
        }
    }

    let tmp_dst = workspace_path.join(format!("{}.importing", db::DB_FILE));
    if tmp_dst.exists() {
        let _ = std::fs::remove_file(&tmp_dst);
    }
    let mut db_out = File::create(&tmp_dst).with_context(|| {
        format!(
            "failed to create temp database {}",
            tmp_dst.to_string_lossy()
        )
    })?;
    db_out
        .write_all(&db_bytes)
        .context("failed to write extracted database")?;
    db_out
        .flush()
        .context("failed to flush extracted database")?;

    if dst.exists() {
        std::fs::remove_file(&dst).with_context(|| {
            format!(
                "failed to remove existing database {}",
                dst.to_string_lossy()
            )
        })?;
    }
    std::fs::rename(&tmp_dst, &dst).with_context(|| {
        format!(
            "failed to move extracted database to {}",
            dst.to_string_lossy()
        )
    })?;

    Ok(ImportSummary {
        bundle_format_detected: BUNDLE_FORMAT_V1.to_string(),
    })
}
