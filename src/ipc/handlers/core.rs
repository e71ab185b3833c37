use crate::config::SchoolConfig;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use uuid::Uuid;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "serverTime": state.clock.now().to_rfc3339(),
        }),
    )
}

pub fn password_digest(raw: &str) -> String {
    format!("{:x}", Sha256::digest(raw.as_bytes()))
}

/// First open of a fresh workspace: persist the default settings so the
/// admin screens have something to edit, and create a bootstrap admin
/// login. Both are no-ops on an existing workspace.
fn seed_workspace(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    if db::settings_get_json(conn, "school")?.is_none() {
        SchoolConfig::default().save(conn)?;
    }

    let user_count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?;
    if user_count == 0 {
        conn.execute(
            "INSERT INTO users(id, username, password_sha256, name, role, department, active)
             VALUES(?, 'admin', ?, 'Administrator', 'admin', '', 1)",
            (Uuid::new_v4().to_string(), password_digest("admin123")),
        )?;
        tracing::info!("seeded default admin account");
    }
    Ok(())
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match db::open_db(&path) {
        Ok(conn) => {
            if let Err(e) = seed_workspace(&conn) {
                return err(&req.id, "db_open_failed", format!("{e:?}"), None);
            }
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            state.reports.invalidate_all();
            tracing::info!(workspace = %path.to_string_lossy(), "workspace opened");
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
