use crate::export;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let collection = match required_str(req, "collection") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match export::csv_for_collection(conn, &collection) {
        Ok(content) => ok(
            &req.id,
            json!({
                "collection": collection,
                "filename": format!("{}.csv", collection),
                "content": content,
            }),
        ),
        Err(e) => err(&req.id, "bad_params", e.to_string(), None),
    }
}

fn handle_json_dump(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    match export::json_dump(conn) {
        Ok(dump) => ok(&req.id, json!({ "collections": dump })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_backup_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let out_path = match required_str(req, "outPath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e,
    };
    match export::export_workspace_bundle(&workspace, &out_path, state.clock.now()) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "bundleFormat": summary.bundle_format,
                "entryCount": summary.entry_count,
                "dbSha256": summary.db_sha256,
                "outPath": out_path.to_string_lossy(),
            }),
        ),
        Err(e) => err(&req.id, "io_failed", format!("{e:?}"), None),
    }
}

/// Extracts a bundle into a workspace directory. The caller follows up with
/// `workspace.select` on that directory; an open handle on the live
/// database is never swapped underneath.
fn handle_backup_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let bundle_path = match required_str(req, "bundlePath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e,
    };
    let workspace_path = match required_str(req, "workspacePath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e,
    };
    if state.workspace.as_deref() == Some(workspace_path.as_path()) && state.db.is_some() {
        return err(
            &req.id,
            "bad_params",
            "cannot import over the open workspace; select another workspace first",
            None,
        );
    }
    match export::import_workspace_bundle(&bundle_path, &workspace_path) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "bundleFormatDetected": summary.bundle_format_detected,
                "workspacePath": workspace_path.to_string_lossy(),
            }),
        ),
        Err(e) => err(&req.id, "bad_bundle", format!("{e:?}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "export.csv" => Some(handle_csv(state, req)),
        "export.jsonDump" => Some(handle_json_dump(state, req)),
        "backup.export" => Some(handle_backup_export(state, req)),
        "backup.import" => Some(handle_backup_import(state, req)),
        _ => None,
    }
}
