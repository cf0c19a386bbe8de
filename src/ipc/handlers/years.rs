use crate::ipc::error::ok;
use crate::ipc::helpers::{now_ts, require_admin, require_db, required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

const BIMESTERS_PER_YEAR: i64 = 4;

fn years_list(state: &AppState) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let mut stmt = conn
        .prepare("SELECT id, name, status, created_at FROM academic_years ORDER BY created_at DESC")
        .map_err(|e| HandlerErr::db("db_query_failed", e, "academic_years"))?;
    let years = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "status": r.get::<_, String>(2)?,
                "createdAt": r.get::<_, String>(3)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e, "academic_years"))?;
    Ok(json!({ "years": years }))
}

/// A new year opens immediately and comes with its four bimesters, all
/// open for filling.
fn years_create(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let _ = require_admin(state)?;
    let conn = require_db(state)?;
    let name = required_str(params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::new("bad_params", "name must not be empty"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e, "academic_years"))?;
    let year_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO academic_years(id, name, status, created_at) VALUES(?, ?, 'open', ?)",
        (&year_id, &name, now_ts()),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e, "academic_years"))?;
    for number in 1..=BIMESTERS_PER_YEAR {
        tx.execute(
            "INSERT INTO bimesters(id, year_id, number, status) VALUES(?, ?, ?, 'open_fill')",
            (Uuid::new_v4().to_string(), &year_id, number),
        )
        .map_err(|e| HandlerErr::db("db_insert_failed", e, "bimesters"))?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e, "academic_years"))?;

    Ok(json!({ "yearId": year_id, "name": name }))
}

fn years_set_status(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let _ = require_admin(state)?;
    let conn = require_db(state)?;
    let year_id = required_str(params, "yearId")?;
    let status = required_str(params, "status")?;
    if status != "open" && status != "closed" {
        return Err(HandlerErr::new("bad_params", "status must be open or closed"));
    }
    let changed = conn
        .execute(
            "UPDATE academic_years SET status = ? WHERE id = ?",
            (&status, &year_id),
        )
        .map_err(|e| HandlerErr::db("db_update_failed", e, "academic_years"))?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", "academic year not found"));
    }
    Ok(json!({ "yearId": year_id, "status": status }))
}

fn bimesters_list(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let year_id = required_str(params, "yearId")?;
    let mut stmt = conn
        .prepare(
            "SELECT id, number, status, start_date, end_date
             FROM bimesters
             WHERE year_id = ?
             ORDER BY number",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e, "bimesters"))?;
    let bimesters = stmt
        .query_map([&year_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "number": r.get::<_, i64>(1)?,
                "status": r.get::<_, String>(2)?,
                "startDate": r.get::<_, Option<String>>(3)?,
                "endDate": r.get::<_, Option<String>>(4)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e, "bimesters"))?;
    Ok(json!({ "bimesters": bimesters }))
}

/// The period-lock toggle. Unconditional in either direction; closing does
/// not require the bimester's data to be complete.
fn bimesters_set_status(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let _ = require_admin(state)?;
    let conn = require_db(state)?;
    let bimester_id = required_str(params, "bimesterId")?;
    let status = required_str(params, "status")?;
    if status != "open_fill" && status != "closed" {
        return Err(HandlerErr::new(
            "bad_params",
            "status must be open_fill or closed",
        ));
    }
    let changed = conn
        .execute(
            "UPDATE bimesters SET status = ? WHERE id = ?",
            (&status, &bimester_id),
        )
        .map_err(|e| HandlerErr::db("db_update_failed", e, "bimesters"))?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", "bimester not found"));
    }
    tracing::info!(bimester = %bimester_id, status = %status, "bimester status changed");
    Ok(json!({ "bimesterId": bimester_id, "status": status }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "years.list" => years_list(state),
        "years.create" => years_create(state, &req.params),
        "years.setStatus" => years_set_status(state, &req.params),
        "bimesters.list" => bimesters_list(state, &req.params),
        "bimesters.setStatus" => bimesters_set_status(state, &req.params),
        _ => return None,
    };
    Some(match result {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    })
}
