use crate::ipc::error::ok;
use crate::ipc::helpers::{
    now_ts, optional_bool, optional_str, require_admin, require_db, required_str, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn teachers_list(state: &AppState) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let mut stmt = conn
        .prepare(
            "SELECT t.id, t.profile_id, t.active, p.full_name, p.email
             FROM teachers t
             JOIN profiles p ON p.id = t.profile_id
             ORDER BY p.full_name",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e, "teachers"))?;
    let teachers = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "profileId": r.get::<_, String>(1)?,
                "active": r.get::<_, i64>(2)? != 0,
                "fullName": r.get::<_, String>(3)?,
                "email": r.get::<_, Option<String>>(4)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e, "teachers"))?;
    Ok(json!({ "teachers": teachers }))
}

/// Creates the teacher profile and its teachers row together, so a teacher
/// can open a session and appear in assignment pickers right away.
fn teachers_create(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let _ = require_admin(state)?;
    let conn = require_db(state)?;
    let full_name = required_str(params, "fullName")?.trim().to_string();
    if full_name.is_empty() {
        return Err(HandlerErr::new("bad_params", "fullName must not be empty"));
    }
    let email = optional_str(params, "email")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e, "teachers"))?;
    let profile_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO profiles(id, email, full_name, role, created_at) VALUES(?, ?, ?, 'teacher', ?)",
        (&profile_id, &email, &full_name, now_ts()),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e, "profiles"))?;
    let teacher_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO teachers(id, profile_id, active, created_at) VALUES(?, ?, 1, ?)",
        (&teacher_id, &profile_id, now_ts()),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e, "teachers"))?;
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e, "teachers"))?;

    Ok(json!({ "teacherId": teacher_id, "profileId": profile_id }))
}

fn teachers_set_active(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let _ = require_admin(state)?;
    let conn = require_db(state)?;
    let teacher_id = required_str(params, "teacherId")?;
    let active = optional_bool(params, "active")?
        .ok_or_else(|| HandlerErr::new("bad_params", "missing active"))?;
    let changed = conn
        .execute(
            "UPDATE teachers SET active = ? WHERE id = ?",
            (active as i64, &teacher_id),
        )
        .map_err(|e| HandlerErr::db("db_update_failed", e, "teachers"))?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", "teacher not found"));
    }
    Ok(json!({ "teacherId": teacher_id, "active": active }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "teachers.list" => teachers_list(state),
        "teachers.create" => teachers_create(state, &req.params),
        "teachers.setActive" => teachers_set_active(state, &req.params),
        _ => return None,
    };
    Some(match result {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    })
}
